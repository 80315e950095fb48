use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    pub outcome: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub kind: &'static str,
}

pub struct InjectorMetrics {
    pub admission_requests_total: Family<OutcomeLabels, Counter>,
    pub admission_errors_total: Family<ErrorLabels, Counter>,
    pub admission_request_duration_seconds: Histogram,
}

const DURATION_BUCKETS: [f64; 14] = [
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

fn new_duration_histogram() -> Histogram {
    Histogram::new(DURATION_BUCKETS.iter().copied())
}

impl InjectorMetrics {
    pub fn new(registry: &mut Registry) -> Self {
        let admission_requests_total = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            "injector_admission_requests",
            "Total number of admission requests handled, by outcome",
            admission_requests_total.clone(),
        );

        let admission_errors_total = Family::<ErrorLabels, Counter>::default();
        registry.register(
            "injector_admission_errors",
            "Total number of rejected admission requests, by error kind",
            admission_errors_total.clone(),
        );

        let admission_request_duration_seconds = new_duration_histogram();
        registry.register(
            "injector_admission_request_duration_seconds",
            "Duration of admission request processing in seconds",
            admission_request_duration_seconds.clone(),
        );

        Self {
            admission_requests_total,
            admission_errors_total,
            admission_request_duration_seconds,
        }
    }
}
