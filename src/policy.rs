use k8s_openapi::api::core::v1::Pod;

pub const ANNOTATION_INJECT: &str = "sidecar.example.org/inject";

/// Returns true when the pod opted out of injection.
pub fn should_ignore(pod: &Pod) -> bool {
    let value = pod
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(ANNOTATION_INJECT));

    match value.map(|v| parse_bool(v)) {
        Some(Some(inject)) => !inject,
        _ => false,
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}
