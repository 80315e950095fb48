use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use kube::core::admission::{AdmissionResponse, AdmissionReview};
use kube::core::{DynamicObject, TypeMeta};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::SidecarConfig;
use crate::error::{ErrorKind, InjectError};
use crate::patch::PodPatch;
use crate::policy;
use crate::review::{self, Review};
use crate::sidecar::{ConfigLookup, SidecarSource};

const REVIEW_API_VERSION: &str = "admission.k8s.io/v1";
const REVIEW_KIND: &str = "AdmissionReview";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Injected,
    Skipped,
    Rejected(ErrorKind),
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Injected => "injected",
            Outcome::Skipped => "skipped",
            Outcome::Rejected(_) => "error",
        }
    }
}

pub struct Mutation {
    pub review: AdmissionReview<DynamicObject>,
    pub outcome: Outcome,
}

pub struct Webhook {
    sidecar: SidecarSource,
    config_map: String,
    namespace: String,
}

impl Webhook {
    pub fn new(lookup: Arc<dyn ConfigLookup>, config: &SidecarConfig) -> Self {
        Self {
            sidecar: SidecarSource::new(lookup, config),
            config_map: config.config_map.clone(),
            namespace: config.namespace.clone(),
        }
    }

    /// Every failure is reported in the returned review, never as an error.
    pub async fn mutate(&self, data: &[u8]) -> Mutation {
        let review = match review::decode(data) {
            Ok(review) => review,
            Err(e) => {
                warn!("failed to decode admission review: {e}");
                let uid = e.uid().map(str::to_string);
                return rejected(response_types(None), uid, InjectError::from(e));
            }
        };

        let uid = review.envelope.request.as_ref().map(|req| req.uid.clone());
        debug!(uid = uid.as_deref().unwrap_or_default(), "decoded admission review");

        match self.inject(Some(&review)).await {
            Ok(response) => {
                let outcome = if response.patch.is_some() {
                    Outcome::Injected
                } else {
                    Outcome::Skipped
                };
                debug!(
                    uid = %response.uid,
                    outcome = outcome.as_str(),
                    patch = %response
                        .patch
                        .as_deref()
                        .map(String::from_utf8_lossy)
                        .unwrap_or_default(),
                    "admission response"
                );
                Mutation {
                    review: response.into_review(),
                    outcome,
                }
            }
            Err(e) => rejected(response_types(Some(&review)), uid, e),
        }
    }

    pub async fn inject(
        &self,
        review: Option<&Review>,
    ) -> Result<AdmissionResponse, InjectError> {
        let review = review.ok_or(InjectError::NilInput)?;
        let request = review.envelope.request.as_ref().ok_or(InjectError::NilInput)?;
        let object = review.object.as_ref().ok_or(InjectError::MissingObject)?;
        let pod = Pod::deserialize(object).map_err(InjectError::ObjectUnmarshal)?;

        let mut response = AdmissionResponse::from(request);
        response.types = response_types(Some(review));

        if policy::should_ignore(&pod) {
            debug!(
                uid = %request.uid,
                pod = %pod.name_any(),
                "pod opted out of sidecar injection"
            );
            return Ok(response);
        }

        let sidecar = self
            .sidecar
            .fetch_sidecar(&self.config_map, &self.namespace)
            .await?;

        let mut patch = PodPatch::new(&pod);
        patch
            .add_container(&sidecar)
            .map_err(InjectError::ContainerSerialization)?;
        patch.add_annotation();

        Ok(response.with_patch(patch.into_patch())?)
    }
}

fn rejected(types: TypeMeta, uid: Option<String>, error: InjectError) -> Mutation {
    let kind = error.kind();
    info!(
        uid = uid.as_deref().unwrap_or_default(),
        kind = kind.as_str(),
        "rejecting admission request: {error}"
    );

    let mut response = AdmissionResponse::invalid(error.to_string());
    response.types = types;
    response.uid = uid.unwrap_or_default();

    Mutation {
        review: response.into_review(),
        outcome: Outcome::Rejected(kind),
    }
}

fn response_types(review: Option<&Review>) -> TypeMeta {
    match review {
        Some(review) if !review.envelope.types.api_version.is_empty() => {
            review.envelope.types.clone()
        }
        _ => TypeMeta {
            api_version: REVIEW_API_VERSION.to_string(),
            kind: REVIEW_KIND.to_string(),
        },
    }
}
