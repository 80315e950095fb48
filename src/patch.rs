use json_patch::jsonptr::PointerBuf;
use json_patch::{AddOperation, Patch, PatchOperation};
use k8s_openapi::api::core::v1::{Container, Pod};
use kube::ResourceExt;
use serde_json::{Value, json};
use tracing::debug;

use crate::policy::ANNOTATION_INJECT;

/// RFC 6902 patch against a single pod.
pub struct PodPatch<'a> {
    pod: &'a Pod,
    operations: Vec<PatchOperation>,
}

impl<'a> PodPatch<'a> {
    pub fn new(pod: &'a Pod) -> Self {
        Self {
            pod,
            operations: Vec::new(),
        }
    }

    pub fn add_container(&mut self, container: &Container) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(container)?;
        self.push_add(["spec", "containers", "-"], value);
        Ok(())
    }

    pub fn add_annotation(&mut self) {
        self.push_add(
            ["metadata", "annotations"],
            json!({ ANNOTATION_INJECT: "false" }),
        );
    }

    pub fn into_patch(self) -> Patch {
        debug!(
            pod = %self.pod.name_any(),
            operations = self.operations.len(),
            "built pod patch"
        );
        Patch(self.operations)
    }

    fn push_add<const N: usize>(&mut self, tokens: [&str; N], value: Value) {
        self.operations.push(PatchOperation::Add(AddOperation {
            path: PointerBuf::from_tokens(tokens),
            value,
        }));
    }
}
