use kube::core::admission::AdmissionReview;
use kube::core::{DynamicObject, TypeMeta};
use serde_json::Value;
use thiserror::Error;

/// Decoded admission review. The envelope's request never carries objects;
/// the object under review is kept as raw JSON and parsed on injection.
#[derive(Debug, Clone)]
pub struct Review {
    pub envelope: AdmissionReview<DynamicObject>,
    pub object: Option<Value>,
}

#[derive(Debug, Error)]
#[error("failed to decode admission review: {source}")]
pub struct DecodeError {
    #[source]
    source: serde_json::Error,
    uid: Option<String>,
}

impl DecodeError {
    pub fn uid(&self) -> Option<&str> {
        self.uid.as_deref()
    }
}

pub fn empty_review() -> Review {
    Review {
        envelope: AdmissionReview {
            types: TypeMeta::default(),
            request: None,
            response: None,
        },
        object: None,
    }
}

pub fn decode(data: &[u8]) -> Result<Review, DecodeError> {
    if data.is_empty() {
        return Ok(empty_review());
    }

    let mut value: Value =
        serde_json::from_slice(data).map_err(|source| DecodeError { source, uid: None })?;

    let uid = value
        .pointer("/request/uid")
        .and_then(Value::as_str)
        .filter(|uid| !uid.is_empty())
        .map(str::to_string);

    let object = value
        .get_mut("request")
        .and_then(Value::as_object_mut)
        .and_then(|request| {
            request.remove("oldObject");
            request.remove("object")
        })
        .filter(|object| !object.is_null());

    let envelope = serde_json::from_value(value).map_err(|source| DecodeError { source, uid })?;

    Ok(Review { envelope, object })
}
