use std::fmt;

use kube::core::admission::SerializePatchError;
use thiserror::Error;

use crate::review::DecodeError;
use crate::sidecar::SidecarError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Decode,
    NilInput,
    ObjectUnmarshal,
    SidecarLookup,
    SidecarMalformed,
    PatchSerialization,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Decode => "decode",
            ErrorKind::NilInput => "nil_input",
            ErrorKind::ObjectUnmarshal => "object_unmarshal",
            ErrorKind::SidecarLookup => "sidecar_lookup",
            ErrorKind::SidecarMalformed => "sidecar_malformed",
            ErrorKind::PatchSerialization => "patch_serialization",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum InjectError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("admission review input can't be nil")]
    NilInput,
    #[error("admission request has no object")]
    MissingObject,
    #[error("failed to unmarshal pod: {0}")]
    ObjectUnmarshal(#[source] serde_json::Error),
    #[error(transparent)]
    Sidecar(#[from] SidecarError),
    #[error("failed to serialize sidecar container: {0}")]
    ContainerSerialization(#[source] serde_json::Error),
    #[error("failed to serialize patch: {0}")]
    PatchSerialization(#[from] SerializePatchError),
}

impl InjectError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InjectError::Decode(_) => ErrorKind::Decode,
            InjectError::NilInput => ErrorKind::NilInput,
            InjectError::MissingObject | InjectError::ObjectUnmarshal(_) => {
                ErrorKind::ObjectUnmarshal
            }
            InjectError::Sidecar(e) if e.is_lookup_failure() => ErrorKind::SidecarLookup,
            InjectError::Sidecar(_) => ErrorKind::SidecarMalformed,
            InjectError::ContainerSerialization(_) | InjectError::PatchSerialization(_) => {
                ErrorKind::PatchSerialization
            }
        }
    }
}
