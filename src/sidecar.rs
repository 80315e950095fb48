use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Container};
use kube::{Api, Client};
use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;

use crate::config::SidecarConfig;

pub type LookupError = Box<dyn std::error::Error + Send + Sync>;

/// Read access to namespaced key-value config objects.
#[async_trait]
pub trait ConfigLookup: Send + Sync {
    /// Returns the data of the named object, or `None` if it doesn't exist.
    async fn get(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<BTreeMap<String, String>>, LookupError>;
}

/// `ConfigLookup` backed by ConfigMaps in the cluster.
#[derive(Clone)]
pub struct KubeConfigLookup {
    client: Client,
}

impl KubeConfigLookup {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ConfigLookup for KubeConfigLookup {
    async fn get(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<BTreeMap<String, String>>, LookupError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let config_map = api.get_opt(name).await?;
        Ok(config_map.map(|cm| cm.data.unwrap_or_default()))
    }
}

#[derive(Debug, Error)]
pub enum SidecarError {
    #[error("sidecar config '{namespace}/{name}' not found")]
    NotFound { name: String, namespace: String },
    #[error("failed to look up sidecar config '{namespace}/{name}': {source}")]
    Lookup {
        name: String,
        namespace: String,
        #[source]
        source: LookupError,
    },
    #[error("timed out after {timeout:?} looking up sidecar config '{namespace}/{name}'")]
    Timeout {
        name: String,
        namespace: String,
        timeout: Duration,
    },
    #[error("sidecar config '{namespace}/{name}' has no '{key}' entry")]
    MissingKey {
        name: String,
        namespace: String,
        key: String,
    },
    #[error("sidecar config '{namespace}/{name}' key '{key}' is not a valid container: {source}")]
    Malformed {
        name: String,
        namespace: String,
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl SidecarError {
    pub fn is_lookup_failure(&self) -> bool {
        matches!(
            self,
            SidecarError::NotFound { .. }
                | SidecarError::Lookup { .. }
                | SidecarError::Timeout { .. }
        )
    }
}

#[derive(Clone)]
pub struct SidecarSource {
    lookup: Arc<dyn ConfigLookup>,
    key: String,
    timeout: Duration,
}

impl SidecarSource {
    pub fn new(lookup: Arc<dyn ConfigLookup>, config: &SidecarConfig) -> Self {
        Self {
            lookup,
            key: config.key.clone(),
            timeout: config.lookup_timeout(),
        }
    }

    pub async fn fetch_sidecar(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Container, SidecarError> {
        let data = match timeout(self.timeout, self.lookup.get(name, namespace)).await {
            Ok(Ok(Some(data))) => data,
            Ok(Ok(None)) => {
                return Err(SidecarError::NotFound {
                    name: name.to_string(),
                    namespace: namespace.to_string(),
                });
            }
            Ok(Err(source)) => {
                return Err(SidecarError::Lookup {
                    name: name.to_string(),
                    namespace: namespace.to_string(),
                    source,
                });
            }
            Err(_) => {
                return Err(SidecarError::Timeout {
                    name: name.to_string(),
                    namespace: namespace.to_string(),
                    timeout: self.timeout,
                });
            }
        };

        let payload = data.get(&self.key).ok_or_else(|| SidecarError::MissingKey {
            name: name.to_string(),
            namespace: namespace.to_string(),
            key: self.key.clone(),
        })?;

        let container: Container =
            serde_json::from_str(payload).map_err(|source| SidecarError::Malformed {
                name: name.to_string(),
                namespace: namespace.to_string(),
                key: self.key.clone(),
                source,
            })?;

        debug!(
            config_map = %name,
            namespace = %namespace,
            container = %container.name,
            image = container.image.as_deref().unwrap_or("<none>"),
            "resolved sidecar container"
        );

        Ok(container)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::StaticConfigLookup;
    use super::*;

    fn source(lookup: StaticConfigLookup) -> (Arc<StaticConfigLookup>, SidecarSource) {
        let lookup = Arc::new(lookup);
        let source = SidecarSource::new(lookup.clone(), &SidecarConfig::default());
        (lookup, source)
    }

    #[tokio::test]
    async fn test_fetch_sidecar() {
        let (_, source) = source(StaticConfigLookup::with_sidecar());

        let container = source.fetch_sidecar("sidecar-spec", "default").await.unwrap();
        assert_eq!(container.name, "envoy");
        assert_eq!(container.image.as_deref(), Some("envoy:v1"));
    }

    #[tokio::test]
    async fn test_fetch_sidecar_every_call_hits_lookup() {
        let (lookup, source) = source(StaticConfigLookup::with_sidecar());

        source.fetch_sidecar("sidecar-spec", "default").await.unwrap();
        source.fetch_sidecar("sidecar-spec", "default").await.unwrap();
        assert_eq!(lookup.call_count(), 2);
    }

    #[tokio::test]
    async fn test_fetch_sidecar_not_found() {
        let (_, source) = source(StaticConfigLookup::with_sidecar());

        let err = source.fetch_sidecar("sidecar-spec", "kube-system").await.unwrap_err();
        assert!(matches!(err, SidecarError::NotFound { .. }));
        assert!(err.is_lookup_failure());
        assert_eq!(err.to_string(), "sidecar config 'kube-system/sidecar-spec' not found");
    }

    #[tokio::test]
    async fn test_fetch_sidecar_missing_key() {
        let lookup = StaticConfigLookup::default().with_object(
            "default",
            "sidecar-spec",
            [("other.json", "{}".to_string())],
        );
        let (_, source) = source(lookup);

        let err = source.fetch_sidecar("sidecar-spec", "default").await.unwrap_err();
        assert!(matches!(err, SidecarError::MissingKey { ref key, .. } if key == "sidecar.json"));
        assert!(!err.is_lookup_failure());
    }

    #[tokio::test]
    async fn test_fetch_sidecar_malformed_payload() {
        let lookup = StaticConfigLookup::default().with_object(
            "default",
            "sidecar-spec",
            [("sidecar.json", "{\"image\": \"envoy:v1\"".to_string())],
        );
        let (_, source) = source(lookup);

        let err = source.fetch_sidecar("sidecar-spec", "default").await.unwrap_err();
        assert!(matches!(err, SidecarError::Malformed { .. }));
        assert!(!err.is_lookup_failure());
    }

    #[tokio::test]
    async fn test_fetch_sidecar_client_failure() {
        let lookup = StaticConfigLookup {
            fail_with: Some("connection refused".to_string()),
            ..StaticConfigLookup::with_sidecar()
        };
        let (_, source) = source(lookup);

        let err = source.fetch_sidecar("sidecar-spec", "default").await.unwrap_err();
        assert!(matches!(err, SidecarError::Lookup { .. }));
        assert!(err.to_string().ends_with("connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_sidecar_timeout() {
        let lookup = StaticConfigLookup {
            delay: Some(Duration::from_secs(60)),
            ..StaticConfigLookup::with_sidecar()
        };
        let (_, source) = source(lookup);

        let err = source.fetch_sidecar("sidecar-spec", "default").await.unwrap_err();
        assert!(matches!(
            err,
            SidecarError::Timeout { timeout, .. } if timeout == Duration::from_secs(5)
        ));
        assert!(err.is_lookup_failure());
    }
}
