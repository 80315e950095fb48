use std::time::Duration;

use figment::{Figment, providers::{Env, Format, Yaml}};
use serde::{Deserialize, Serialize};

fn default_listen_addr() -> String {
    "0.0.0.0:8443".to_string()
}

fn default_tls_cert_path() -> String {
    "/etc/secret/tls.crt".to_string()
}

fn default_tls_key_path() -> String {
    "/etc/secret/tls.key".to_string()
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_body_bytes() -> usize {
    2 * 1024 * 1024
}

fn default_config_map() -> String {
    "sidecar-spec".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_key() -> String {
    "sidecar.json".to_string()
}

fn default_lookup_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectorConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_tls_cert_path")]
    pub tls_cert_path: String,
    #[serde(default = "default_tls_key_path")]
    pub tls_key_path: String,
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default)]
    pub sidecar: SidecarConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidecarConfig {
    #[serde(default = "default_config_map")]
    pub config_map: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_key")]
    pub key: String,
    #[serde(default = "default_lookup_timeout_secs")]
    pub lookup_timeout_secs: u64,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            config_map: default_config_map(),
            namespace: default_namespace(),
            key: default_key(),
            lookup_timeout_secs: default_lookup_timeout_secs(),
        }
    }
}

impl SidecarConfig {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs)
    }
}

impl InjectorConfig {
    pub fn load(path: &str) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("INJECTOR_").split("__"))
            .extract()
            .map_err(Box::new)
    }
}
