//! Per-instance proxy configuration.

use serde::{Deserialize, Serialize};

/// Configuration record for one proxied external host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyServerConfig {
    /// Unique across the host registry.
    pub id: String,
    /// The real remote origin, `host` or `host:port`.
    pub external_host_name: String,
    /// Local port this instance listens on.
    pub port: u16,
    /// Forward over https instead of http.
    #[serde(default)]
    pub use_ssl: bool,
    /// Start the listener as soon as the instance exists.
    #[serde(default)]
    pub auto_start: bool,
}

impl ProxyServerConfig {
    /// Storage key for this host; colons are not valid in the persisted
    /// layout, so `host:port` becomes `host.port`.
    pub fn host_key(&self) -> String {
        self.external_host_name.replace(':', ".")
    }

    /// Base URL of the real origin.
    pub fn origin_url(&self) -> String {
        let scheme = if self.use_ssl { "https" } else { "http" };
        format!("{scheme}://{}", self.external_host_name)
    }
}
