//! Version information for evalq.

/// evalq version from Cargo.toml
pub const EVALQ_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version information reported by the hammer and host workers.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VersionInfo {
    pub evalq: &'static str,
    /// Name of the script host the controller talks to, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            evalq: EVALQ_VERSION,
            host: None,
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }
}

impl std::fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "evalq {}", self.evalq)?;
        if let Some(host) = &self.host {
            write!(f, " ({host})")?;
        }
        Ok(())
    }
}
