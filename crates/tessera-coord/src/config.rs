//! Configuration for coordination-store sessions

use std::time::Duration;

/// Coordination session configuration.
///
/// (connect_string, session_timeout) identifies a session; the shared
/// registry keys cache instances by exactly this pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CoordConfig {
    /// host:port list of the coordination ensemble
    pub connect_string: String,
    /// Session timeout negotiated with the store
    pub session_timeout: Duration,
}

impl CoordConfig {
    pub fn new(connect_string: impl Into<String>, session_timeout: Duration) -> Self {
        Self {
            connect_string: connect_string.into(),
            session_timeout,
        }
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.connect_string.is_empty() {
            return Err("connect_string must not be empty".into());
        }
        if self.session_timeout.as_millis() == 0 {
            return Err("session_timeout must be > 0".into());
        }
        Ok(())
    }
}

impl Default for CoordConfig {
    fn default() -> Self {
        Self {
            connect_string: "localhost:2181".to_string(),
            session_timeout: Duration::from_secs(30),
        }
    }
}
