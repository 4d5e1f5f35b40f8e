//! Firestore client settings

use std::time::Duration;

/// Settings for configuring the Firestore client
///
/// # Example
/// ```
/// use firebase_data_source::firestore::Settings;
/// use std::time::Duration;
///
/// let settings = Settings {
///     poll_interval: Duration::from_secs(5),
///     ..Settings::default()
/// };
/// assert_eq!(settings.host, "firestore.googleapis.com");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Host of the Firestore backend to connect to
    ///
    /// Default: "firestore.googleapis.com"
    pub host: String,

    /// Whether to use SSL for communication
    ///
    /// Disable only for the local emulator. Default: true
    pub ssl_enabled: bool,

    /// Database within the project
    ///
    /// Default: "(default)"
    pub database_id: String,

    /// Interval between reads of a continuously watched document or query
    ///
    /// Default: 2 seconds
    pub poll_interval: Duration,

    /// Timeout applied to every REST request
    ///
    /// Default: 30 seconds
    pub request_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "firestore.googleapis.com".to_string(),
            ssl_enabled: true,
            database_id: Self::DEFAULT_DATABASE.to_string(),
            poll_interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl Settings {
    /// Identifier of a project's default database
    pub const DEFAULT_DATABASE: &'static str = "(default)";

    /// Creates default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings for a local emulator at `host` (e.g. `localhost:8080`)
    pub fn emulator(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ssl_enabled: false,
            ..Self::default()
        }
    }

    /// Scheme and host, e.g. `https://firestore.googleapis.com`
    pub fn origin(&self) -> String {
        let scheme = if self.ssl_enabled { "https" } else { "http" };
        format!("{}://{}", scheme, self.host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin() {
        assert_eq!(Settings::default().origin(), "https://firestore.googleapis.com");
        assert_eq!(Settings::emulator("localhost:8080").origin(), "http://localhost:8080");
    }
}
