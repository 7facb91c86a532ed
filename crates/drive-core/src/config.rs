//! SDK configuration
//!
//! Hosts pass a `DriveConfig` when constructing the client. Only the host
//! name is taken from the environment; everything else has conservative
//! defaults. Loading configuration from files is the host's concern.

use std::time::Duration;

/// Default API origin used when no base URL is configured.
pub const DEFAULT_BASE_URL: &str = "https://drive.proton.me/api";

/// Timeout applied to typed JSON requests.
pub const JSON_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout applied to block transfers.
pub const DEFAULT_BLOCK_TIMEOUT: Duration = Duration::from_secs(90);

/// SDK configuration supplied by the host.
#[derive(Debug, Clone)]
pub struct DriveConfig {
    /// Full API base URL, e.g. `https://drive.proton.me/api`.
    pub base_url: String,
    /// Language reported in the `Language` header.
    pub language: String,
    /// Whether telemetry events are recorded.
    pub observability_enabled: bool,
    /// Timeout for upload block transfers.
    pub upload_timeout: Duration,
    /// Timeout for download block transfers.
    pub download_timeout: Duration,
    /// Maximum simultaneous uploads.
    pub upload_queue_limit: usize,
    /// Maximum simultaneous downloads.
    pub download_queue_limit: usize,
    /// Identifier distinguishing this client instance for draft reclaim.
    /// Generated at client construction when absent.
    pub client_uid: Option<String>,
}

impl DriveConfig {
    /// Wrap a bare host name as an API base URL.
    ///
    /// `drive.example.com` becomes `https://drive.example.com/api`. Scheme
    /// prefixes and trailing slashes in the input are tolerated.
    pub fn base_url_from_host(host: &str) -> String {
        let host = host
            .trim()
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/');
        format!("https://{host}/api")
    }

    /// Configuration pointing at a specific host.
    pub fn with_host(host: &str) -> Self {
        Self {
            base_url: Self::base_url_from_host(host),
            ..Self::default()
        }
    }

    /// Short timeouts and small queues for tests.
    pub fn for_testing() -> Self {
        Self {
            base_url: "https://drive.test/api".to_string(),
            language: "en".to_string(),
            observability_enabled: true,
            upload_timeout: Duration::from_secs(5),
            download_timeout: Duration::from_secs(5),
            upload_queue_limit: 2,
            download_queue_limit: 2,
            client_uid: Some("test-client".to_string()),
        }
    }
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            language: "en".to_string(),
            observability_enabled: true,
            upload_timeout: DEFAULT_BLOCK_TIMEOUT,
            download_timeout: DEFAULT_BLOCK_TIMEOUT,
            upload_queue_limit: 5,
            download_queue_limit: 5,
            client_uid: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_is_wrapped_as_api_base_url() {
        assert_eq!(
            DriveConfig::base_url_from_host("drive.example.com"),
            "https://drive.example.com/api"
        );
        assert_eq!(
            DriveConfig::base_url_from_host("https://drive.example.com/"),
            "https://drive.example.com/api"
        );
    }

    #[test]
    fn default_points_at_the_production_origin() {
        assert_eq!(DriveConfig::default().base_url, DEFAULT_BASE_URL);
    }
}
