use std::time::Duration;

use palaver_shared::constants::{
    DEFAULT_AUTH_ERROR_CODES, LOCATION_TIMEOUT, PROFILE_SAVE_DELAY,
};

use crate::error::{ClientError, Result};

/// Widget configuration supplied by the embedding host.
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend application identifier. Required.
    pub app_id: String,
    /// Base URL of the backend REST API. Required.
    pub base_url: String,
    pub image_upload_enabled: bool,
    /// Save window for coalescing profile updates.
    pub profile_save_delay: Duration,
    /// Timeout for geolocation acquisition on location messages.
    pub location_timeout: Duration,
    /// Backend error codes treated as authentication failures.
    pub auth_error_codes: Vec<String>,
    /// User-facing notification texts, overridable by the host.
    pub text: UiText,
}

impl Config {
    pub fn new(app_id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            base_url: base_url.into(),
            image_upload_enabled: true,
            profile_save_delay: PROFILE_SAVE_DELAY,
            location_timeout: LOCATION_TIMEOUT,
            auth_error_codes: DEFAULT_AUTH_ERROR_CODES
                .iter()
                .map(|c| c.to_string())
                .collect(),
            text: UiText::default(),
        }
    }

    /// Fail-fast validation, run before any network call.
    pub fn validate(&self) -> Result<()> {
        if self.app_id.trim().is_empty() {
            return Err(ClientError::Validation(
                "an app id is required to initialise the widget".into(),
            ));
        }
        reqwest::Url::parse(&self.base_url)
            .map_err(|e| ClientError::Validation(format!("invalid base url: {e}")))?;
        Ok(())
    }
}

/// Notification texts shown to the end user.
#[derive(Debug, Clone)]
pub struct UiText {
    pub invalid_file_error: String,
    pub location_services_denied: String,
    pub location_security_restriction: String,
    pub action_postback_error: String,
    pub connect_notification: String,
}

impl Default for UiText {
    fn default() -> Self {
        Self {
            invalid_file_error: "Only image files are supported.".into(),
            location_services_denied: "Location services are disabled. Enable them to share your location.".into(),
            location_security_restriction: "Sharing your location requires a secure connection.".into(),
            action_postback_error: "Your action could not be delivered. Try again.".into(),
            connect_notification: "Keep the conversation going by connecting another channel.".into(),
        }
    }
}
