use std::time::Duration;

/// Timeout for acquiring a device position before a location message is
/// marked as failed.
pub const LOCATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Save window for coalescing profile updates: the first update in a window
/// is written immediately, later ones are buffered until the window closes.
pub const PROFILE_SAVE_DELAY: Duration = Duration::from_millis(5000);

/// Minimum quiet time since the user's previous confirmed message before
/// the channel-linking notification is raised again.
pub const CONNECT_NOTIFICATION_DELAY_SECS: f64 = 120.0;

/// MIME types accepted for image upload.
pub const SUPPORTED_IMAGE_TYPES: &[&str] = &["image/jpeg", "image/png", "image/webp"];

/// Longest edge an uploaded image is resized down to before upload.
pub const IMAGE_MAX_EDGE: u32 = 1024;

/// JPEG quality used when re-encoding resized uploads.
pub const IMAGE_JPEG_QUALITY: u8 = 75;

/// Backend error codes treated as authentication failures by default.
pub const DEFAULT_AUTH_ERROR_CODES: &[&str] = &["unauthorized", "invalid_auth"];

/// Integration kinds an end user can link a conversation to.
pub const LINKABLE_CHANNEL_KINDS: &[&str] =
    &["messenger", "twilio", "telegram", "viber", "wechat", "line"];

/// Platform reported in the device info sent at login.
pub const DEVICE_PLATFORM: &str = "web";
