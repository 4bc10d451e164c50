//! Upload checks and download naming.

use crate::config::ConverterConfig;
use crate::error::ConversionError;
use chrono::Local;
use std::path::Path;

/// Refuse an upload before any conversion work is done.
///
/// The file name must be non-empty and carry one of the configured
/// extensions (compared case-insensitively), and the content must not
/// exceed the configured size.
pub fn check_upload(filename: &str, len: usize, config: &ConverterConfig) -> Result<(), ConversionError> {
    let reject = |reason: String| Err(ConversionError::UploadRejected { reason });

    if filename.trim().is_empty() {
        return reject("no file selected".to_string());
    }

    let extension = Path::new(filename)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()));
    if !extension.is_some_and(|ext| config.allowed_extensions.contains(&ext)) {
        return reject(format!(
            "unsupported file type; allowed: {}",
            config.allowed_extensions.join(", ")
        ));
    }

    if len > config.max_upload_bytes {
        return reject(format!(
            "file too large; maximum size is {}MB",
            config.max_upload_bytes / (1024 * 1024)
        ));
    }
    Ok(())
}

/// A download file name for a converted upload:
/// `<stem>_<suffix>_<YYYYmmdd_HHMMSS>_<id8>.html`.
///
/// `suffix` is omitted when empty, and only the first eight characters of
/// `id` are used.
pub fn download_name(original: &str, suffix: &str, id: &str) -> String {
    let stem = Path::new(original)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "report".to_string());
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let short_id: String = id.chars().take(8).collect();

    if suffix.is_empty() {
        format!("{stem}_{timestamp}_{short_id}.html")
    } else {
        format!("{stem}_{suffix}_{timestamp}_{short_id}.html")
    }
}
