// SPDX-License-Identifier: MIT OR Apache-2.0
//! Request validation for the provenance service's HTTP API.

/// Minimum accepted length for `/detect/text` submissions, in characters.
pub const MIN_TEXT_LENGTH: usize = 50;
/// Maximum accepted length for `/detect/text` submissions, in characters.
pub const MAX_TEXT_LENGTH: usize = 50_000;

/// Maximum accepted upload size for `/detect/image`, in bytes.
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;
/// Maximum accepted upload size for `/detect/audio`, in bytes.
pub const MAX_AUDIO_BYTES: usize = 25 * 1024 * 1024;
/// Maximum accepted upload size for `/detect/video`, in bytes.
pub const MAX_VIDEO_BYTES: usize = 150 * 1024 * 1024;

/// Maximum number of items accepted in one `/batch/text` submission.
pub const MAX_BATCH_ITEMS: usize = 50;

/// Validates incoming detection requests before they reach the Consensus
/// Engine.
pub struct RequestValidator;

impl RequestValidator {
    /// Validate a `/detect/text` submission's length, in characters.
    pub fn validate_text(text: &str) -> Result<(), String> {
        let len = text.chars().count();
        if len < MIN_TEXT_LENGTH {
            return Err(format!(
                "text must be at least {MIN_TEXT_LENGTH} characters, got {len}"
            ));
        }
        if len > MAX_TEXT_LENGTH {
            return Err(format!(
                "text must be at most {MAX_TEXT_LENGTH} characters, got {len}"
            ));
        }
        Ok(())
    }

    /// Validate a media upload's size against the limit for `modality`.
    pub fn validate_media_size(
        modality: veritas_core::ContentType,
        byte_len: usize,
    ) -> Result<(), String> {
        let limit = match modality {
            veritas_core::ContentType::Image => MAX_IMAGE_BYTES,
            veritas_core::ContentType::Audio => MAX_AUDIO_BYTES,
            veritas_core::ContentType::Video => MAX_VIDEO_BYTES,
            veritas_core::ContentType::Text => {
                return Err("text content is not a media upload".into());
            }
        };
        if byte_len == 0 {
            return Err("uploaded file must not be empty".into());
        }
        if byte_len > limit {
            return Err(format!(
                "{modality} upload exceeds the {limit}-byte limit ({byte_len} bytes submitted)"
            ));
        }
        Ok(())
    }

    /// Validate a `/batch/text` submission: a non-empty list of at most
    /// [`MAX_BATCH_ITEMS`] items, each itself a valid text submission.
    pub fn validate_batch_items(items: &[(String, String)]) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if items.is_empty() {
            errors.push("batch must contain at least one item".into());
        }
        if items.len() > MAX_BATCH_ITEMS {
            errors.push(format!(
                "batch exceeds the maximum of {MAX_BATCH_ITEMS} items, got {}",
                items.len()
            ));
        }
        for (item_id, text) in items {
            if item_id.trim().is_empty() {
                errors.push("item_id must not be empty".into());
                continue;
            }
            if let Err(e) = Self::validate_text(text) {
                errors.push(format!("item {item_id}: {e}"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate an `/analyze/dashboard` window, in days.
    pub fn validate_dashboard_days(days: u32) -> Result<(), String> {
        if !(1..=90).contains(&days) {
            return Err(format!("days must be between 1 and 90, got {days}"));
        }
        Ok(())
    }
}
