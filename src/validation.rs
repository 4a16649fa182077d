use std::collections::HashSet;

use once_cell::sync::Lazy;
use url::Url;

use crate::error::ValidationError;

pub const MIN_DURATION_DAYS: i64 = 1;
pub const MAX_DURATION_DAYS: i64 = 90;
const MAX_PREFIX_LEN: usize = 10;

static IMAGE_CONTENT_TYPES: Lazy<HashSet<&str>> = Lazy::new(|| {
    ["image/png", "image/jpeg", "image/jpg", "image/gif", "image/webp"]
        .into_iter()
        .collect()
});

static IMAGE_EXTENSIONS: Lazy<HashSet<&str>> =
    Lazy::new(|| ["png", "jpg", "jpeg", "gif", "webp"].into_iter().collect());

pub fn validate_duration(days: i64) -> Result<i64, ValidationError> {
    if !(MIN_DURATION_DAYS..=MAX_DURATION_DAYS).contains(&days) {
        return Err(ValidationError::Duration(days));
    }

    Ok(days)
}

pub fn validate_prefix(prefix: &str) -> Result<&str, ValidationError> {
    if prefix.is_empty() {
        return Err(ValidationError::Prefix("the prefix cannot be empty".to_string()));
    }
    if prefix.chars().any(char::is_whitespace) {
        return Err(ValidationError::Prefix(
            "the prefix cannot contain spaces".to_string(),
        ));
    }
    if prefix.chars().count() > MAX_PREFIX_LEN {
        return Err(ValidationError::Prefix(format!(
            "the prefix is limited to {} characters",
            MAX_PREFIX_LEN
        )));
    }

    Ok(prefix)
}

/// Accepts an http(s) image attachment. The declared content type decides
/// when there is one, the URL's file extension otherwise.
pub fn validate_proof<'a>(
    url: &'a str,
    content_type: Option<&str>,
) -> Result<&'a str, ValidationError> {
    let parsed =
        Url::parse(url).map_err(|_| ValidationError::Proof("the link is not a valid URL".to_string()))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(ValidationError::Proof(
            "only http(s) links are accepted".to_string(),
        ));
    }

    let is_image = match content_type {
        Some(ct) => {
            let mime = ct.split(';').next().unwrap_or_default().trim().to_lowercase();
            IMAGE_CONTENT_TYPES.contains(mime.as_str())
        }
        None => parsed
            .path()
            .rsplit_once('.')
            .map(|(_, ext)| IMAGE_EXTENSIONS.contains(ext.to_lowercase().as_str()))
            .unwrap_or(false),
    };
    if !is_image {
        return Err(ValidationError::Proof(
            "accepted formats are png, jpg, jpeg, gif and webp".to_string(),
        ));
    }

    Ok(url)
}
