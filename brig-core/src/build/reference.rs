//! Image reference validation for `--tag` values.

use crate::error::{BrigError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

const NAME_TOTAL_LENGTH_MAX: usize = 255;

static REFERENCE: Lazy<Regex> = Lazy::new(|| {
    let label = r"(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9])";
    let domain = format!(r"{label}(?:\.{label})*(?::[0-9]+)?");
    let component = r"[a-z0-9]+(?:(?:[._]|__|[-]*)[a-z0-9]+)*";
    let tag = r"[\w][\w.-]{0,127}";
    let digest = r"[A-Za-z][A-Za-z0-9]*(?:[-_+.][A-Za-z][A-Za-z0-9]*)*:[0-9a-fA-F]{32,}";
    let pattern = format!(
        r"^((?:{domain}/)?{component}(?:/{component})*)(?::({tag}))?(?:@({digest}))?$"
    );
    Regex::new(&pattern).expect("reference pattern is valid")
});

/// Validate an image reference used as a tag. Returns the reference unchanged.
pub fn validate_tag(tag: &str) -> Result<String> {
    let invalid =
        |reason: &str| BrigError::InvalidTag { tag: tag.to_string(), reason: reason.to_string() };

    if tag.is_empty() {
        return Err(invalid("repository name must have at least one component"));
    }
    let captures = match REFERENCE.captures(tag) {
        Some(captures) => captures,
        None => {
            if REFERENCE.is_match(&tag.to_lowercase()) {
                return Err(invalid("repository name must be lowercase"));
            }
            return Err(invalid("invalid reference format"));
        }
    };

    let name = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
    if name.len() > NAME_TOTAL_LENGTH_MAX {
        return Err(invalid("repository name must not be more than 255 characters"));
    }
    Ok(tag.to_string())
}
