use reqwest::Url;
use std::fmt;
use std::str::FromStr;

use crate::allocator::error::AllocationError;

/// Longest accepted caller-chosen code
pub const MAX_CUSTOM_CODE_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimMode {
    /// One caller-chosen code, never taken from the pool
    Custom,
    /// `count` codes from the pool
    Unique,
    /// Exactly one code from the pool
    Generic,
}

impl FromStr for ClaimMode {
    type Err = AllocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "custom" => Ok(ClaimMode::Custom),
            "unique" => Ok(ClaimMode::Unique),
            "generic" => Ok(ClaimMode::Generic),
            _ => Err(AllocationError::validation(
                "type must be one of custom, unique, generic",
            )),
        }
    }
}

impl fmt::Display for ClaimMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClaimMode::Custom => "custom",
            ClaimMode::Unique => "unique",
            ClaimMode::Generic => "generic",
        };
        f.write_str(name)
    }
}

/// A fully typed allocation request
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub mode: ClaimMode,
    pub count: u32,
    pub custom_code: Option<String>,
    pub destination: String,
    /// `created_by` tag for the bindings
    pub owner: String,
    pub campaign: String,
    pub sender_id: String,
    /// Falls back to the configured default when `None`
    pub domain: Option<String>,
    pub expiry_days: u32,
}

impl ClaimRequest {
    /// Check every input rule. Runs before any store access.
    ///
    /// Returns the destination in its normalized form, which is what gets stored.
    pub fn validate(&self, max_count: u32) -> Result<Url, AllocationError> {
        if self.count < 1 {
            return Err(AllocationError::validation("Count must be a valid number"));
        }
        if self.count > max_count {
            return Err(AllocationError::validation(format!(
                "Count must not exceed {max_count}"
            )));
        }
        if self.expiry_days < 1 {
            return Err(AllocationError::validation(
                "Expiry Time must be a valid number",
            ));
        }

        let destination = validate_destination(&self.destination)?;

        match self.mode {
            ClaimMode::Generic if self.count != 1 => {
                return Err(AllocationError::validation(
                    "Generic type can only have count = 1",
                ))
            }
            ClaimMode::Custom => match self.custom_code.as_deref() {
                None | Some("") => {
                    return Err(AllocationError::validation(
                        "Shortcode required for custom type",
                    ))
                }
                Some(code) => validate_custom_code(code)?,
            },
            _ => {}
        }

        Ok(destination)
    }
}

/// Absolute http(s) URL with a host.
///
/// Parsing strips tabs and line breaks, so only the returned form is safe to
/// put in a `Location` header.
pub fn validate_destination(destination: &str) -> Result<Url, AllocationError> {
    let invalid = || AllocationError::validation("Invalid mainUrl");

    let url = Url::parse(destination.trim()).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid());
    }
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(invalid()),
    }
}

/// Custom codes are resolved from the last path segment, so they cannot
/// contain anything that would split or end that segment.
pub fn validate_custom_code(code: &str) -> Result<(), AllocationError> {
    let len = code.chars().count();
    let bad_char = code
        .chars()
        .any(|c| matches!(c, '/' | '?' | '#') || c.is_whitespace());

    if len == 0 || len > MAX_CUSTOM_CODE_LEN || bad_char {
        return Err(AllocationError::validation(format!(
            "Shortcode must be 1-{MAX_CUSTOM_CODE_LEN} characters without '/', '?', '#' or spaces"
        )));
    }
    Ok(())
}
