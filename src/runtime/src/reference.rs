//! Image reference validation and normalization.
//!
//! References are checked against a conservative character allow-list and
//! get a default tag when none is given, so that an export only ever
//! covers a single image instead of every cached tag of a repository.

use packer_core::error::{PackerError, Result};

/// Default tag when none is specified.
pub const DEFAULT_TAG: &str = "latest";

/// A validated, tagged image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Reference exactly as the caller supplied it
    raw: String,
    /// Reference with the default tag applied
    normalized: String,
}

impl ImageReference {
    /// Validate and normalize a caller-supplied reference.
    ///
    /// - `nginx` → `nginx:latest`
    /// - `nginx:1.25` → `nginx:1.25`
    /// - `ghcr.io/org/image` → `ghcr.io/org/image:latest`
    /// - `localhost:5000/image` → unchanged (any `:` counts as a tag separator)
    pub fn parse(reference: &str) -> Result<Self> {
        if reference.is_empty() {
            return Err(PackerError::InvalidReference(
                "Empty image reference".to_string(),
            ));
        }

        if let Some(bad) = reference.chars().find(|c| !is_allowed_char(*c)) {
            return Err(PackerError::InvalidReference(format!(
                "Disallowed character {:?} in reference '{}'",
                bad, reference
            )));
        }

        let normalized = if reference.contains(':') {
            reference.to_string()
        } else {
            format!("{}:{}", reference, DEFAULT_TAG)
        };

        Ok(Self {
            raw: reference.to_string(),
            normalized,
        })
    }

    /// The tagged reference passed to the daemon.
    pub fn as_str(&self) -> &str {
        &self.normalized
    }

    /// Whether the default tag was appended.
    pub fn tag_defaulted(&self) -> bool {
        self.raw != self.normalized
    }

    /// Filesystem-safe token: every non-alphanumeric character becomes `_`.
    pub fn safe_name(&self) -> String {
        self.normalized
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.normalized)
    }
}

/// Characters accepted in an image reference.
pub fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':' | '/')
}
