//! Input validation for crate names, versions, and storage paths.
//!
//! Everything that arrives over the wire (crate names from index paths,
//! versions from download URLs, metadata from publish payloads) passes
//! through here before it is used to touch the store or the filesystem.

use std::path::{Component, Path, PathBuf};

/// Maximum crate name length accepted by the registry.
pub const MAX_CRATE_NAME_LENGTH: usize = 64;

/// Maximum version string length.
pub const MAX_VERSION_LENGTH: usize = 64;

/// Maximum depth of a relative storage path.
pub const MAX_PATH_DEPTH: usize = 10;

/// Validation failure reasons.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ValidationError {
    #[error("value is empty")]
    Empty,

    #[error("value too long: {actual} characters (max: {max})")]
    TooLong { actual: usize, max: usize },

    #[error("invalid character '{0}'")]
    InvalidCharacter(char),

    #[error("name must start with an alphabetic character")]
    InvalidStart,

    #[error("path escapes the storage root")]
    PathTraversal,

    #[error("path too deep: {actual} components (max: {max})")]
    PathTooDeep { actual: usize, max: usize },
}

/// Convenient result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validate a crate name against the registry naming rules.
///
/// Names are limited to ASCII alphanumerics, `-` and `_`, must start with
/// an alphabetic character, and are capped at [`MAX_CRATE_NAME_LENGTH`].
/// Returns the name unchanged; callers that need the index's case-folded
/// form lowercase it themselves.
pub fn validate_crate_name(name: &str) -> ValidationResult<&str> {
    if name.is_empty() {
        return Err(ValidationError::Empty);
    }
    if name.len() > MAX_CRATE_NAME_LENGTH {
        return Err(ValidationError::TooLong {
            actual: name.len(),
            max: MAX_CRATE_NAME_LENGTH,
        });
    }
    let first = name.chars().next().ok_or(ValidationError::Empty)?;
    if !first.is_ascii_alphabetic() {
        return Err(ValidationError::InvalidStart);
    }
    for c in name.chars() {
        if !(c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(ValidationError::InvalidCharacter(c));
        }
    }
    Ok(name)
}

/// Validate a version string.
///
/// Accepts the characters a semantic version can contain (digits, letters,
/// `.`, `-`, `+`). Full semver parsing is not required here; the index
/// stores versions as opaque strings.
pub fn validate_version(version: &str) -> ValidationResult<&str> {
    if version.is_empty() {
        return Err(ValidationError::Empty);
    }
    if version.len() > MAX_VERSION_LENGTH {
        return Err(ValidationError::TooLong {
            actual: version.len(),
            max: MAX_VERSION_LENGTH,
        });
    }
    for c in version.chars() {
        if !(c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '+') {
            return Err(ValidationError::InvalidCharacter(c));
        }
    }
    Ok(version)
}

/// Validate a relative storage path.
///
/// Rejects absolute paths, parent-directory components, and excessive
/// depth so a constructed path can never escape the storage root.
pub fn validate_safe_path<P: AsRef<Path>>(path: P) -> ValidationResult<PathBuf> {
    let path = path.as_ref();
    let mut depth = 0usize;

    for component in path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ValidationError::PathTraversal)
            }
        }
    }

    if depth == 0 {
        return Err(ValidationError::Empty);
    }
    if depth > MAX_PATH_DEPTH {
        return Err(ValidationError::PathTooDeep {
            actual: depth,
            max: MAX_PATH_DEPTH,
        });
    }

    Ok(path.to_path_buf())
}
