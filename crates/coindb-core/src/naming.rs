//! Name validation for keychains, accounts and account bins.

use thiserror::Error;

/// Names starting with this character are reserved for internal use.
pub const RESERVED_PREFIX: char = '@';

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    #[error("Name must not be empty")]
    Empty,
    #[error("Name must not start with '{RESERVED_PREFIX}': {0}")]
    Reserved(String),
}

/// Reject empty names and names carrying the reserved prefix.
pub fn validate_name(name: &str) -> Result<(), NameError> {
    if name.is_empty() {
        return Err(NameError::Empty);
    }
    if name.starts_with(RESERVED_PREFIX) {
        return Err(NameError::Reserved(name.to_string()));
    }
    Ok(())
}
