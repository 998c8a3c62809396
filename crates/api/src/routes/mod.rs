pub mod offers;
pub mod ops;
pub mod sessions;

use std::str::FromStr;

use crate::error::ApiError;

/// Parses a UUID-backed identifier from a path or body field.
pub(crate) fn parse_id<T>(value: &str, field: &str) -> Result<T, ApiError>
where
    T: FromStr<Err = uuid::Error>,
{
    value
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid {field}: {e}")))
}
