use chrono::{DateTime, Utc};

use crate::db::models::LicenseKey;
use crate::store::{Store, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("Invalid key")]
    NotFound,
    #[error("Key expired")]
    Expired,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Look up a key by value and check it against `now`.
///
/// Always reads the store; a key edited or revoked a moment ago is seen as
/// such. The key's bound hardware id is not compared here.
pub fn validate_key(
    store: &dyn Store,
    value: &str,
    now: DateTime<Utc>,
) -> Result<LicenseKey, KeyError> {
    let key = store.find_key_by_value(value)?.ok_or(KeyError::NotFound)?;
    if key.is_expired(now) {
        return Err(KeyError::Expired);
    }
    Ok(key)
}
