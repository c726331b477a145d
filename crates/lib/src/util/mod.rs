//! Shared utilities.
//!
//! Common utilities used across the crate including hashing and test helpers.

pub mod hash;

#[cfg(test)]
pub mod testutil;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Turn a construct id into a template-safe logical id (alphanumerics only).
pub(crate) fn logical_id(parts: &[&str]) -> String {
  parts
    .iter()
    .flat_map(|p| p.chars())
    .filter(|c| c.is_ascii_alphanumeric())
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn logical_id_strips_separators() {
    assert_eq!(logical_id(&["my-site", "Bucket"]), "mysiteBucket");
    assert_eq!(logical_id(&["Api", "GET /users"]), "ApiGETusers");
  }
}
