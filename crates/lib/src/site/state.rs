//! Deploy state persistence for sites.
//!
//! After a site is packaged, its build id is persisted so the next build can
//! tell whether the CDN cache needs flushing.
//!
//! # Storage Layout
//!
//! ```text
//! {out_dir}/sites/{stack}-{site}/
//! └── state.json
//! ```
//!
//! # Example State File
//!
//! ```json
//! {
//!   "buildId": "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08",
//!   "invalidation": "requested"
//! }
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::site::types::InvalidationStatus;

const STATE_FILENAME: &str = "state.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteDeployState {
  pub build_id: String,
  pub invalidation: InvalidationStatus,
}

#[derive(Debug, Error)]
pub enum StateError {
  #[error("failed to read site state: {0}")]
  Read(#[source] io::Error),

  #[error("failed to write site state: {0}")]
  Write(#[source] io::Error),

  #[error("failed to create site state directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("failed to parse site state: {0}")]
  Parse(#[source] serde_json::Error),

  #[error("failed to serialize site state: {0}")]
  Serialize(#[source] serde_json::Error),
}

pub fn state_path(dir: &Path) -> PathBuf {
  dir.join(STATE_FILENAME)
}

/// Write the state atomically: temp file, then rename.
pub fn save_state(dir: &Path, state: &SiteDeployState) -> Result<(), StateError> {
  let path = state_path(dir);
  fs::create_dir_all(dir).map_err(StateError::CreateDir)?;

  let content = serde_json::to_string_pretty(state).map_err(StateError::Serialize)?;
  let temp_path = dir.join("state.json.tmp");
  fs::write(&temp_path, &content).map_err(StateError::Write)?;
  fs::rename(&temp_path, &path).map_err(StateError::Write)?;

  info!(path = %path.display(), build_id = %state.build_id, "site state saved");
  Ok(())
}

/// `Ok(None)` when the site was never deployed from this directory.
pub fn load_state(dir: &Path) -> Result<Option<SiteDeployState>, StateError> {
  let path = state_path(dir);
  if !path.exists() {
    debug!(path = %path.display(), "no site state");
    return Ok(None);
  }

  let content = fs::read_to_string(&path).map_err(StateError::Read)?;
  let state = serde_json::from_str(&content).map_err(StateError::Parse)?;
  Ok(Some(state))
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn save_then_load() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("sites").join("dev-shop-Web-Site");
    let state = SiteDeployState {
      build_id: "abc".into(),
      invalidation: InvalidationStatus::Requested,
    };

    save_state(&dir, &state).unwrap();
    assert_eq!(load_state(&dir).unwrap(), Some(state));
    assert!(!dir.join("state.json.tmp").exists());
  }

  #[test]
  fn missing_state_is_none() {
    let temp = TempDir::new().unwrap();
    assert_eq!(load_state(temp.path()).unwrap(), None);
  }

  #[test]
  fn corrupt_state_is_a_parse_error() {
    let temp = TempDir::new().unwrap();
    fs::write(state_path(temp.path()), "not json").unwrap();
    assert!(matches!(load_state(temp.path()), Err(StateError::Parse(_))));
  }

  #[test]
  fn serialized_field_names() {
    let json = serde_json::to_value(SiteDeployState {
      build_id: "abc".into(),
      invalidation: InvalidationStatus::Skipped,
    })
    .unwrap();
    assert_eq!(json, serde_json::json!({ "buildId": "abc", "invalidation": "skipped" }));
  }
}
