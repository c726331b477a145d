//! Site pipeline state and errors.

use std::fmt;
use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ConfigError;
use crate::site::cdn::Behavior;
use crate::site::state::StateError;
use crate::util::hash::DirHashError;

/// Where a site is in its pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteStage {
  #[default]
  Declared,
  Validated,
  Built,
  Packaged,
  Deployed,
  Invalidated,
  /// Not deployed in local mode; never builds or uploads.
  Placeholder,
}

impl fmt::Display for SiteStage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      SiteStage::Declared => "declared",
      SiteStage::Validated => "validated",
      SiteStage::Built => "built",
      SiteStage::Packaged => "packaged",
      SiteStage::Deployed => "deployed",
      SiteStage::Invalidated => "invalidated",
      SiteStage::Placeholder => "placeholder",
    };
    write!(f, "{s}")
  }
}

/// Whether the CDN cache is flushed for this deploy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationStatus {
  Requested,
  /// The build id matches the last deploy.
  Skipped,
}

/// Everything the pipeline recorded for one site.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SiteBuildState {
  pub stage: SiteStage,
  /// Directory uploaded to the site bucket.
  pub client_output: Option<PathBuf>,
  /// Server bundle, SSR sites only.
  pub server_output: Option<PathBuf>,
  pub parts: Vec<PathBuf>,
  pub filenames: Option<PathBuf>,
  pub behaviors: Vec<Behavior>,
  pub build_id: Option<String>,
  pub invalidation: Option<InvalidationStatus>,
}

/// An external build or archive step failed.
#[derive(Debug, Error)]
pub enum BuildToolError {
  #[error("command `{cmd}` exited with {}", exit_code(.code))]
  CommandFailed { cmd: String, code: Option<i32> },

  #[error("failed to start `{cmd}`: {source}")]
  Spawn {
    cmd: String,
    #[source]
    source: io::Error,
  },

  #[error("expected build output not found: {}", .path.display())]
  MissingOutput { path: PathBuf },

  #[error("failed to {context}: {source}")]
  Io {
    context: &'static str,
    #[source]
    source: io::Error,
  },

  #[error("failed to list build output: {0}")]
  List(#[from] DirHashError),

  #[error("failed to write archive: {0}")]
  Archive(#[from] zip::result::ZipError),
}

impl BuildToolError {
  pub(crate) fn io(context: &'static str) -> impl FnOnce(io::Error) -> BuildToolError {
    move |source| BuildToolError::Io { context, source }
  }
}

fn exit_code(code: &Option<i32>) -> String {
  match code {
    Some(code) => format!("code {code}"),
    None => "no exit code (terminated by signal)".to_string(),
  }
}

/// A site pipeline failure, naming the site.
#[derive(Debug, Error)]
pub enum SiteError {
  #[error("site \"{site}\": {source}")]
  Config {
    site: String,
    #[source]
    source: ConfigError,
  },

  #[error("site \"{site}\" failed to build: {source}")]
  Build {
    site: String,
    #[source]
    source: BuildToolError,
  },

  #[error("site \"{site}\": {context}: {source}")]
  Io {
    site: String,
    context: String,
    #[source]
    source: io::Error,
  },

  #[error("site \"{site}\": failed to hash output: {source}")]
  Hash {
    site: String,
    #[source]
    source: DirHashError,
  },

  #[error("site \"{site}\": {source}")]
  State {
    site: String,
    #[source]
    source: StateError,
  },
}

impl SiteError {
  pub fn site(&self) -> &str {
    match self {
      SiteError::Config { site, .. }
      | SiteError::Build { site, .. }
      | SiteError::Io { site, .. }
      | SiteError::Hash { site, .. }
      | SiteError::State { site, .. } => site,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn build_failure_names_site_and_command() {
    let err = SiteError::Build {
      site: "Web".into(),
      source: BuildToolError::CommandFailed {
        cmd: "npm run build".into(),
        code: Some(2),
      },
    };
    assert_eq!(err.to_string(), "site \"Web\" failed to build: command `npm run build` exited with code 2");
    assert_eq!(err.site(), "Web");
  }

  #[test]
  fn missing_output_is_distinct_from_exit_failure() {
    let missing = BuildToolError::MissingOutput {
      path: PathBuf::from("web/build/index.js"),
    };
    assert!(missing.to_string().contains("web/build/index.js"));
    assert!(!matches!(missing, BuildToolError::CommandFailed { .. }));
  }
}
