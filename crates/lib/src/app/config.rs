//! Application configuration.
//!
//! Values come from the `app` section of a manifest and can be overridden by
//! the `SITESTACK_STAGE` / `SITESTACK_MODE` environment variables.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::consts::{DEFAULT_OUT_DIR, MODE_ENV_VAR, STAGE_ENV_VAR};
use crate::error::ConfigError;

/// How the application is being built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppMode {
  /// Full build and deployment.
  #[default]
  Deploy,
  /// Local development: sites default to placeholders.
  Local,
  /// Like `Deploy`, with test-only overrides honoured.
  Test,
}

impl FromStr for AppMode {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "deploy" => Ok(AppMode::Deploy),
      "local" | "dev" => Ok(AppMode::Local),
      "test" => Ok(AppMode::Test),
      other => Err(ConfigError::InvalidMode(other.to_string())),
    }
  }
}

impl fmt::Display for AppMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      AppMode::Deploy => "deploy",
      AppMode::Local => "local",
      AppMode::Test => "test",
    };
    f.write_str(s)
  }
}

fn default_stage() -> String {
  "dev".to_string()
}

fn default_region() -> String {
  "us-east-1".to_string()
}

fn default_account() -> String {
  "000000000000".to_string()
}

fn default_out_dir() -> PathBuf {
  PathBuf::from(DEFAULT_OUT_DIR)
}

fn default_suppressed_events() -> Vec<String> {
  vec![crate::events::kind::ARCHIVE_PART.to_string()]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
  pub name: String,
  #[serde(default = "default_stage")]
  pub stage: String,
  #[serde(default = "default_region")]
  pub region: String,
  #[serde(default = "default_account")]
  pub account: String,
  #[serde(default)]
  pub mode: AppMode,
  /// Where archives, site state and templates are written.
  #[serde(default = "default_out_dir")]
  pub out_dir: PathBuf,
  /// Staging bucket receiving uploaded assets. Derived from name and stage when unset.
  #[serde(default)]
  pub asset_bucket: Option<String>,
  /// Event types that are delivered but not logged.
  #[serde(default = "default_suppressed_events")]
  pub suppressed_events: Vec<String>,
}

impl AppConfig {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      stage: default_stage(),
      region: default_region(),
      account: default_account(),
      mode: AppMode::default(),
      out_dir: default_out_dir(),
      asset_bucket: None,
      suppressed_events: default_suppressed_events(),
    }
  }

  pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
    self.stage = stage.into();
    self
  }

  pub fn with_mode(mut self, mode: AppMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn with_out_dir(mut self, out_dir: impl Into<PathBuf>) -> Self {
    self.out_dir = out_dir.into();
    self
  }

  /// Apply `SITESTACK_STAGE` and `SITESTACK_MODE` if set.
  pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
    if let Ok(stage) = std::env::var(STAGE_ENV_VAR)
      && !stage.is_empty()
    {
      debug!(stage = %stage, "stage overridden from environment");
      self.stage = stage;
    }
    if let Ok(mode) = std::env::var(MODE_ENV_VAR)
      && !mode.is_empty()
    {
      debug!(mode = %mode, "mode overridden from environment");
      self.mode = mode.parse()?;
    }
    Ok(())
  }

  /// `{stage}-{name}-{suffix}`, the physical naming scheme for everything the app creates.
  pub fn physical_name(&self, suffix: &str) -> String {
    format!("{}-{}-{}", self.stage, self.name, suffix)
  }

  pub fn asset_bucket(&self) -> String {
    self
      .asset_bucket
      .clone()
      .unwrap_or_else(|| self.physical_name("assets").to_lowercase())
  }

  /// Build an ARN for a regional service resource.
  pub fn arn(&self, service: &str, resource: &str) -> String {
    format!("arn:aws:{}:{}:{}:{}", service, self.region, self.account, resource)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;

  #[test]
  fn deserializes_with_defaults() {
    let config: AppConfig = serde_json::from_str(r#"{ "name": "shop" }"#).unwrap();
    assert_eq!(config.stage, "dev");
    assert_eq!(config.mode, AppMode::Deploy);
    assert_eq!(config.out_dir, PathBuf::from(".sitestack"));
    assert_eq!(config.suppressed_events, vec!["archive.part"]);
    assert_eq!(config.asset_bucket(), "dev-shop-assets");
  }

  #[test]
  fn mode_parses_aliases() {
    assert_eq!("dev".parse::<AppMode>().unwrap(), AppMode::Local);
    assert_eq!("test".parse::<AppMode>().unwrap(), AppMode::Test);
    assert!(matches!("prod".parse::<AppMode>(), Err(ConfigError::InvalidMode(_))));
  }

  #[test]
  #[serial]
  fn env_overrides_stage_and_mode() {
    temp_env::with_vars([(STAGE_ENV_VAR, Some("prod")), (MODE_ENV_VAR, Some("local"))], || {
      let mut config = AppConfig::new("shop");
      config.apply_env_overrides().unwrap();
      assert_eq!(config.stage, "prod");
      assert_eq!(config.mode, AppMode::Local);
    });
  }

  #[test]
  #[serial]
  fn invalid_env_mode_is_rejected() {
    temp_env::with_vars([(STAGE_ENV_VAR, None::<&str>), (MODE_ENV_VAR, Some("bogus"))], || {
      let mut config = AppConfig::new("shop");
      assert!(config.apply_env_overrides().is_err());
    });
  }

  #[test]
  fn arn_uses_region_and_account() {
    let config = AppConfig::new("shop");
    assert_eq!(config.arn("sqs", "dev-shop-jobs"), "arn:aws:sqs:us-east-1:000000000000:dev-shop-jobs");
  }
}
