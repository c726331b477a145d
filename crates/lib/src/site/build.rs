//! Running external build tools.
//!
//! Build commands run through the platform shell in the site directory. Unlike
//! a sandboxed build they inherit the full process environment, with the site
//! environment layered on top, and their output goes straight to the console.

use std::collections::BTreeMap;
use std::path::Path;

use tokio::process::Command;
use tracing::{debug, info};

use crate::site::types::BuildToolError;

/// Run `cmd` through the shell in `cwd`, streaming its output.
pub async fn run_command(
  cmd: &str,
  cwd: &Path,
  env: &BTreeMap<String, String>,
  shell: Option<&str>,
) -> Result<(), BuildToolError> {
  info!(cmd = %cmd, cwd = %cwd.display(), "running build command");

  let (shell_cmd, shell_args) = get_shell(shell);
  let mut command = Command::new(&shell_cmd);
  command.args(&shell_args).arg(cmd).current_dir(cwd).envs(env);

  debug!(shell = %shell_cmd, env = env.len(), "spawning process");

  let status = command.status().await.map_err(|source| BuildToolError::Spawn {
    cmd: cmd.to_string(),
    source,
  })?;

  if !status.success() {
    return Err(BuildToolError::CommandFailed {
      cmd: cmd.to_string(),
      code: status.code(),
    });
  }
  Ok(())
}

/// Fail with `MissingOutput` unless `path` exists.
pub fn expect_output(path: &Path) -> Result<(), BuildToolError> {
  if path.exists() {
    Ok(())
  } else {
    Err(BuildToolError::MissingOutput {
      path: path.to_path_buf(),
    })
  }
}

/// Shell and flag used to pass a command string.
fn get_shell(override_shell: Option<&str>) -> (String, Vec<String>) {
  if let Some(shell) = override_shell {
    let args = if shell.contains("powershell") || shell.contains("pwsh") {
      vec!["-NoProfile".to_string(), "-Command".to_string()]
    } else if shell.contains("cmd") {
      vec!["/C".to_string()]
    } else {
      vec!["-c".to_string()]
    };
    return (shell.to_string(), args);
  }

  #[cfg(unix)]
  {
    ("/bin/sh".to_string(), vec!["-c".to_string()])
  }

  #[cfg(windows)]
  {
    ("cmd.exe".to_string(), vec!["/C".to_string()])
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::{exit_with, write_env_to};
  use tempfile::TempDir;

  #[tokio::test]
  async fn site_environment_reaches_the_command() {
    let temp = TempDir::new().unwrap();
    let env = BTreeMap::from([("SITE_STAGE".to_string(), "prod".to_string())]);

    run_command(&write_env_to("SITE_STAGE", "stage.txt"), temp.path(), &env, None)
      .await
      .unwrap();

    let written = std::fs::read_to_string(temp.path().join("stage.txt")).unwrap();
    assert_eq!(written.trim(), "prod");
  }

  #[tokio::test]
  async fn inherited_environment_is_kept() {
    let temp = TempDir::new().unwrap();
    run_command(&write_env_to("PATH", "path.txt"), temp.path(), &BTreeMap::new(), None)
      .await
      .unwrap();

    let written = std::fs::read_to_string(temp.path().join("path.txt")).unwrap();
    assert!(!written.trim().is_empty());
  }

  #[tokio::test]
  async fn nonzero_exit_is_command_failed() {
    let temp = TempDir::new().unwrap();
    let err = run_command(&exit_with(3), temp.path(), &BTreeMap::new(), None)
      .await
      .unwrap_err();
    assert!(matches!(err, BuildToolError::CommandFailed { code: Some(3), .. }));
  }

  #[test]
  fn missing_output_is_reported() {
    let temp = TempDir::new().unwrap();
    let err = expect_output(&temp.path().join("dist")).unwrap_err();
    assert!(matches!(err, BuildToolError::MissingOutput { .. }));
    expect_output(temp.path()).unwrap();
  }

  #[test]
  fn shell_override_picks_flag() {
    assert_eq!(get_shell(Some("/bin/bash")).1, vec!["-c"]);
    assert_eq!(get_shell(Some("pwsh")).1, vec!["-NoProfile", "-Command"]);
  }
}
