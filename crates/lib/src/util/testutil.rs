//! Test utilities for sitestack-lib.
//!
//! Cross-platform shell snippets for build commands, and helpers that lay out
//! fake site trees.

use std::fs;
use std::path::Path;

/// A command that writes the value of `var` into `file` in the working directory.
#[cfg(unix)]
pub fn write_env_to(var: &str, file: &str) -> String {
  format!("printf '%s' \"${var}\" > {file}")
}

#[cfg(windows)]
pub fn write_env_to(var: &str, file: &str) -> String {
  format!("echo %{var}%> {file}")
}

/// A command that exits with `code`.
pub fn exit_with(code: i32) -> String {
  format!("exit {code}")
}

/// A command that creates `file` (and its parent directories) with `content`.
#[cfg(unix)]
pub fn create_file(file: &str, content: &str) -> String {
  let dir = Path::new(file).parent().map(|p| p.to_string_lossy().to_string()).unwrap_or_default();
  if dir.is_empty() {
    format!("printf '%s' '{content}' > {file}")
  } else {
    format!("mkdir -p {dir} && printf '%s' '{content}' > {file}")
  }
}

#[cfg(windows)]
pub fn create_file(file: &str, content: &str) -> String {
  let file = file.replace('/', "\\");
  let dir = Path::new(&file).parent().map(|p| p.to_string_lossy().to_string()).unwrap_or_default();
  if dir.is_empty() {
    format!("echo {content}> {file}")
  } else {
    format!("mkdir {dir} 2>nul & echo {content}> {file}")
  }
}

/// Write `files` (relative path, content) under `root`.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
  for (relative, content) in files {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
  }
}
