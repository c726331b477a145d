//! Hashing utilities for asset fingerprints and build identifiers.
//!
//! This module provides:
//! - `ContentHash`: a full 64-character SHA-256 hash
//! - `hash_file()`: single file hashing (asset fingerprints)
//! - `hash_bytes()`: arbitrary byte hashing
//! - `relative_files()`: the sorted relative file listing of a directory
//! - `relative_files_excluding()`: the same, minus one subtree
//! - `hash_listing()`: a hash over relative paths only, ignoring contents

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

/// A full 64-character SHA256 hash.
///
/// # Format
///
/// The hash is a lowercase hexadecimal string (64 characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Error during file or directory hashing.
#[derive(Debug, thiserror::Error)]
pub enum DirHashError {
  #[error("failed to walk directory: {message}")]
  WalkDir { message: String },

  #[error("failed to read file {path}: {message}")]
  ReadFile { path: String, message: String },
}

/// List every regular file under `root`, relative to it, sorted.
///
/// Paths always use `/` as separator so listings are stable across platforms.
pub fn relative_files(root: &Path) -> Result<Vec<String>, DirHashError> {
  relative_files_excluding(root, None)
}

/// Like [`relative_files`], skipping everything under `exclude`.
///
/// `exclude` must be spelled the way the walk reaches it (both canonical, for
/// instance) or nothing is skipped.
pub fn relative_files_excluding(root: &Path, exclude: Option<&Path>) -> Result<Vec<String>, DirHashError> {
  let mut files = Vec::new();

  let walk = WalkDir::new(root)
    .sort_by_file_name()
    .into_iter()
    .filter_entry(|entry| exclude.is_none_or(|skip| entry.path() != skip));
  for entry in walk {
    let entry = entry.map_err(|e| DirHashError::WalkDir { message: e.to_string() })?;
    if !entry.file_type().is_file() {
      continue;
    }

    let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
    let rel = rel
      .components()
      .map(|c| c.as_os_str().to_string_lossy())
      .collect::<Vec<_>>()
      .join("/");
    files.push(rel);
  }

  files.sort();
  Ok(files)
}

/// Hash the relative file listing of a directory.
///
/// Only paths contribute: two directories with the same file names hash the
/// same even when the contents differ.
pub fn hash_listing(root: &Path) -> Result<ContentHash, DirHashError> {
  let files = relative_files(root)?;

  let mut hasher = Sha256::new();
  for file in files {
    hasher.update(file.as_bytes());
    hasher.update(b"\n");
  }

  Ok(ContentHash(hex::encode(hasher.finalize())))
}

/// Hash an ordered sequence of hashes into one.
pub fn hash_hashes<'a>(hashes: impl IntoIterator<Item = &'a ContentHash>) -> ContentHash {
  let mut hasher = Sha256::new();
  for hash in hashes {
    hasher.update(hash.0.as_bytes());
  }
  ContentHash(hex::encode(hasher.finalize()))
}

/// Hash a file's contents.
///
/// Returns the full 64-character SHA256 hash of the file.
pub fn hash_file(path: &Path) -> Result<ContentHash, DirHashError> {
  let mut file = fs::File::open(path).map_err(|e| DirHashError::ReadFile {
    path: path.display().to_string(),
    message: e.to_string(),
  })?;

  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer).map_err(|e| DirHashError::ReadFile {
      path: path.display().to_string(),
      message: e.to_string(),
    })?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(ContentHash(hex::encode(hasher.finalize())))
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use tempfile::tempdir;

  #[test]
  fn excluded_subtree_is_not_listed() {
    let temp = tempdir().unwrap();
    fs::create_dir_all(temp.path().join("out/sites")).unwrap();
    fs::write(temp.path().join("index.html"), "x").unwrap();
    fs::write(temp.path().join("out/sites/state.json"), "{}").unwrap();
    fs::write(temp.path().join("outline.txt"), "x").unwrap();

    let out = temp.path().join("out");
    let files = relative_files_excluding(temp.path(), Some(&out)).unwrap();
    assert_eq!(files, vec!["index.html", "outline.txt"]);
  }

  #[test]
  fn relative_files_are_sorted_and_nested() {
    let temp = tempdir().unwrap();
    fs::create_dir_all(temp.path().join("b/c")).unwrap();
    fs::write(temp.path().join("z.txt"), "z").unwrap();
    fs::write(temp.path().join("b/c/d.txt"), "d").unwrap();
    fs::write(temp.path().join("a.txt"), "a").unwrap();

    let files = relative_files(temp.path()).unwrap();
    assert_eq!(files, vec!["a.txt", "b/c/d.txt", "z.txt"]);
  }

  #[test]
  fn listing_hash_ignores_contents() {
    let one = tempdir().unwrap();
    let two = tempdir().unwrap();
    fs::write(one.path().join("index.html"), "<h1>v1</h1>").unwrap();
    fs::write(two.path().join("index.html"), "<h1>v2</h1>").unwrap();

    assert_eq!(hash_listing(one.path()).unwrap(), hash_listing(two.path()).unwrap());
  }

  #[test]
  fn listing_hash_changes_with_new_file() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("index.html"), "x").unwrap();
    let before = hash_listing(temp.path()).unwrap();

    fs::write(temp.path().join("app.js"), "x").unwrap();
    assert_ne!(before, hash_listing(temp.path()).unwrap());
  }

  #[test]
  fn hash_of_hashes_depends_on_order() {
    let a = hash_bytes(b"a");
    let b = hash_bytes(b"b");
    assert_ne!(hash_hashes([&a, &b]), hash_hashes([&b, &a]));
  }

  #[test]
  fn hash_file_matches_hash_bytes() {
    let temp = tempdir().unwrap();
    let file_path = temp.path().join("test.txt");
    fs::write(&file_path, "hello world").unwrap();

    let hash = hash_file(&file_path).unwrap();
    assert_eq!(hash.0.len(), 64);
    assert_eq!(hash, hash_bytes(b"hello world"));
  }
}
