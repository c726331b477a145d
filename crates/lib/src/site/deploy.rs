//! Upload resources for packaged site output.
//!
//! Archive parts are uploaded as assets to the app's asset bucket. A per-stack
//! upload handler unpacks them into the site bucket when the backend runs the
//! uploader custom resource, applying cache headers per file group and
//! replacing `{{ KEY }}` tokens in text files with resolved values.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use glob::Pattern;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::bind::ValueDescriptor;
use crate::consts::{CACHE_CONTROL_UNVERSIONED, CACHE_CONTROL_VERSIONED};
use crate::constructs::{Function, FunctionProps};
use crate::error::ConfigError;
use crate::permission::{PermissionEntry, Permissions, PolicyStatement};
use crate::placeholder;
use crate::resource::{CustomResource, Resource, ResourceKind, Token};
use crate::stack::Stack;
use crate::util::hash::{ContentHash, DirHashError, hash_file};

const UPLOAD_HANDLER_ID: &str = "SiteUploadHandler";

/// Text files that get `{{ KEY }}` replacement at deploy time.
pub const REPLACE_GLOBS: &[&str] = &["*.html", "*.js", "*.json"];

/// Extensions treated as fingerprinted in plain static sites.
const STATIC_VERSIONED: &[&str] = &["*.js", "*.css"];

fn glob_matches(pattern: &str, path: &str) -> bool {
  Pattern::new(pattern).map(|p| p.matches(path)).unwrap_or(false)
}

/// Cache policy for a group of files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOption {
  pub include: Vec<String>,
  pub exclude: Vec<String>,
  pub cache_control: String,
}

impl FileOption {
  pub fn matches(&self, path: &str) -> bool {
    self.include.iter().any(|p| glob_matches(p, path)) && !self.exclude.iter().any(|p| glob_matches(p, path))
  }
}

/// How fingerprinted files are recognized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Versioning {
  /// By extension, for plain static sites.
  Extensions,
  /// Everything under a build-tool output directory, e.g. `_astro`.
  Directory(String),
}

/// Versioned files get long-lived immutable caching; everything else is cached
/// at the CDN only and revalidated.
pub fn file_options(versioning: &Versioning) -> Vec<FileOption> {
  let versioned: Vec<String> = match versioning {
    Versioning::Extensions => STATIC_VERSIONED.iter().map(|s| s.to_string()).collect(),
    Versioning::Directory(dir) => vec![format!("{dir}/*")],
  };
  vec![
    FileOption {
      include: vec!["*".to_string()],
      exclude: versioned.clone(),
      cache_control: CACHE_CONTROL_UNVERSIONED.to_string(),
    },
    FileOption {
      include: versioned,
      exclude: Vec::new(),
      cache_control: CACHE_CONTROL_VERSIONED.to_string(),
    },
  ]
}

/// The cache policy for `path`; later options win.
pub fn cache_control_for<'a>(options: &'a [FileOption], path: &str) -> Option<&'a str> {
  options
    .iter()
    .rev()
    .find(|o| o.matches(path))
    .map(|o| o.cache_control.as_str())
}

/// Replace the `{{ key }}` token (`search`) with the resolved `replace` value
/// in files matching `files`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceValue {
  pub files: String,
  pub key: String,
  pub search: String,
  pub replace: ValueDescriptor,
}

impl ReplaceValue {
  pub fn applies_to(&self, path: &str) -> bool {
    glob_matches(&self.files, path)
  }

  /// Tokens are matched the way the build wrote them, with or without the
  /// inner spaces. Other `{{ ... }}` text is left alone.
  pub fn apply(&self, content: &str, resolved: &str) -> String {
    let values = BTreeMap::from([(self.key.clone(), resolved.to_string())]);
    placeholder::substitute_known(content, &values)
  }

  pub fn to_json(&self) -> Value {
    json!({ "files": self.files, "search": self.search, "replace": self.replace.to_json() })
  }
}

/// One descriptor per deferred environment value and text file glob.
pub fn replace_values(environment: &BTreeMap<String, ValueDescriptor>) -> Vec<ReplaceValue> {
  environment
    .iter()
    .filter(|(_, value)| value.is_deferred())
    .flat_map(|(key, value)| {
      REPLACE_GLOBS.iter().map(move |files| ReplaceValue {
        files: files.to_string(),
        key: key.clone(),
        search: placeholder::token(key),
        replace: value.clone(),
      })
    })
    .collect()
}

/// A local file uploaded to the asset bucket under a content-addressed key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
  pub logical_id: String,
  pub path: PathBuf,
  pub hash: ContentHash,
  pub bucket: String,
  pub key: String,
}

impl Asset {
  pub fn from_file(logical_id: impl Into<String>, path: &Path, bucket: &str) -> Result<Self, DirHashError> {
    let hash = hash_file(path)?;
    let key = match path.extension().and_then(|e| e.to_str()) {
      Some(ext) => format!("assets/{hash}.{ext}"),
      None => format!("assets/{hash}"),
    };
    Ok(Self {
      logical_id: logical_id.into(),
      path: path.to_path_buf(),
      hash,
      bucket: bucket.to_string(),
      key,
    })
  }

  pub fn object_arn(&self) -> String {
    format!("arn:aws:s3:::{}/{}", self.bucket, self.key)
  }

  pub fn source(&self) -> Value {
    json!({ "bucketName": self.bucket, "objectKey": self.key })
  }

  pub fn to_resource(&self) -> Resource {
    Resource::new(
      self.logical_id.clone(),
      ResourceKind::Asset,
      json!({
        "path": self.path.display().to_string(),
        "hash": self.hash.0,
        "bucketName": self.bucket,
        "objectKey": self.key,
      }),
    )
  }
}

/// The stack's upload handler, created on first use.
pub fn upload_handler(stack: &Stack) -> Result<Function, ConfigError> {
  stack.shared(UPLOAD_HANDLER_ID, || {
    Function::new(
      stack,
      UPLOAD_HANDLER_ID,
      FunctionProps {
        memory_mb: Some(1024),
        timeout_secs: Some(180),
        ..FunctionProps::handler("sitestack/upload.handler")
      },
    )
  })
}

/// Let the upload handler read every asset and the filename manifest.
pub fn grant_asset_reads(handler: &Function, assets: &[&Asset]) -> Result<(), ConfigError> {
  let entries = assets
    .iter()
    .map(|asset| PermissionEntry::Statement(PolicyStatement::new(["s3:GetObject"], [asset.object_arn()])))
    .collect();
  handler.attach_permissions(&Permissions::List(entries))
}

/// Everything the uploader custom resource needs.
pub struct UploadRequest<'a> {
  pub assets: &'a [Asset],
  pub filenames: Option<&'a Asset>,
  pub destination_bucket: &'a str,
  pub file_options: &'a [FileOption],
  pub replace_values: &'a [ReplaceValue],
}

/// The uploader custom resource. Its version is derived from the asset hashes
/// so unchanged output is not uploaded again.
pub fn uploader(handler: &Function, request: &UploadRequest<'_>, version: &str) -> CustomResource {
  let sources: Vec<Value> = request.assets.iter().map(Asset::source).collect();
  let replace_values: Vec<Value> = request.replace_values.iter().map(ReplaceValue::to_json).collect();

  CustomResource::new(Token::new(handler.logical_id(), "Arn"), version)
    .with_property("sources", json!(sources))
    .with_property("destinationBucketName", json!(request.destination_bucket))
    .with_property("filenames", request.filenames.map(Asset::source).unwrap_or(Value::Null))
    .with_property("fileOptions", json!(request.file_options))
    .with_property("replaceValues", json!(replace_values))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::app::AppConfig;
  use crate::events::EventBus;
  use crate::stack::StackProps;
  use crate::tasks::TaskQueue;
  use std::sync::Arc;
  use tempfile::TempDir;

  fn stack() -> Stack {
    Stack::new(
      "Web",
      StackProps::default(),
      Arc::new(AppConfig::new("shop")),
      EventBus::default(),
      TaskQueue::new(),
    )
  }

  #[test]
  fn static_cache_policy_by_extension() {
    let options = file_options(&Versioning::Extensions);
    assert_eq!(cache_control_for(&options, "index.html"), Some(CACHE_CONTROL_UNVERSIONED));
    assert_eq!(cache_control_for(&options, "assets/app.js"), Some(CACHE_CONTROL_VERSIONED));
    assert_eq!(cache_control_for(&options, "style.css"), Some(CACHE_CONTROL_VERSIONED));
  }

  #[test]
  fn ssr_cache_policy_by_directory() {
    let options = file_options(&Versioning::Directory("_astro".into()));
    assert_eq!(cache_control_for(&options, "_astro/index.a1b2.js"), Some(CACHE_CONTROL_VERSIONED));
    assert_eq!(cache_control_for(&options, "favicon.svg"), Some(CACHE_CONTROL_UNVERSIONED));
    assert_eq!(cache_control_for(&options, "scripts/app.js"), Some(CACHE_CONTROL_UNVERSIONED));
  }

  #[test]
  fn replace_values_cover_text_files_for_deferred_values() {
    let env = BTreeMap::from([
      ("STAGE".to_string(), ValueDescriptor::plain("dev")),
      ("API_URL".to_string(), ValueDescriptor::Deferred(Token::new("Api", "Url"))),
    ]);
    let values = replace_values(&env);
    assert_eq!(values.len(), 3);
    assert!(values.iter().all(|v| v.search == "{{ API_URL }}"));

    let js = values.iter().find(|v| v.applies_to("assets/app.js")).unwrap();
    assert_eq!(
      js.apply("fetch(\"{{ API_URL }}/items\")", "https://api.example.com"),
      "fetch(\"https://api.example.com/items\")"
    );
    assert!(!values.iter().any(|v| v.applies_to("logo.png")));
  }

  #[test]
  fn replacement_accepts_tight_tokens_and_skips_other_braces() {
    let env = BTreeMap::from([("API_URL".to_string(), ValueDescriptor::Deferred(Token::new("Api", "Url")))]);
    let html = replace_values(&env).into_iter().find(|v| v.applies_to("index.html")).unwrap();
    assert_eq!(
      html.apply("<a href=\"{{API_URL}}\">{{ user.name }} {{ STAGE }}</a>", "https://api.example.com"),
      "<a href=\"https://api.example.com\">{{ user.name }} {{ STAGE }}</a>"
    );
  }

  #[test]
  fn upload_handler_is_created_once_per_stack() {
    let stack = stack();
    let first = upload_handler(&stack).unwrap();
    let second = upload_handler(&stack).unwrap();
    assert_eq!(first.logical_id(), second.logical_id());
    assert_eq!(stack.template().resources.len(), 1);
  }

  #[test]
  fn handler_can_read_every_asset() {
    let temp = TempDir::new().unwrap();
    let part = temp.path().join("part0.zip");
    std::fs::write(&part, b"zip").unwrap();
    let asset = Asset::from_file("WebPart0", &part, "assets-bucket").unwrap();
    assert!(asset.key.starts_with("assets/") && asset.key.ends_with(".zip"));

    let handler = upload_handler(&stack()).unwrap();
    grant_asset_reads(&handler, &[&asset]).unwrap();
    let role = handler.role();
    assert_eq!(role.statements[0].actions, vec!["s3:GetObject"]);
    assert_eq!(role.statements[0].resources, vec![asset.object_arn()]);

    let request = UploadRequest {
      assets: std::slice::from_ref(&asset),
      filenames: None,
      destination_bucket: "site-bucket",
      file_options: &file_options(&Versioning::Extensions),
      replace_values: &[],
    };
    let custom = uploader(&handler, &request, "v1");
    assert_eq!(custom.version(), Some("v1"));
    assert_eq!(custom.properties["sources"][0]["objectKey"], asset.key.as_str());
  }
}
