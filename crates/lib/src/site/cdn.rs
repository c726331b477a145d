//! CDN distribution and its behaviors.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::resource::{Resource, ResourceKind, Token};

/// Where a behavior sends requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Origin {
  Bucket { bucket_name: String },
  /// A server function, by logical id.
  Server { function: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Behavior {
  /// `None` for the default behavior.
  pub path_pattern: Option<String>,
  pub origin: Origin,
}

impl Behavior {
  pub fn default_to(origin: Origin) -> Self {
    Self {
      path_pattern: None,
      origin,
    }
  }

  pub fn is_default(&self) -> bool {
    self.path_pattern.is_none()
  }
}

/// Static sites serve everything from the bucket.
pub fn static_behaviors(bucket_name: &str) -> Vec<Behavior> {
  vec![Behavior::default_to(Origin::Bucket {
    bucket_name: bucket_name.to_string(),
  })]
}

/// SSR sites default to the server and serve every top-level client entry from
/// the bucket: `name/*` for directories, `name` for files.
pub fn ssr_behaviors(client_dir: &Path, bucket_name: &str, server_function: &str) -> io::Result<Vec<Behavior>> {
  let mut entries: Vec<(String, bool)> = fs::read_dir(client_dir)?
    .map(|entry| -> io::Result<(String, bool)> {
      let entry = entry?;
      Ok((entry.file_name().to_string_lossy().to_string(), entry.file_type()?.is_dir()))
    })
    .collect::<io::Result<_>>()?;
  entries.sort();

  let mut behaviors = vec![Behavior::default_to(Origin::Server {
    function: server_function.to_string(),
  })];
  behaviors.extend(entries.into_iter().map(|(name, is_dir)| Behavior {
    path_pattern: Some(if is_dir { format!("{name}/*") } else { name }),
    origin: Origin::Bucket {
      bucket_name: bucket_name.to_string(),
    },
  }));
  Ok(behaviors)
}

/// The distribution resource. Its `Url` attribute is the site url.
pub fn distribution(logical_id: &str, behaviors: &[Behavior]) -> Resource {
  Resource::new(logical_id, ResourceKind::Distribution, json!({ "behaviors": behaviors }))
}

pub fn url_token(distribution_id: &str) -> Token {
  Token::new(distribution_id, "Url")
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::write_tree;
  use tempfile::TempDir;

  #[test]
  fn static_site_has_only_a_default_behavior() {
    let behaviors = static_behaviors("site-bucket");
    assert_eq!(behaviors.len(), 1);
    assert!(behaviors[0].is_default());
  }

  #[test]
  fn ssr_client_entries_get_bucket_behaviors() {
    let temp = TempDir::new().unwrap();
    write_tree(
      temp.path(),
      &[("favicon.ico", "x"), ("_astro/app.js", "x"), ("images/logo.png", "x")],
    );

    let behaviors = ssr_behaviors(temp.path(), "site-bucket", "WebServer").unwrap();
    let patterns: Vec<_> = behaviors.iter().map(|b| b.path_pattern.as_deref()).collect();
    assert_eq!(patterns, vec![None, Some("_astro/*"), Some("favicon.ico"), Some("images/*")]);
    assert_eq!(
      behaviors[0].origin,
      Origin::Server {
        function: "WebServer".into()
      }
    );
  }

  #[test]
  fn distribution_serializes_behaviors() {
    let resource = distribution("WebDistribution", &static_behaviors("b"));
    assert_eq!(resource.kind, ResourceKind::Distribution);
    assert_eq!(resource.properties["behaviors"][0]["origin"]["type"], "bucket");
    assert_eq!(resource.properties["behaviors"][0]["origin"]["bucketName"], "b");
  }
}
