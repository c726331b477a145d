//! Synthesized output handed to the provisioning backend.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Error;
use crate::stack::StackTemplate;

/// Every stack template of one app, dependencies first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assembly {
  pub app: String,
  pub stage: String,
  pub stacks: Vec<StackTemplate>,
}

impl Assembly {
  pub fn new(app: String, stage: String, stacks: Vec<StackTemplate>) -> Self {
    Self { app, stage, stacks }
  }

  pub fn stack(&self, name: &str) -> Option<&StackTemplate> {
    self.stacks.iter().find(|s| s.name == name)
  }

  pub fn resource_count(&self) -> usize {
    self.stacks.iter().map(|s| s.resources.len()).sum()
  }

  /// Write `{stack}.template.json` for every stack plus `manifest.json`
  /// listing them in deployment order. Returns the written template paths.
  pub fn write_to(&self, dir: &Path) -> Result<Vec<PathBuf>, Error> {
    fs::create_dir_all(dir)?;

    let mut written = Vec::with_capacity(self.stacks.len());
    for stack in &self.stacks {
      let path = dir.join(format!("{}.template.json", stack.name));
      fs::write(&path, serde_json::to_string_pretty(stack)?)?;
      written.push(path);
    }

    let order: Vec<&str> = self.stacks.iter().map(|s| s.name.as_str()).collect();
    let manifest = serde_json::json!({ "app": self.app, "stage": self.stage, "stacks": order });
    fs::write(dir.join("manifest.json"), serde_json::to_string_pretty(&manifest)?)?;

    info!(dir = %dir.display(), stacks = written.len(), "templates written");
    Ok(written)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::resource::{Resource, ResourceKind};
  use serde_json::json;
  use tempfile::TempDir;

  #[test]
  fn writes_one_template_per_stack_and_manifest() {
    let temp = TempDir::new().unwrap();
    let assembly = Assembly::new(
      "shop".into(),
      "dev".into(),
      vec![
        StackTemplate {
          name: "dev-shop-Data".into(),
          dependencies: vec![],
          resources: vec![Resource::new("Uploads", ResourceKind::Bucket, json!({}))],
        },
        StackTemplate {
          name: "dev-shop-Web".into(),
          dependencies: vec!["dev-shop-Data".into()],
          resources: vec![],
        },
      ],
    );

    let written = assembly.write_to(temp.path()).unwrap();
    assert_eq!(written.len(), 2);
    assert_eq!(assembly.resource_count(), 1);

    let manifest: serde_json::Value =
      serde_json::from_str(&fs::read_to_string(temp.path().join("manifest.json")).unwrap()).unwrap();
    assert_eq!(manifest["stacks"], json!(["dev-shop-Data", "dev-shop-Web"]));

    let data: StackTemplate = serde_json::from_str(&fs::read_to_string(&written[0]).unwrap()).unwrap();
    assert_eq!(data, assembly.stacks[0]);
  }
}
