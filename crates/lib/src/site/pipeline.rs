//! The deferred half of a site: build, package, deploy and invalidate.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;
use tracing::{info, warn};

use crate::app::AppMode;
use crate::consts::{DEFAULT_BUILD_COMMAND, DEFAULT_PART_SIZE_BYTES};
use crate::events::kind;
use crate::placeholder;
use crate::site::build::{expect_output, run_command};
use crate::site::deploy::{self, Asset, UploadRequest, Versioning};
use crate::site::invalidate;
use crate::site::state::{self, SiteDeployState};
use crate::site::types::{BuildToolError, SiteBuildState, SiteError, SiteStage};
use crate::site::{Site, SiteKind, cdn};
use crate::util::hash::{ContentHash, hash_hashes, relative_files_excluding};
use crate::util::{lock, logical_id};

const FILENAMES_FILE: &str = "filenames";

struct Outputs {
  client: PathBuf,
  server: Option<PathBuf>,
}

struct Package {
  work_dir: PathBuf,
  parts: Vec<Asset>,
  filenames: Option<Asset>,
}

impl Package {
  fn assets(&self) -> impl Iterator<Item = &Asset> {
    self.parts.iter().chain(self.filenames.as_ref())
  }
}

impl Site {
  /// Run the remaining pipeline stages. Placeholders return immediately.
  pub async fn materialize(&self) -> Result<(), SiteError> {
    if self.is_placeholder() {
      return Ok(());
    }
    let events = self.inner.stack.events();
    events.publish(kind::BUILD_START, json!({ "site": self.id(), "stack": self.inner.stack.name() }));

    let outputs = self.build().await?;
    let package = self.package(&outputs).await?;
    let distribution = self.deploy(&outputs, &package)?;
    let build_id = self.invalidate(&outputs, &package, &distribution)?;

    events.publish(kind::BUILD_END, json!({ "site": self.id(), "buildId": build_id }));
    events.publish(kind::SITE_DEPLOYED, json!({ "site": self.id(), "url": self.url().to_json() }));
    Ok(())
  }

  async fn build(&self) -> Result<Outputs, SiteError> {
    let props = &self.inner.props;
    let root = self.root()?;

    let command = match (&props.kind, &props.build_command) {
      (_, Some(cmd)) => Some(cmd.as_str()),
      (SiteKind::Ssr { .. }, None) => Some(DEFAULT_BUILD_COMMAND),
      (SiteKind::Static { .. }, None) => None,
    };
    if let Some(cmd) = command {
      let env = placeholder::build_environment(&props.environment);
      run_command(cmd, &root, &env, None).await.map_err(|e| self.build_error(e))?;
    }

    let outputs = match &props.kind {
      SiteKind::Static { build_output } => Outputs {
        client: build_output.as_ref().map_or_else(|| root.clone(), |out| root.join(out)),
        server: None,
      },
      SiteKind::Ssr { framework } => Outputs {
        client: root.join(framework.client_output()),
        server: Some(root.join(framework.server_output())),
      },
    };
    expect_output(&outputs.client).map_err(|e| self.build_error(e))?;
    if let Some(server) = &outputs.server {
      expect_output(server).map_err(|e| self.build_error(e))?;
    }

    self.advance(SiteStage::Built, |state| {
      state.client_output = Some(outputs.client.clone());
      state.server_output = outputs.server.clone();
    });
    Ok(outputs)
  }

  async fn package(&self, outputs: &Outputs) -> Result<Package, SiteError> {
    let stack = &self.inner.stack;
    let config = stack.config();
    let props = &self.inner.props;

    // Canonical like the site path, so a nested out dir is recognised below
    fs::create_dir_all(&config.out_dir).map_err(|e| self.io_error("create output directory", e))?;
    let out_dir = dunce::canonicalize(&config.out_dir).map_err(|e| self.io_error("resolve output directory", e))?;
    let work_dir = out_dir.join("sites").join(format!("{}-{}", stack.name(), self.id()));
    let parts_dir = work_dir.join("parts");
    if parts_dir.exists() {
      fs::remove_dir_all(&parts_dir).map_err(|e| self.io_error("clear previous parts", e))?;
    }

    let part_size = match (config.mode, props.part_size_bytes) {
      (AppMode::Test, Some(size)) => size,
      (_, Some(_)) => {
        warn!(site = %self.id(), "part size override is only honoured in test mode");
        DEFAULT_PART_SIZE_BYTES
      }
      (_, None) => DEFAULT_PART_SIZE_BYTES,
    };

    let paths = props
      .archiver
      .archive(&outputs.client, &parts_dir, Some(&out_dir), part_size)
      .await
      .map_err(|e| self.build_error(e))?;

    let bucket = config.asset_bucket();
    let mut parts = Vec::with_capacity(paths.len());
    for (index, path) in paths.iter().enumerate() {
      stack.events().publish(
        kind::ARCHIVE_PART,
        json!({ "site": self.id(), "index": index, "path": path.display().to_string() }),
      );
      let asset = Asset::from_file(logical_id(&[self.id(), "Part", &index.to_string()]), path, &bucket)
        .map_err(|source| self.hash_error(source))?;
      stack.add_resource(asset.to_resource());
      parts.push(asset);
    }

    let filenames = if props.purge_files {
      let path = work_dir.join(FILENAMES_FILE);
      write_filenames(&outputs.client, &out_dir, &path).map_err(|e| match e {
        FilenamesError::List(source) => self.hash_error(source),
        FilenamesError::Write(source) => self.io_error("write filename manifest", source),
      })?;
      let asset = Asset::from_file(logical_id(&[self.id(), "Filenames"]), &path, &bucket)
        .map_err(|source| self.hash_error(source))?;
      stack.add_resource(asset.to_resource());
      Some(asset)
    } else {
      None
    };

    self.advance(SiteStage::Packaged, |state| {
      state.parts = paths.clone();
      state.filenames = filenames.as_ref().map(|f| f.path.clone());
    });
    Ok(Package {
      work_dir,
      parts,
      filenames,
    })
  }

  /// Returns the distribution's logical id.
  fn deploy(&self, outputs: &Outputs, package: &Package) -> Result<String, SiteError> {
    let stack = &self.inner.stack;
    let props = &self.inner.props;
    let config_error = |source| SiteError::Config {
      site: self.id().to_string(),
      source,
    };

    let handler = deploy::upload_handler(stack).map_err(config_error)?;
    let assets: Vec<&Asset> = package.assets().collect();
    deploy::grant_asset_reads(&handler, &assets).map_err(config_error)?;

    let versioning = match props.kind {
      SiteKind::Static { .. } => Versioning::Extensions,
      SiteKind::Ssr { framework } => Versioning::Directory(framework.versioned_dir().to_string()),
    };
    let bucket_name = self.bucket().map(|b| b.bucket_name().to_string()).unwrap_or_default();
    let file_options = deploy::file_options(&versioning);
    let replace_values = deploy::replace_values(&props.environment);
    let version = hash_hashes(assets.iter().copied().map(|a| &a.hash));

    let request = UploadRequest {
      assets: &package.parts,
      filenames: package.filenames.as_ref(),
      destination_bucket: &bucket_name,
      file_options: &file_options,
      replace_values: &replace_values,
    };
    let uploader_id = format!("{}Uploader", self.inner.logical_id);
    let uploader = assets.iter().fold(
      deploy::uploader(&handler, &request, &version.0).into_resource(uploader_id.clone()),
      |resource, asset| resource.with_depends_on(asset.logical_id.clone()),
    );
    stack.add_resource(uploader);

    let behaviors = match (&outputs.server, self.server_function()) {
      (Some(server), Some(function)) => {
        function.set_code(json!({ "path": server.display().to_string() }));
        cdn::ssr_behaviors(&outputs.client, &bucket_name, function.logical_id())
          .map_err(|e| self.io_error("list client output", e))?
      }
      _ => cdn::static_behaviors(&bucket_name),
    };

    let distribution_id = self.distribution_id();
    stack.add_resource(cdn::distribution(&distribution_id, &behaviors).with_depends_on(uploader_id));

    self.advance(SiteStage::Deployed, |state| state.behaviors = behaviors.clone());
    Ok(distribution_id)
  }

  /// Returns the build id.
  fn invalidate(&self, outputs: &Outputs, package: &Package, distribution: &str) -> Result<String, SiteError> {
    let stack = &self.inner.stack;
    let build_id = match self.inner.props.kind {
      SiteKind::Static { .. } => {
        let hashes: Vec<ContentHash> = package.parts.iter().map(|a| a.hash.clone()).collect();
        invalidate::build_id_from_assets(&hashes)
      }
      SiteKind::Ssr { .. } => {
        invalidate::build_id_from_listing(&outputs.client).map_err(|source| self.hash_error(source))?
      }
    };

    let previous = state::load_state(&package.work_dir).map_err(|source| self.state_error(source))?;
    let status = invalidate::decide(previous.as_ref().map(|s| s.build_id.as_str()), &build_id.0);
    info!(site = %self.id(), build_id = %build_id, status = ?status, "invalidation decided");

    let handler = invalidate::invalidation_handler(stack).map_err(|source| SiteError::Config {
      site: self.id().to_string(),
      source,
    })?;
    stack.add_resource(
      invalidate::invalidation(&handler, distribution, &build_id.0)
        .into_resource(format!("{}Invalidation", self.inner.logical_id))
        .with_depends_on(distribution),
    );

    state::save_state(
      &package.work_dir,
      &SiteDeployState {
        build_id: build_id.0.clone(),
        invalidation: status,
      },
    )
    .map_err(|source| self.state_error(source))?;

    self.advance(SiteStage::Invalidated, |state| {
      state.build_id = Some(build_id.0.clone());
      state.invalidation = Some(status);
    });
    Ok(build_id.0)
  }

  fn root(&self) -> Result<PathBuf, SiteError> {
    self.inner.path.clone().ok_or_else(|| {
      self.build_error(BuildToolError::MissingOutput {
        path: self.inner.props.path.clone(),
      })
    })
  }

  fn advance(&self, stage: SiteStage, update: impl FnOnce(&mut SiteBuildState)) {
    let mut state = lock(&self.inner.state);
    update(&mut state);
    state.stage = stage;
    info!(site = %self.id(), stage = %stage, "site stage");
  }

  fn build_error(&self, source: BuildToolError) -> SiteError {
    SiteError::Build {
      site: self.id().to_string(),
      source,
    }
  }

  fn io_error(&self, context: &str, source: std::io::Error) -> SiteError {
    SiteError::Io {
      site: self.id().to_string(),
      context: context.to_string(),
      source,
    }
  }

  fn hash_error(&self, source: crate::util::hash::DirHashError) -> SiteError {
    SiteError::Hash {
      site: self.id().to_string(),
      source,
    }
  }

  fn state_error(&self, source: state::StateError) -> SiteError {
    SiteError::State {
      site: self.id().to_string(),
      source,
    }
  }
}

enum FilenamesError {
  List(crate::util::hash::DirHashError),
  Write(std::io::Error),
}

/// One relative path per line, so the upload handler can prune stale files.
/// Lists exactly what the archive holds.
fn write_filenames(client: &Path, out_dir: &Path, path: &Path) -> Result<(), FilenamesError> {
  let files = relative_files_excluding(client, Some(out_dir)).map_err(FilenamesError::List)?;
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).map_err(FilenamesError::Write)?;
  }
  fs::write(path, files.join("\n")).map_err(FilenamesError::Write)
}
