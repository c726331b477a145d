//! Static and server-rendered sites.
//!
//! A [`Site`] is built in two phases. [`Site::new`] validates the declaration,
//! records the site bucket (and server function for SSR sites) and queues the
//! [`Site::materialize`] task. When the app drains its task queue the pipeline
//! runs the remaining stages:
//!
//! ```text
//! Declared → Validated → Built → Packaged → Deployed → Invalidated
//! ```
//!
//! A site that is not deployed while the app runs in local mode becomes a
//! placeholder instead: it never builds, never uploads and reports its
//! `dev.url` (or `localhost`) as its url.
//!
//! # Submodules
//!
//! - [`build`] - running external build commands
//! - [`archive`] - packaging output into size-bounded parts
//! - [`deploy`] - assets, upload handler, cache policies and replace values
//! - [`cdn`] - distribution behaviors
//! - [`invalidate`] - build ids and cache invalidation
//! - [`state`] - persisted deploy state

pub mod archive;
pub mod build;
pub mod cdn;
pub mod deploy;
pub mod invalidate;
mod pipeline;
pub mod state;
mod types;

pub use types::{BuildToolError, InvalidationStatus, SiteBuildState, SiteError, SiteStage};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::app::AppMode;
use crate::bind::{Bindable, Binding, ValueDescriptor, VariableKind};
use crate::consts::PLACEHOLDER_URL;
use crate::constructs::{Bucket, BucketProps, Function, FunctionProps, Placement};
use crate::error::{ConfigError, Error};
use crate::permission::Permissions;
use crate::stack::Stack;
use crate::util::{lock, logical_id};

use archive::Archiver;

/// Server-rendering frameworks and where their builds put things.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SsrFramework {
  Remix,
  Astro,
  SolidStart,
  /// Built with OpenNext.
  Nextjs,
}

impl SsrFramework {
  pub fn construct_name(self) -> &'static str {
    match self {
      SsrFramework::Remix => "RemixSite",
      SsrFramework::Astro => "AstroSite",
      SsrFramework::SolidStart => "SolidStartSite",
      SsrFramework::Nextjs => "NextjsSite",
    }
  }

  /// Server bundle, relative to the site directory.
  pub fn server_output(self) -> &'static str {
    match self {
      SsrFramework::Remix => "build/index.js",
      SsrFramework::Astro => "dist/server/entry.mjs",
      SsrFramework::SolidStart => "dist/server",
      SsrFramework::Nextjs => ".open-next/server-function",
    }
  }

  /// Client assets, relative to the site directory.
  pub fn client_output(self) -> &'static str {
    match self {
      SsrFramework::Remix => "public",
      SsrFramework::Astro => "dist/client",
      SsrFramework::SolidStart => "dist/client",
      SsrFramework::Nextjs => ".open-next/assets",
    }
  }

  /// Fingerprinted assets, relative to the client output.
  pub fn versioned_dir(self) -> &'static str {
    match self {
      SsrFramework::Remix => "build",
      SsrFramework::Astro => "_astro",
      SsrFramework::SolidStart => "assets",
      SsrFramework::Nextjs => "_next",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum SiteKind {
  /// Served from the bucket. Without a build command the source directory
  /// (or `build_output` inside it) is uploaded as is.
  Static { build_output: Option<String> },
  Ssr { framework: SsrFramework },
}

/// Local development options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevProps {
  /// Deploy the site even in local mode.
  #[serde(default)]
  pub deploy: bool,
  /// Url reported while the site is a placeholder.
  pub url: Option<String>,
}

#[derive(Clone)]
pub struct SiteProps {
  pub path: PathBuf,
  pub kind: SiteKind,
  pub build_command: Option<String>,
  /// Deferred values reach the build as `{{ KEY }}` tokens and are replaced in
  /// the uploaded files at deploy time.
  pub environment: BTreeMap<String, ValueDescriptor>,
  pub bind: Vec<Arc<dyn Bindable>>,
  pub permissions: Permissions,
  pub timeout_secs: Option<u32>,
  pub memory_mb: Option<u32>,
  pub placement: Placement,
  /// Upload a filename manifest so stale files can be pruned.
  pub purge_files: bool,
  pub dev: DevProps,
  pub archiver: Archiver,
  /// Only honoured in test mode.
  pub part_size_bytes: Option<u64>,
}

impl Default for SiteProps {
  fn default() -> Self {
    Self {
      path: PathBuf::from("."),
      kind: SiteKind::Static { build_output: None },
      build_command: None,
      environment: BTreeMap::new(),
      bind: Vec::new(),
      permissions: Permissions::default(),
      timeout_secs: None,
      memory_mb: None,
      placement: Placement::Regional,
      purge_files: true,
      dev: DevProps::default(),
      archiver: Archiver::Zip,
      part_size_bytes: None,
    }
  }
}

impl SiteProps {
  pub fn static_site(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      ..Default::default()
    }
  }

  pub fn ssr(path: impl Into<PathBuf>, framework: SsrFramework) -> Self {
    Self {
      path: path.into(),
      kind: SiteKind::Ssr { framework },
      ..Default::default()
    }
  }
}

impl std::fmt::Debug for SiteProps {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SiteProps")
      .field("path", &self.path)
      .field("kind", &self.kind)
      .field("build_command", &self.build_command)
      .field("dev", &self.dev)
      .finish_non_exhaustive()
  }
}

struct SiteInner {
  id: String,
  logical_id: String,
  stack: Stack,
  props: SiteProps,
  /// Canonical site directory. Unset for placeholders.
  path: Option<PathBuf>,
  bucket: Option<Bucket>,
  server: Option<Function>,
  url: ValueDescriptor,
  state: Mutex<SiteBuildState>,
}

/// Cloning yields another handle to the same site.
#[derive(Clone)]
pub struct Site {
  inner: Arc<SiteInner>,
}

impl std::fmt::Debug for Site {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Site")
      .field("id", &self.inner.id)
      .field("stage", &self.stage())
      .finish()
  }
}

impl Site {
  /// Validate and record a site. The build runs later, when the app's task
  /// queue is drained.
  pub fn new(stack: &Stack, id: &str, props: SiteProps) -> Result<Self, SiteError> {
    let config_error = |source: ConfigError| SiteError::Config {
      site: id.to_string(),
      source,
    };
    stack.claim_id(id).map_err(config_error)?;
    let logical_id = logical_id(&[id]);

    if stack.config().mode == AppMode::Local && !props.dev.deploy {
      let url = props.dev.url.clone().unwrap_or_else(|| PLACEHOLDER_URL.to_string());
      info!(site = %id, url = %url, "site is a placeholder in local mode");
      return Ok(Self::assemble(
        stack,
        id,
        logical_id,
        props,
        Resources {
          path: None,
          bucket: None,
          server: None,
          url: ValueDescriptor::Plain(url),
        },
        SiteStage::Placeholder,
      ));
    }

    let path = validate(&props).map_err(config_error)?;

    let bucket = Bucket::new(stack, &format!("{id}Bucket"), BucketProps::default()).map_err(config_error)?;
    let server = match props.kind {
      SiteKind::Ssr { .. } => Some(
        Function::new(
          stack,
          &format!("{id}Server"),
          FunctionProps {
            handler: "index.handler".to_string(),
            timeout_secs: props.timeout_secs,
            memory_mb: props.memory_mb,
            placement: props.placement,
            environment: props.environment.clone(),
            bind: props.bind.clone(),
            permissions: props.permissions.clone(),
            ..Default::default()
          },
        )
        .map_err(config_error)?,
      ),
      SiteKind::Static { .. } => None,
    };

    let url = ValueDescriptor::Deferred(cdn::url_token(&format!("{logical_id}Distribution")));
    let site = Self::assemble(
      stack,
      id,
      logical_id,
      props,
      Resources {
        path: Some(path),
        bucket: Some(bucket),
        server,
        url,
      },
      SiteStage::Validated,
    );
    info!(site = %id, stage = %SiteStage::Validated, "site declared");

    let task_site = site.clone();
    stack.tasks().add(format!("site {id}"), move || async move {
      task_site.materialize().await.map_err(Error::from)
    });
    Ok(site)
  }

  fn assemble(stack: &Stack, id: &str, logical_id: String, props: SiteProps, resources: Resources, stage: SiteStage) -> Self {
    Self {
      inner: Arc::new(SiteInner {
        id: id.to_string(),
        logical_id,
        stack: stack.clone(),
        props,
        path: resources.path,
        bucket: resources.bucket,
        server: resources.server,
        url: resources.url,
        state: Mutex::new(SiteBuildState {
          stage,
          ..Default::default()
        }),
      }),
    }
  }

  pub fn id(&self) -> &str {
    &self.inner.id
  }

  pub fn url(&self) -> ValueDescriptor {
    self.inner.url.clone()
  }

  pub fn is_placeholder(&self) -> bool {
    self.stage() == SiteStage::Placeholder
  }

  pub fn stage(&self) -> SiteStage {
    lock(&self.inner.state).stage
  }

  /// A snapshot of what the pipeline has recorded so far.
  pub fn state(&self) -> SiteBuildState {
    lock(&self.inner.state).clone()
  }

  pub fn bucket(&self) -> Option<&Bucket> {
    self.inner.bucket.as_ref()
  }

  pub fn server_function(&self) -> Option<&Function> {
    self.inner.server.as_ref()
  }

  pub fn path(&self) -> Option<&Path> {
    self.inner.path.as_deref()
  }

  fn distribution_id(&self) -> String {
    format!("{}Distribution", self.inner.logical_id)
  }
}

struct Resources {
  path: Option<PathBuf>,
  bucket: Option<Bucket>,
  server: Option<Function>,
  url: ValueDescriptor,
}

/// Checks run before anything external happens.
fn validate(props: &SiteProps) -> Result<PathBuf, ConfigError> {
  let path = dunce::canonicalize(&props.path).map_err(|_| ConfigError::MissingPath(props.path.display().to_string()))?;
  if let (SiteKind::Ssr { .. }, Some(timeout)) = (&props.kind, props.timeout_secs) {
    props.placement.check_timeout(timeout)?;
  }
  Ok(path)
}

impl Bindable for Site {
  fn id(&self) -> &str {
    &self.inner.id
  }

  fn construct_name(&self) -> &'static str {
    match self.inner.props.kind {
      SiteKind::Static { .. } => "StaticSite",
      SiteKind::Ssr { framework } => framework.construct_name(),
    }
  }

  fn binding(&self) -> Binding {
    Binding::new().variable("url", VariableKind::SiteUrl, self.url())
  }
}
