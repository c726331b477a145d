//! The `sitestack.json` app manifest.
//!
//! ```json
//! {
//!   "app": { "name": "shop", "stage": "dev" },
//!   "stacks": [
//!     { "name": "Data", "buckets": [{ "id": "Uploads" }] },
//!     {
//!       "name": "Web",
//!       "dependsOn": ["Data"],
//!       "functions": [{ "id": "Worker", "handler": "worker.handler", "bind": ["Uploads"] }],
//!       "sites": [{ "id": "Site", "path": "web", "environment": { "API": { "urlOf": "Api" } } }]
//!     }
//!   ]
//! }
//! ```
//!
//! Every stack becomes a stack definition. A stack sees its own constructs and
//! the exports of the stacks it depends on; anything else is an unknown
//! resource.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::Value;

use sitestack_lib::bind::{Bindable, ValueDescriptor};
use sitestack_lib::constructs::{
  Api, ApiProps, Bucket, BucketProps, EventBus, Function, FunctionProps, KinesisStream, Placement, Queue, QueueProps,
  RdsCluster, RdsClusterProps, Secret, Table, TableProps, Topic,
};
use sitestack_lib::permission::{Grantable, Permissions, from_json};
use sitestack_lib::site::archive::Archiver;
use sitestack_lib::site::{DevProps, Site, SiteKind, SiteProps, SsrFramework};
use sitestack_lib::stack::{StackContext, StackDefinition};
use sitestack_lib::{AppConfig, ConfigError, Error};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
  pub app: AppConfig,
  #[serde(default)]
  pub stacks: Vec<StackSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackSpec {
  pub name: String,
  #[serde(default)]
  pub depends_on: Vec<String>,
  #[serde(default)]
  pub buckets: Vec<Named<BucketProps>>,
  #[serde(default)]
  pub queues: Vec<Named<QueueProps>>,
  #[serde(default)]
  pub tables: Vec<Named<TableProps>>,
  #[serde(default)]
  pub topics: Vec<String>,
  #[serde(default)]
  pub event_buses: Vec<String>,
  #[serde(default)]
  pub streams: Vec<String>,
  #[serde(default)]
  pub databases: Vec<Named<RdsClusterProps>>,
  #[serde(default)]
  pub secrets: Vec<String>,
  #[serde(default)]
  pub functions: Vec<FunctionSpec>,
  #[serde(default)]
  pub apis: Vec<ApiSpec>,
  #[serde(default)]
  pub sites: Vec<SiteSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Named<P> {
  pub id: String,
  #[serde(flatten)]
  pub props: P,
}

/// A literal, or the url of a site or API in scope.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
  Plain(String),
  #[serde(rename_all = "camelCase")]
  UrlOf {
    url_of: String,
  },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionConfig {
  pub handler: String,
  pub runtime: Option<String>,
  pub timeout: Option<u32>,
  pub memory: Option<u32>,
  #[serde(default)]
  pub edge: bool,
  #[serde(default)]
  pub environment: BTreeMap<String, EnvValue>,
  #[serde(default)]
  pub bind: Vec<String>,
  pub permissions: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FunctionSpec {
  pub id: String,
  #[serde(flatten)]
  pub config: FunctionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiSpec {
  pub id: String,
  #[serde(default)]
  pub routes: BTreeMap<String, FunctionConfig>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteType {
  #[default]
  Static,
  Ssr,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteSpec {
  pub id: String,
  pub path: PathBuf,
  #[serde(rename = "type", default)]
  pub site_type: SiteType,
  pub framework: Option<SsrFramework>,
  pub build_command: Option<String>,
  pub build_output: Option<String>,
  #[serde(default)]
  pub environment: BTreeMap<String, EnvValue>,
  #[serde(default)]
  pub bind: Vec<String>,
  pub permissions: Option<Value>,
  pub timeout: Option<u32>,
  pub memory: Option<u32>,
  #[serde(default)]
  pub edge: bool,
  #[serde(default = "default_purge_files")]
  pub purge_files: bool,
  #[serde(default)]
  pub dev: DevProps,
  pub archive_command: Option<String>,
  pub part_size: Option<u64>,
}

fn default_purge_files() -> bool {
  true
}

impl Manifest {
  pub fn load(path: &Path) -> Result<Self> {
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read manifest: {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse manifest: {}", path.display()))
  }

  /// One definition per stack, in manifest order. Site paths resolve against `base`.
  pub fn definitions(&self, base: &Path) -> Result<Vec<StackDefinition<Exports>>> {
    let names: Vec<&str> = self.stacks.iter().map(|s| s.name.as_str()).collect();
    for spec in &self.stacks {
      if let Some(missing) = spec.depends_on.iter().find(|d| !names.contains(&d.as_str())) {
        bail!("stack \"{}\" depends on unknown stack \"{}\"", spec.name, missing);
      }
    }

    let registry: Arc<OnceLock<HashMap<String, StackDefinition<Exports>>>> = Arc::new(OnceLock::new());
    let definitions: Vec<_> = self
      .stacks
      .iter()
      .map(|spec| {
        let spec = Arc::new(spec.clone());
        let registry = registry.clone();
        let base = base.to_path_buf();
        StackDefinition::new(spec.name.clone(), move |ctx| {
          let empty = HashMap::new();
          declare_stack(ctx, &spec, registry.get().unwrap_or(&empty), &base)
        })
      })
      .collect();

    let by_name = definitions.iter().map(|d| (d.name().to_string(), d.clone())).collect();
    let _ = registry.set(by_name);
    Ok(definitions)
  }
}

/// What a stack hands to the stacks that depend on it.
#[derive(Clone, Default)]
pub struct Exports {
  grantables: HashMap<String, Arc<dyn Grantable>>,
  bindables: HashMap<String, Arc<dyn Bindable>>,
  urls: HashMap<String, ValueDescriptor>,
}

impl std::fmt::Debug for Exports {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let mut ids: Vec<_> = self.bindables.keys().collect();
    ids.sort();
    f.debug_struct("Exports").field("constructs", &ids).finish()
  }
}

impl Exports {
  /// Number of exported constructs.
  pub fn len(&self) -> usize {
    self.bindables.len()
  }

  pub fn is_empty(&self) -> bool {
    self.bindables.is_empty()
  }

  fn extend(&mut self, other: Exports) {
    self.grantables.extend(other.grantables);
    self.bindables.extend(other.bindables);
    self.urls.extend(other.urls);
  }

  fn add<T: Grantable + Bindable + 'static>(&mut self, id: &str, construct: T) {
    let construct = Arc::new(construct);
    self.grantables.insert(id.to_string(), construct.clone());
    self.bindables.insert(id.to_string(), construct);
  }

  fn bindables(&self, ids: &[String]) -> Result<Vec<Arc<dyn Bindable>>, ConfigError> {
    ids
      .iter()
      .map(|id| {
        self
          .bindables
          .get(id)
          .cloned()
          .ok_or_else(|| ConfigError::UnknownResource(id.clone()))
      })
      .collect()
  }

  fn environment(&self, env: &BTreeMap<String, EnvValue>) -> Result<BTreeMap<String, ValueDescriptor>, ConfigError> {
    env
      .iter()
      .map(|(key, value)| {
        let value = match value {
          EnvValue::Plain(s) => ValueDescriptor::plain(s.as_str()),
          EnvValue::UrlOf { url_of } => self
            .urls
            .get(url_of)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownResource(url_of.clone()))?,
        };
        Ok((key.clone(), value))
      })
      .collect()
  }

  fn permissions(&self, value: Option<&Value>) -> Result<Permissions, ConfigError> {
    value.map_or_else(|| Ok(Permissions::default()), |v| from_json(v, &self.grantables))
  }
}

/// Constructs in scope while a stack body runs, and the subset it exports.
#[derive(Default)]
struct Scope {
  visible: Exports,
  own: Exports,
}

impl Scope {
  fn add<T: Grantable + Bindable + Clone + 'static>(&mut self, id: &str, construct: T) {
    self.visible.add(id, construct.clone());
    self.own.add(id, construct);
  }

  fn add_url(&mut self, id: &str, url: ValueDescriptor) {
    self.visible.urls.insert(id.to_string(), url.clone());
    self.own.urls.insert(id.to_string(), url);
  }

  fn add_bindable(&mut self, id: &str, construct: Arc<dyn Bindable>) {
    self.visible.bindables.insert(id.to_string(), construct.clone());
    self.own.bindables.insert(id.to_string(), construct);
  }

  fn function_props(&self, config: &FunctionConfig) -> Result<FunctionProps, ConfigError> {
    let defaults = FunctionProps::handler(config.handler.as_str());
    Ok(FunctionProps {
      runtime: config.runtime.clone().unwrap_or(defaults.runtime.clone()),
      timeout_secs: config.timeout,
      memory_mb: config.memory,
      placement: placement(config.edge),
      environment: self.visible.environment(&config.environment)?,
      bind: self.visible.bindables(&config.bind)?,
      permissions: self.visible.permissions(config.permissions.as_ref())?,
      ..defaults
    })
  }
}

fn placement(edge: bool) -> Placement {
  if edge { Placement::Edge } else { Placement::Regional }
}

fn declare_stack(
  ctx: &StackContext,
  spec: &StackSpec,
  definitions: &HashMap<String, StackDefinition<Exports>>,
  base: &Path,
) -> Result<Exports, Error> {
  let mut scope = Scope::default();
  for name in &spec.depends_on {
    let definition = definitions
      .get(name)
      .ok_or_else(|| ConfigError::WrongOrder(name.clone()))?;
    ctx.depends_on(definition)?;
    scope.visible.extend(ctx.use_stack(definition)?);
  }

  let stack = &ctx.stack;
  for bucket in &spec.buckets {
    scope.add(&bucket.id, Bucket::new(stack, &bucket.id, bucket.props.clone())?);
  }
  for queue in &spec.queues {
    scope.add(&queue.id, Queue::new(stack, &queue.id, queue.props.clone())?);
  }
  for table in &spec.tables {
    scope.add(&table.id, Table::new(stack, &table.id, table.props.clone())?);
  }
  for id in &spec.topics {
    scope.add(id, Topic::new(stack, id)?);
  }
  for id in &spec.event_buses {
    scope.add(id, EventBus::new(stack, id)?);
  }
  for id in &spec.streams {
    scope.add(id, KinesisStream::new(stack, id)?);
  }
  for database in &spec.databases {
    scope.add(&database.id, RdsCluster::new(stack, &database.id, database.props.clone())?);
  }
  for id in &spec.secrets {
    scope.add(id, Secret::new(stack, id)?);
  }
  for function in &spec.functions {
    let props = scope.function_props(&function.config)?;
    scope.add(&function.id, Function::new(stack, &function.id, props)?);
  }
  for api in &spec.apis {
    let routes: BTreeMap<String, FunctionProps> = api
      .routes
      .iter()
      .map(|(route, config)| Ok((route.clone(), scope.function_props(config)?)))
      .collect::<Result<_, ConfigError>>()?;
    let declared = Api::new(stack, &api.id, ApiProps { routes })?;
    scope.add_url(&api.id, declared.url());
    scope.add(&api.id, declared);
  }
  for site in &spec.sites {
    let declared = Site::new(stack, &site.id, site_props(site, &scope.visible, base)?)?;
    scope.add_url(&site.id, declared.url());
    scope.add_bindable(&site.id, Arc::new(declared));
  }

  Ok(scope.own)
}

fn site_props(spec: &SiteSpec, scope: &Exports, base: &Path) -> Result<SiteProps, ConfigError> {
  let kind = match (spec.site_type, spec.framework) {
    (SiteType::Ssr, Some(framework)) => SiteKind::Ssr { framework },
    (SiteType::Ssr, None) => SiteKind::Ssr {
      framework: SsrFramework::Nextjs,
    },
    (SiteType::Static, _) => SiteKind::Static {
      build_output: spec.build_output.clone(),
    },
  };
  Ok(SiteProps {
    path: base.join(&spec.path),
    kind,
    build_command: spec.build_command.clone(),
    environment: scope.environment(&spec.environment)?,
    bind: scope.bindables(&spec.bind)?,
    permissions: scope.permissions(spec.permissions.as_ref())?,
    timeout_secs: spec.timeout,
    memory_mb: spec.memory,
    placement: placement(spec.edge),
    purge_files: spec.purge_files,
    dev: spec.dev.clone(),
    archiver: spec
      .archive_command
      .clone()
      .map_or(Archiver::Zip, Archiver::Command),
    part_size_bytes: spec.part_size,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use sitestack_lib::App;

  fn manifest(value: Value) -> Manifest {
    serde_json::from_value(value).unwrap()
  }

  #[test]
  fn parses_stacks_and_defaults() {
    let m = manifest(json!({
      "app": { "name": "shop" },
      "stacks": [{
        "name": "Data",
        "tables": [{ "id": "Orders", "partitionKey": "orderId" }],
        "sites": [{ "id": "Web", "path": "web" }]
      }]
    }));
    assert_eq!(m.app.stage, "dev");
    assert_eq!(m.stacks[0].tables[0].props.partition_key, "orderId");
    assert!(m.stacks[0].sites[0].purge_files);
    assert_eq!(m.stacks[0].sites[0].site_type, SiteType::Static);
  }

  #[test]
  fn env_values_are_literal_or_url_references() {
    let env: BTreeMap<String, EnvValue> = serde_json::from_value(json!({
      "STAGE": "dev",
      "API_URL": { "urlOf": "Api" }
    }))
    .unwrap();
    assert_eq!(env["STAGE"], EnvValue::Plain("dev".into()));
    assert_eq!(env["API_URL"], EnvValue::UrlOf { url_of: "Api".into() });
  }

  #[test]
  fn unknown_dependency_is_rejected_up_front() {
    let m = manifest(json!({
      "app": { "name": "shop" },
      "stacks": [{ "name": "Web", "dependsOn": ["Nope"] }]
    }));
    let err = m.definitions(Path::new(".")).err().unwrap();
    assert!(err.to_string().contains("unknown stack \"Nope\""));
  }

  #[tokio::test]
  async fn dependencies_share_their_exports() {
    let m = manifest(json!({
      "app": { "name": "shop" },
      "stacks": [
        { "name": "Data", "buckets": [{ "id": "Uploads" }], "queues": [{ "id": "Jobs" }] },
        {
          "name": "Api",
          "dependsOn": ["Data"],
          "functions": [{
            "id": "Worker",
            "handler": "worker.handler",
            "bind": ["Uploads"],
            "permissions": [["Jobs", "grantSendMessages"]]
          }],
          "apis": [{ "id": "Http", "routes": { "GET /": { "handler": "index.handler" } } }]
        }
      ]
    }));
    let app = App::new(m.app.clone());
    let definitions = m.definitions(Path::new(".")).unwrap();
    for definition in &definitions {
      app.stack(definition).await.unwrap();
    }

    let api = app.use_stack(&definitions[1]).unwrap();
    assert_eq!(api.len(), 2);
    let assembly = app.synth().unwrap();
    assert_eq!(assembly.stacks[1].dependencies, vec!["dev-shop-Data".to_string()]);
  }

  #[tokio::test]
  async fn references_outside_scope_fail() {
    let m = manifest(json!({
      "app": { "name": "shop" },
      "stacks": [
        { "name": "Data", "buckets": [{ "id": "Uploads" }] },
        { "name": "Api", "functions": [{ "id": "Worker", "handler": "w.handler", "bind": ["Uploads"] }] }
      ]
    }));
    let app = App::new(m.app.clone());
    let definitions = m.definitions(Path::new(".")).unwrap();
    app.stack(&definitions[0]).await.unwrap();
    let err = app.stack(&definitions[1]).await.unwrap_err();
    assert!(matches!(err, Error::Config(ConfigError::UnknownResource(id)) if id == "Uploads"));
  }

  #[test]
  fn exports_debug_lists_construct_ids() {
    let exports = Exports::default();
    assert_eq!(format!("{exports:?}"), "Exports { constructs: [] }");
  }

  #[tokio::test]
  async fn depending_on_a_later_stack_is_wrong_order() {
    let m = manifest(json!({
      "app": { "name": "shop" },
      "stacks": [
        { "name": "Web", "dependsOn": ["Data"] },
        { "name": "Data" }
      ]
    }));
    let app = App::new(m.app.clone());
    let definitions = m.definitions(Path::new(".")).unwrap();
    let err = app.stack(&definitions[0]).await.unwrap_err();
    assert!(matches!(err, Error::Config(ConfigError::WrongOrder(name)) if name == "Data"));
  }
}
