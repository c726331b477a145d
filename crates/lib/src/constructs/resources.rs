//! Data and messaging resources.
//!
//! Each construct declares exactly one resource in its stack, exposes a
//! binding with its runtime identifiers and can appear in permission lists.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::bind::{Bindable, Binding, ValueDescriptor, VariableKind};
use crate::error::ConfigError;
use crate::permission::{Grantable, ResourceFamily, ResourceHandle};
use crate::resource::{Resource, ResourceKind, Token};
use crate::stack::Stack;
use crate::util::logical_id;

/// Claims the id and records the resource.
fn declare(stack: &Stack, id: &str, kind: ResourceKind, properties: serde_json::Value) -> Result<String, ConfigError> {
  stack.claim_id(id)?;
  let logical = logical_id(&[id]);
  stack.add_resource(Resource::new(logical.clone(), kind, properties));
  debug!(stack = %stack.name(), id, ?kind, "resource declared");
  Ok(logical)
}

/// Grants every action of a binding's handle family over its identifiers.
fn family_permissions(binding: Binding, handle: &ResourceHandle) -> Binding {
  handle
    .describe_grant()
    .into_iter()
    .fold(binding, |binding, statement| {
      statement
        .actions
        .iter()
        .fold(binding, |b, action| b.permission(action, statement.resources.clone()))
    })
}

macro_rules! grantable {
  ($($ty:ty),* $(,)?) => {
    $(
      impl Grantable for $ty {
        fn handle(&self) -> &ResourceHandle {
          &self.handle
        }
      }
    )*
  };
}

grantable!(Bucket, Queue, Table, Topic, EventBus, KinesisStream, RdsCluster, Secret);

// Bucket

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketProps {
  /// Physical name override. Defaults to `{stage}-{app}-{id}` lowercased.
  pub name: Option<String>,
  #[serde(default)]
  pub cors: bool,
}

#[derive(Debug, Clone)]
pub struct Bucket {
  handle: ResourceHandle,
  bucket_name: String,
}

impl Bucket {
  pub fn new(stack: &Stack, id: &str, props: BucketProps) -> Result<Self, ConfigError> {
    let bucket_name = props
      .name
      .unwrap_or_else(|| stack.config().physical_name(id))
      .to_lowercase();
    declare(
      stack,
      id,
      ResourceKind::Bucket,
      json!({ "bucketName": bucket_name, "cors": props.cors }),
    )?;
    Ok(Self {
      handle: ResourceHandle::new(id, ResourceFamily::Bucket, format!("arn:aws:s3:::{bucket_name}")),
      bucket_name,
    })
  }

  pub fn bucket_name(&self) -> &str {
    &self.bucket_name
  }

  pub fn bucket_arn(&self) -> &str {
    &self.handle.arn
  }
}

impl Bindable for Bucket {
  fn id(&self) -> &str {
    &self.handle.id
  }

  fn construct_name(&self) -> &'static str {
    "Bucket"
  }

  fn binding(&self) -> Binding {
    let binding = Binding::new().variable("bucketName", VariableKind::Plain, self.bucket_name.as_str());
    family_permissions(binding, &self.handle)
  }
}

// Queue

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueProps {
  #[serde(default)]
  pub fifo: bool,
  pub visibility_timeout_secs: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct Queue {
  handle: ResourceHandle,
  queue_url: String,
}

impl Queue {
  pub fn new(stack: &Stack, id: &str, props: QueueProps) -> Result<Self, ConfigError> {
    let config = stack.config();
    let mut name = config.physical_name(id);
    if props.fifo {
      name.push_str(".fifo");
    }
    declare(
      stack,
      id,
      ResourceKind::Queue,
      json!({
        "queueName": name,
        "fifo": props.fifo,
        "visibilityTimeout": props.visibility_timeout_secs,
      }),
    )?;
    Ok(Self {
      queue_url: format!("https://sqs.{}.amazonaws.com/{}/{name}", config.region, config.account),
      handle: ResourceHandle::new(id, ResourceFamily::Queue, config.arn("sqs", &name)),
    })
  }

  pub fn queue_url(&self) -> &str {
    &self.queue_url
  }
}

impl Bindable for Queue {
  fn id(&self) -> &str {
    &self.handle.id
  }

  fn construct_name(&self) -> &'static str {
    "Queue"
  }

  fn binding(&self) -> Binding {
    let binding = Binding::new().variable("queueUrl", VariableKind::Plain, self.queue_url.as_str());
    family_permissions(binding, &self.handle)
  }
}

// Table

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableProps {
  pub partition_key: String,
  pub sort_key: Option<String>,
  #[serde(default)]
  pub stream: bool,
}

impl Default for TableProps {
  fn default() -> Self {
    Self {
      partition_key: "pk".to_string(),
      sort_key: None,
      stream: false,
    }
  }
}

#[derive(Debug, Clone)]
pub struct Table {
  handle: ResourceHandle,
  table_name: String,
}

impl Table {
  pub fn new(stack: &Stack, id: &str, props: TableProps) -> Result<Self, ConfigError> {
    let config = stack.config();
    let table_name = config.physical_name(id);
    declare(
      stack,
      id,
      ResourceKind::Table,
      json!({
        "tableName": table_name,
        "partitionKey": props.partition_key,
        "sortKey": props.sort_key,
        "stream": props.stream,
      }),
    )?;
    Ok(Self {
      handle: ResourceHandle::new(id, ResourceFamily::Table, config.arn("dynamodb", &format!("table/{table_name}"))),
      table_name,
    })
  }

  pub fn table_name(&self) -> &str {
    &self.table_name
  }
}

impl Bindable for Table {
  fn id(&self) -> &str {
    &self.handle.id
  }

  fn construct_name(&self) -> &'static str {
    "Table"
  }

  fn binding(&self) -> Binding {
    let binding = Binding::new().variable("tableName", VariableKind::Plain, self.table_name.as_str());
    family_permissions(binding, &self.handle)
  }
}

// Topic

#[derive(Debug, Clone)]
pub struct Topic {
  handle: ResourceHandle,
}

impl Topic {
  pub fn new(stack: &Stack, id: &str) -> Result<Self, ConfigError> {
    let config = stack.config();
    let name = config.physical_name(id);
    declare(stack, id, ResourceKind::Topic, json!({ "topicName": name }))?;
    Ok(Self {
      handle: ResourceHandle::new(id, ResourceFamily::Topic, config.arn("sns", &name)),
    })
  }

  pub fn topic_arn(&self) -> &str {
    &self.handle.arn
  }
}

impl Bindable for Topic {
  fn id(&self) -> &str {
    &self.handle.id
  }

  fn construct_name(&self) -> &'static str {
    "Topic"
  }

  fn binding(&self) -> Binding {
    let binding = Binding::new().variable("topicArn", VariableKind::Plain, self.handle.arn.as_str());
    family_permissions(binding, &self.handle)
  }
}

// EventBus

#[derive(Debug, Clone)]
pub struct EventBus {
  handle: ResourceHandle,
  event_bus_name: String,
}

impl EventBus {
  pub fn new(stack: &Stack, id: &str) -> Result<Self, ConfigError> {
    let config = stack.config();
    let event_bus_name = config.physical_name(id);
    declare(stack, id, ResourceKind::EventBus, json!({ "eventBusName": event_bus_name }))?;
    Ok(Self {
      handle: ResourceHandle::new(
        id,
        ResourceFamily::EventBus,
        config.arn("events", &format!("event-bus/{event_bus_name}")),
      ),
      event_bus_name,
    })
  }

  pub fn event_bus_name(&self) -> &str {
    &self.event_bus_name
  }
}

impl Bindable for EventBus {
  fn id(&self) -> &str {
    &self.handle.id
  }

  fn construct_name(&self) -> &'static str {
    "EventBus"
  }

  fn binding(&self) -> Binding {
    let binding = Binding::new().variable("eventBusName", VariableKind::Plain, self.event_bus_name.as_str());
    family_permissions(binding, &self.handle)
  }
}

// KinesisStream

#[derive(Debug, Clone)]
pub struct KinesisStream {
  handle: ResourceHandle,
  stream_name: String,
}

impl KinesisStream {
  pub fn new(stack: &Stack, id: &str) -> Result<Self, ConfigError> {
    let config = stack.config();
    let stream_name = config.physical_name(id);
    declare(stack, id, ResourceKind::KinesisStream, json!({ "streamName": stream_name }))?;
    Ok(Self {
      handle: ResourceHandle::new(
        id,
        ResourceFamily::KinesisStream,
        config.arn("kinesis", &format!("stream/{stream_name}")),
      ),
      stream_name,
    })
  }

  pub fn stream_name(&self) -> &str {
    &self.stream_name
  }
}

impl Bindable for KinesisStream {
  fn id(&self) -> &str {
    &self.handle.id
  }

  fn construct_name(&self) -> &'static str {
    "KinesisStream"
  }

  fn binding(&self) -> Binding {
    let binding = Binding::new().variable("streamName", VariableKind::Plain, self.stream_name.as_str());
    family_permissions(binding, &self.handle)
  }
}

// RdsCluster

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RdsClusterProps {
  pub engine: String,
  pub default_database_name: String,
}

impl Default for RdsClusterProps {
  fn default() -> Self {
    Self {
      engine: "postgresql".to_string(),
      default_database_name: "main".to_string(),
    }
  }
}

#[derive(Debug, Clone)]
pub struct RdsCluster {
  handle: ResourceHandle,
  default_database_name: String,
}

impl RdsCluster {
  pub fn new(stack: &Stack, id: &str, props: RdsClusterProps) -> Result<Self, ConfigError> {
    let config = stack.config();
    let name = config.physical_name(id).to_lowercase();
    declare(
      stack,
      id,
      ResourceKind::RdsCluster,
      json!({
        "clusterIdentifier": name,
        "engine": props.engine,
        "defaultDatabaseName": props.default_database_name,
        "enableDataApi": true,
      }),
    )?;
    let secret_arn = config.arn("secretsmanager", &format!("secret:{name}"));
    Ok(Self {
      handle: ResourceHandle::new(
        id,
        ResourceFamily::RdsCluster { secret_arn },
        config.arn("rds", &format!("cluster:{name}")),
      ),
      default_database_name: props.default_database_name,
    })
  }

  pub fn cluster_arn(&self) -> &str {
    &self.handle.arn
  }

  pub fn secret_arn(&self) -> &str {
    match &self.handle.family {
      ResourceFamily::RdsCluster { secret_arn } => secret_arn,
      _ => "",
    }
  }
}

impl Bindable for RdsCluster {
  fn id(&self) -> &str {
    &self.handle.id
  }

  fn construct_name(&self) -> &'static str {
    "RDS"
  }

  fn binding(&self) -> Binding {
    let binding = Binding::new()
      .variable("clusterArn", VariableKind::Plain, self.cluster_arn())
      .variable("secretArn", VariableKind::Plain, self.secret_arn())
      .variable("defaultDatabaseName", VariableKind::Plain, self.default_database_name.as_str());
    family_permissions(binding, &self.handle)
  }
}

// Secret

/// A value stored in the parameter store and read at runtime.
#[derive(Debug, Clone)]
pub struct Secret {
  handle: ResourceHandle,
  logical_id: String,
  parameter_name: String,
}

impl Secret {
  pub fn new(stack: &Stack, id: &str) -> Result<Self, ConfigError> {
    let config = stack.config();
    let parameter_name = format!("/sitestack/{}/{}/Secret/{id}/value", config.name, config.stage);
    let logical_id = declare(stack, id, ResourceKind::Secret, json!({ "parameterName": parameter_name }))?;
    Ok(Self {
      handle: ResourceHandle::new(
        id,
        ResourceFamily::Secret,
        config.arn("ssm", &format!("parameter{parameter_name}")),
      ),
      logical_id,
      parameter_name,
    })
  }

  pub fn parameter_name(&self) -> &str {
    &self.parameter_name
  }
}

impl Bindable for Secret {
  fn id(&self) -> &str {
    &self.handle.id
  }

  fn construct_name(&self) -> &'static str {
    "Secret"
  }

  fn binding(&self) -> Binding {
    let binding = Binding::new().variable(
      "value",
      VariableKind::Secret,
      ValueDescriptor::Deferred(Token::new(&self.logical_id, "Value")),
    );
    family_permissions(binding, &self.handle)
  }
}
