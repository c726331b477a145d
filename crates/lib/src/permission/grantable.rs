//! Resources that can grant access to themselves.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// An allow statement. Deny statements are never produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyStatement {
  pub actions: Vec<String>,
  pub resources: Vec<String>,
}

impl PolicyStatement {
  pub fn new<A, R>(actions: A, resources: R) -> Self
  where
    A: IntoIterator,
    A::Item: Into<String>,
    R: IntoIterator,
    R::Item: Into<String>,
  {
    Self {
      actions: actions.into_iter().map(Into::into).collect(),
      resources: resources.into_iter().map(Into::into).collect(),
    }
  }

  /// `*` on `*`.
  pub fn all_access() -> Self {
    Self::new(["*"], ["*"])
  }

  pub fn to_json(&self) -> serde_json::Value {
    serde_json::json!({
      "effect": "Allow",
      "actions": self.actions,
      "resources": self.resources,
    })
  }
}

/// The closed set of resource kinds that can appear in a permission list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceFamily {
  Bucket,
  Table,
  Queue,
  Topic,
  EventBus,
  KinesisStream,
  Function,
  Secret,
  HttpApi,
  /// Data API access also needs the cluster's credentials secret.
  RdsCluster { secret_arn: String },
}

impl ResourceFamily {
  pub fn name(&self) -> &'static str {
    match self {
      ResourceFamily::Bucket => "Bucket",
      ResourceFamily::Table => "Table",
      ResourceFamily::Queue => "Queue",
      ResourceFamily::Topic => "Topic",
      ResourceFamily::EventBus => "EventBus",
      ResourceFamily::KinesisStream => "KinesisStream",
      ResourceFamily::Function => "Function",
      ResourceFamily::Secret => "Secret",
      ResourceFamily::HttpApi => "Api",
      ResourceFamily::RdsCluster { .. } => "RDS",
    }
  }

  fn action_group(&self) -> &'static str {
    match self {
      ResourceFamily::Bucket => "s3:*",
      ResourceFamily::Table => "dynamodb:*",
      ResourceFamily::Queue => "sqs:*",
      ResourceFamily::Topic => "sns:*",
      ResourceFamily::EventBus => "events:*",
      ResourceFamily::KinesisStream => "kinesis:*",
      ResourceFamily::Function => "lambda:*",
      ResourceFamily::Secret => "ssm:GetParameters",
      ResourceFamily::HttpApi => "execute-api:Invoke",
      ResourceFamily::RdsCluster { .. } => "rds-data:*",
    }
  }

  /// Grant methods callable on this family, by name.
  pub fn grant_methods(&self) -> &'static [&'static str] {
    match self {
      ResourceFamily::Bucket => &["grantRead", "grantWrite", "grantReadWrite", "grantPut", "grantDelete"],
      ResourceFamily::Table => &["grantReadData", "grantWriteData", "grantReadWriteData", "grantStreamRead"],
      ResourceFamily::Queue => &["grantSendMessages", "grantConsumeMessages", "grantPurge"],
      ResourceFamily::Topic => &["grantPublish", "grantSubscribe"],
      ResourceFamily::EventBus => &["grantPutEventsTo"],
      ResourceFamily::KinesisStream => &["grantRead", "grantWrite"],
      ResourceFamily::Function => &["grantInvoke"],
      ResourceFamily::Secret => &["grantRead"],
      ResourceFamily::HttpApi => &[],
      ResourceFamily::RdsCluster { .. } => &["grantDataApiAccess"],
    }
  }
}

const BUCKET_READ: &[&str] = &["s3:GetObject*", "s3:GetBucket*", "s3:List*"];
const BUCKET_WRITE: &[&str] = &["s3:DeleteObject*", "s3:PutObject*", "s3:Abort*"];
const TABLE_READ: &[&str] = &[
  "dynamodb:BatchGetItem",
  "dynamodb:GetRecords",
  "dynamodb:GetShardIterator",
  "dynamodb:Query",
  "dynamodb:GetItem",
  "dynamodb:Scan",
  "dynamodb:ConditionCheckItem",
  "dynamodb:DescribeTable",
];
const TABLE_WRITE: &[&str] = &[
  "dynamodb:BatchWriteItem",
  "dynamodb:PutItem",
  "dynamodb:UpdateItem",
  "dynamodb:DeleteItem",
  "dynamodb:DescribeTable",
];

/// Identity of a grantable resource: its construct id, family and ARN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceHandle {
  pub id: String,
  pub family: ResourceFamily,
  pub arn: String,
}

impl ResourceHandle {
  pub fn new(id: impl Into<String>, family: ResourceFamily, arn: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      family,
      arn: arn.into(),
    }
  }

  /// Object-level families cover the resource and everything under it.
  fn resources(&self) -> Vec<String> {
    match self.family {
      ResourceFamily::Bucket | ResourceFamily::Table => vec![self.arn.clone(), format!("{}/*", self.arn)],
      _ => vec![self.arn.clone()],
    }
  }

  fn secondary(&self) -> Option<PolicyStatement> {
    match &self.family {
      ResourceFamily::RdsCluster { secret_arn } => Some(PolicyStatement::new(
        ["secretsmanager:GetSecretValue", "secretsmanager:DescribeSecret"],
        [secret_arn.clone()],
      )),
      _ => None,
    }
  }

  /// Full access for this resource, plus any secondary statement.
  pub fn describe_grant(&self) -> Vec<PolicyStatement> {
    let mut statements = vec![PolicyStatement::new([self.family.action_group()], self.resources())];
    statements.extend(self.secondary());
    statements
  }

  /// Statements a named grant method yields.
  pub fn grant(&self, method: &str) -> Result<Vec<PolicyStatement>, ConfigError> {
    let statement = |actions: &[&str], resources: Vec<String>| PolicyStatement::new(actions.iter().copied(), resources);
    let arn = || vec![self.arn.clone()];

    let statements = match (&self.family, method) {
      (ResourceFamily::Bucket, "grantRead") => vec![statement(BUCKET_READ, self.resources())],
      (ResourceFamily::Bucket, "grantWrite") => vec![statement(BUCKET_WRITE, self.resources())],
      (ResourceFamily::Bucket, "grantReadWrite") => {
        let actions: Vec<&str> = BUCKET_READ.iter().chain(BUCKET_WRITE).copied().collect();
        vec![statement(&actions, self.resources())]
      }
      (ResourceFamily::Bucket, "grantPut") => vec![statement(&["s3:PutObject*", "s3:Abort*"], self.resources())],
      (ResourceFamily::Bucket, "grantDelete") => vec![statement(&["s3:DeleteObject*"], self.resources())],
      (ResourceFamily::Table, "grantReadData") => vec![statement(TABLE_READ, self.resources())],
      (ResourceFamily::Table, "grantWriteData") => vec![statement(TABLE_WRITE, self.resources())],
      (ResourceFamily::Table, "grantReadWriteData") => {
        let mut actions: Vec<&str> = TABLE_READ.to_vec();
        actions.extend(TABLE_WRITE.iter().filter(|a| !TABLE_READ.contains(*a)));
        vec![statement(&actions, self.resources())]
      }
      (ResourceFamily::Table, "grantStreamRead") => vec![statement(
        &[
          "dynamodb:DescribeStream",
          "dynamodb:GetRecords",
          "dynamodb:GetShardIterator",
          "dynamodb:ListStreams",
        ],
        vec![format!("{}/stream/*", self.arn)],
      )],
      (ResourceFamily::Queue, "grantSendMessages") => vec![statement(
        &["sqs:SendMessage", "sqs:GetQueueAttributes", "sqs:GetQueueUrl"],
        arn(),
      )],
      (ResourceFamily::Queue, "grantConsumeMessages") => vec![statement(
        &[
          "sqs:ReceiveMessage",
          "sqs:ChangeMessageVisibility",
          "sqs:GetQueueUrl",
          "sqs:DeleteMessage",
          "sqs:GetQueueAttributes",
        ],
        arn(),
      )],
      (ResourceFamily::Queue, "grantPurge") => vec![statement(
        &["sqs:PurgeQueue", "sqs:GetQueueAttributes", "sqs:GetQueueUrl"],
        arn(),
      )],
      (ResourceFamily::Topic, "grantPublish") => vec![statement(&["sns:Publish"], arn())],
      (ResourceFamily::Topic, "grantSubscribe") => vec![statement(&["sns:Subscribe"], arn())],
      (ResourceFamily::EventBus, "grantPutEventsTo") => vec![statement(&["events:PutEvents"], arn())],
      (ResourceFamily::KinesisStream, "grantRead") => vec![statement(
        &[
          "kinesis:DescribeStreamSummary",
          "kinesis:GetRecords",
          "kinesis:GetShardIterator",
          "kinesis:ListShards",
          "kinesis:SubscribeToShard",
          "kinesis:DescribeStream",
          "kinesis:ListStreams",
        ],
        arn(),
      )],
      (ResourceFamily::KinesisStream, "grantWrite") => vec![statement(
        &["kinesis:ListShards", "kinesis:PutRecord", "kinesis:PutRecords"],
        arn(),
      )],
      (ResourceFamily::Function, "grantInvoke") => vec![statement(&["lambda:InvokeFunction"], arn())],
      (ResourceFamily::Secret, "grantRead") => vec![statement(&["ssm:GetParameters"], arn())],
      (ResourceFamily::RdsCluster { .. }, "grantDataApiAccess") => self.describe_grant(),
      _ => {
        return Err(ConfigError::UnknownGrantMethod {
          family: self.family.name().to_string(),
          id: self.id.clone(),
          method: method.to_string(),
        });
      }
    };
    Ok(statements)
  }
}

/// A declared construct that can appear in a permission list.
///
/// Only types implementing this trait are accepted by the resolver; nothing is
/// recognized by shape.
pub trait Grantable: Send + Sync {
  fn handle(&self) -> &ResourceHandle;

  fn describe_grant(&self) -> Vec<PolicyStatement> {
    self.handle().describe_grant()
  }

  fn grant(&self, method: &str) -> Result<Vec<PolicyStatement>, ConfigError> {
    self.handle().grant(method)
  }

  fn has_grant_method(&self, method: &str) -> bool {
    self.handle().family.grant_methods().contains(&method)
  }
}

impl Grantable for ResourceHandle {
  fn handle(&self) -> &ResourceHandle {
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn bucket() -> ResourceHandle {
    ResourceHandle::new("Uploads", ResourceFamily::Bucket, "arn:aws:s3:::uploads")
  }

  #[test]
  fn bucket_covers_objects() {
    assert_eq!(
      bucket().describe_grant(),
      vec![PolicyStatement::new(["s3:*"], ["arn:aws:s3:::uploads", "arn:aws:s3:::uploads/*"])]
    );
  }

  #[test]
  fn rds_adds_secret_statement() {
    let rds = ResourceHandle::new(
      "Db",
      ResourceFamily::RdsCluster {
        secret_arn: "arn:aws:secretsmanager:us-east-1:1:secret:db".into(),
      },
      "arn:aws:rds:us-east-1:1:cluster:db",
    );
    let statements = rds.describe_grant();
    assert_eq!(statements.len(), 2);
    assert_eq!(statements[0].actions, vec!["rds-data:*"]);
    assert_eq!(
      statements[1].actions,
      vec!["secretsmanager:GetSecretValue", "secretsmanager:DescribeSecret"]
    );
  }

  #[test]
  fn every_listed_method_is_callable() {
    let families = [
      ResourceFamily::Bucket,
      ResourceFamily::Table,
      ResourceFamily::Queue,
      ResourceFamily::Topic,
      ResourceFamily::EventBus,
      ResourceFamily::KinesisStream,
      ResourceFamily::Function,
      ResourceFamily::Secret,
      ResourceFamily::HttpApi,
      ResourceFamily::RdsCluster { secret_arn: "s".into() },
    ];
    for family in families {
      let handle = ResourceHandle::new("X", family.clone(), "arn:x");
      for method in family.grant_methods() {
        assert!(!handle.grant(method).unwrap().is_empty(), "{} {method}", family.name());
      }
    }
  }

  #[test]
  fn unknown_method_names_the_resource() {
    let err = bucket().grant("grantPublish").unwrap_err();
    assert_eq!(err.to_string(), "Bucket \"Uploads\" has no grant method \"grantPublish\"");
  }
}
