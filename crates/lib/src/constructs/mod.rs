//! Declarable constructs.
//!
//! Every construct is created against a [`Stack`](crate::stack::Stack), claims
//! its id there and records its resources. Constructs are cheap to clone and
//! implement [`Bindable`](crate::bind::Bindable); those backed by a single
//! resource also implement [`Grantable`](crate::permission::Grantable).

mod api;
mod function;
mod resources;

pub use api::{Api, ApiProps};
pub use function::{Function, FunctionProps, Placement};
pub use resources::{
  Bucket, BucketProps, EventBus, KinesisStream, Queue, QueueProps, RdsCluster, RdsClusterProps, Secret, Table,
  TableProps, Topic,
};
