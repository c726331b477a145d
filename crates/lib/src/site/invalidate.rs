//! Content-derived build ids and CDN invalidation.
//!
//! The build id is the only cache-busting signal. Static sites hash their
//! asset hashes; SSR sites hash the relative listing of their client output,
//! so changing file contents under the same names keeps the id stable.

use std::path::Path;

use crate::constructs::{Function, FunctionProps};
use crate::error::ConfigError;
use crate::permission::{PermissionEntry, Permissions, PolicyStatement};
use crate::resource::{CustomResource, Token};
use crate::site::types::InvalidationStatus;
use crate::stack::Stack;
use crate::util::hash::{ContentHash, DirHashError, hash_hashes, hash_listing};

const INVALIDATION_HANDLER_ID: &str = "SiteInvalidationHandler";

pub fn build_id_from_assets(hashes: &[ContentHash]) -> ContentHash {
  hash_hashes(hashes)
}

pub fn build_id_from_listing(client_dir: &Path) -> Result<ContentHash, DirHashError> {
  hash_listing(client_dir)
}

/// Skip when the previous deploy had the same id.
pub fn decide(previous: Option<&str>, build_id: &str) -> InvalidationStatus {
  match previous {
    Some(previous) if previous == build_id => InvalidationStatus::Skipped,
    _ => InvalidationStatus::Requested,
  }
}

/// The stack's invalidation handler, created on first use.
pub fn invalidation_handler(stack: &Stack) -> Result<Function, ConfigError> {
  stack.shared(INVALIDATION_HANDLER_ID, || {
    Function::new(
      stack,
      INVALIDATION_HANDLER_ID,
      FunctionProps {
        timeout_secs: Some(180),
        permissions: Permissions::List(vec![PermissionEntry::Statement(PolicyStatement::new(
          ["cloudfront:CreateInvalidation", "cloudfront:GetInvalidation"],
          ["*"],
        ))]),
        ..FunctionProps::handler("sitestack/invalidate.handler")
      },
    )
  })
}

/// Flushes every path of `distribution`. The backend re-runs it only when
/// `build_id` changes.
pub fn invalidation(handler: &Function, distribution: &str, build_id: &str) -> CustomResource {
  CustomResource::new(Token::new(handler.logical_id(), "Arn"), build_id)
    .with_property("distributionId", Token::new(distribution, "Id").to_json())
    .with_property("paths", serde_json::json!(["/*"]))
}
