//! sitestack-lib: Core types and logic for sitestack
//!
//! This crate provides the construct model behind sitestack:
//! - `App`: one application build, owning its stacks, deferred tasks and events
//! - `Stack`: a named group of resources, declared through functional definitions
//! - `Bindable` / `Grantable`: how one construct exposes itself to another
//! - `Site`: static and server-rendered sites, built after declaration
//! - `Assembly`: the synthesized templates handed to the provisioning backend

pub mod app;
pub mod auth;
pub mod bind;
pub mod constructs;
pub mod consts;
pub mod error;
pub mod events;
pub mod permission;
pub mod placeholder;
pub mod resource;
pub mod site;
pub mod stack;
pub mod synth;
pub mod tasks;
pub mod util;

pub use app::{App, AppConfig, AppMode};
pub use error::{ConfigError, Error};
