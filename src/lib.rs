//! Core of the admin-page shell: a persisted list of candidate servers,
//! HTTP health probing, and automatic failover of the displayed server.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod probe;
pub mod store;
pub mod validation;

#[cfg(test)]
pub(crate) mod test_utils;

pub use engine::{ControllerOptions, FailoverController};
pub use error::{ControllerError, StoreError, ValidationError};
pub use models::{Configuration, CoreEvent, Server, ServerStatus};
pub use store::ConfigStore;
