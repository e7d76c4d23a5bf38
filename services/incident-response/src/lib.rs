//! rootstock incident response.
//!
//! When a firmware vulnerability is disclosed for a device class, the
//! security response suspends every affected device, quarantines the
//! readings they produced during the vulnerability window, and notifies each
//! affected owner once.
//!
//! The crate ships an `incident-response` binary; the library surface exists
//! for integration testing and reuse.
//!
//! ## Layout
//!
//! - [`actors`]: the serialized actor primitive behind the in-memory stores
//! - [`device`], [`reading`], [`notification`]: the three capabilities
//! - [`db`]: Postgres implementations of the device and reading capabilities
//! - [`response`]: the orchestrator

pub mod actors;
pub mod config;
pub mod db;
pub mod device;
pub mod firmware;
pub mod notification;
pub mod reading;
pub mod response;

pub use response::{ResponseError, SecurityResponse, SecurityResponseInput, SecurityResponseResult};
