//! Core library for the moku-conf application.
//!
//! Declarative configuration and state reconciliation for modular multi-instrument
//! hardware. A configuration document describes which instrument runs in each slot of
//! a device and how signals are routed between physical ports and slot ports. The
//! library validates such documents, reads a live device's state into the same model,
//! computes a structured diff, and decides under an explicit policy whether the device
//! may be reconfigured.
//!
//! Pipeline: [`validate`] → [`retrieve`] → [`diff`] → [`policy`] → [`deploy`], with
//! [`reconcile`] driving one run end to end.

pub mod cache;
pub mod deploy;
pub mod device;
pub mod diff;
pub mod error;
pub mod loader;
pub mod model;
pub mod platform;
pub mod policy;
pub mod reconcile;
pub mod retrieve;
pub mod settings;
pub mod validate;

pub use error::{MokuError, MokuResult};
