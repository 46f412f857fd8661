//! Typed configuration model: instruments, slots, ports, routing and the
//! configuration aggregate.

mod config;
mod instrument;
mod port;
mod slot;

pub use config::{
    Configuration, ConfigurationView, DesiredConfiguration, Metadata, ObservedConfiguration,
};
pub use instrument::{Capability, InstrumentKind, KindSpec, PortExposure};
pub use port::{MokuConnection, PortId};
pub use slot::SlotConfig;
