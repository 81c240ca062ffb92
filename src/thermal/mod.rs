//! Thermal safety gate for AI inference
//!
//! A [`ThermalGate`] polls a [`ThermalSource`] and exposes whether inference
//! calls are currently permitted.

mod gate;
mod source;

pub use gate::{ThermalGate, ThermalState};
pub use source::{FixedThermalSource, SystemThermalSource, TemperatureReading, ThermalSource};
