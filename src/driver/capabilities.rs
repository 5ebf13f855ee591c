//! Typed capability interfaces.
//!
//! One trait per namespace. Calling code borrows a handle from the bench by
//! role and uses these methods directly; init steps go through the named
//! command tables instead.
//!
//! Each trait:
//! - Is async (uses #[async_trait])
//! - Extends [`Driver`], so every handle can still be invoked by name
//! - Reports failures as [`DriverError`]

use super::Driver;
use crate::error::DriverError;
use async_trait::async_trait;

/// Programmable power supply.
#[async_trait]
pub trait Source: Driver {
    /// Set the output voltage setpoint in volts.
    async fn set_voltage(&self, voltage: f64) -> Result<(), DriverError>;

    /// Output voltage setpoint in volts.
    async fn voltage(&self) -> Result<f64, DriverError>;

    /// Set the current limit in amperes.
    async fn set_current(&self, current: f64) -> Result<(), DriverError>;

    /// Current limit in amperes.
    async fn current(&self) -> Result<f64, DriverError>;

    /// Enable the output.
    async fn on(&self) -> Result<(), DriverError>;

    /// Disable the output.
    async fn off(&self) -> Result<(), DriverError>;

    /// Whether the output is enabled.
    async fn is_on(&self) -> Result<bool, DriverError>;

    /// Measured output voltage in volts.
    async fn measure_voltage(&self) -> Result<f64, DriverError>;

    /// Measured output current in amperes.
    async fn measure_current(&self) -> Result<f64, DriverError>;
}

/// Electronic load.
#[async_trait]
pub trait Sink: Driver {
    /// Set the constant-current setpoint in amperes.
    async fn set_current(&self, current: f64) -> Result<(), DriverError>;

    /// Start drawing current.
    async fn on(&self) -> Result<(), DriverError>;

    /// Stop drawing current.
    async fn off(&self) -> Result<(), DriverError>;

    /// Whether the input is enabled.
    async fn is_on(&self) -> Result<bool, DriverError>;

    /// Measured input voltage in volts.
    async fn measure_voltage(&self) -> Result<f64, DriverError>;

    /// Measured input current in amperes.
    async fn measure_current(&self) -> Result<f64, DriverError>;
}

/// Digital multimeter.
#[async_trait]
pub trait Multimeter: Driver {
    /// Arm the trigger system.
    async fn init(&self) -> Result<(), DriverError>;

    /// Readings taken since the last [`Multimeter::init`].
    async fn fetch_data(&self) -> Result<Vec<f64>, DriverError>;

    /// Abort a measurement in progress.
    async fn abort(&self) -> Result<(), DriverError>;

    /// Reset to power-on state.
    async fn reset(&self) -> Result<(), DriverError>;

    /// Take one DC voltage reading.
    async fn measure_voltage(&self) -> Result<f64, DriverError>;
}

/// Oscilloscope.
#[async_trait]
pub trait Oscilloscope: Driver {
    /// Start continuous acquisition.
    async fn trigger_run(&self) -> Result<(), DriverError>;

    /// Stop acquisition.
    async fn trigger_stop(&self) -> Result<(), DriverError>;

    /// Acquire one triggered record.
    async fn trigger_single(&self) -> Result<(), DriverError>;

    /// Set the horizontal scale in seconds per division.
    async fn set_horizontal_scale(&self, scale: f64) -> Result<(), DriverError>;
}

/// Optical power meter.
#[async_trait]
pub trait PowerMeter: Driver {
    /// Measured power in watts.
    async fn read_power(&self) -> Result<f64, DriverError>;

    /// Set the calibration wavelength in nanometres.
    async fn set_wavelength(&self, wavelength_nm: f64) -> Result<(), DriverError>;
}
