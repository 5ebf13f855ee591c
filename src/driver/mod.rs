//! Instrument drivers.
//!
//! Every driver talks to one instrument through a [`SessionHandle`] and
//! belongs to exactly one capability namespace ([`Definition`]). Drivers are
//! reached two ways:
//!
//! - **By name**: init steps call [`Driver::invoke`] with a command name from
//!   the driver's static command tables (see [`command`]).
//! - **By capability**: test code takes the typed handle out of an
//!   [`Instrument`] (e.g. [`Instrument::as_source`]) and calls the trait
//!   methods in [`capabilities`] directly.
//!
//! # Bundled drivers
//!
//! | Definition     | Object                              | Module            |
//! |----------------|-------------------------------------|-------------------|
//! | `source`       | `HP_6632A`                          | [`hp6632a`]       |
//! | `multimeter`   | `HP_34401A`, `Keysight_34461A`      | [`hp34401a`]      |
//! | `oscilloscope` | `Rigol_DS1000Z`                     | [`rigol_ds1000z`] |
//!
//! [`mock`] provides a recording driver for every namespace.

pub mod capabilities;
pub mod command;
pub mod factory;
pub mod hp34401a;
pub mod hp6632a;
pub mod mock;
pub mod rigol_ds1000z;
pub mod scpi;

pub use capabilities::{Multimeter, Oscilloscope, PowerMeter, Sink, Source};
pub use command::{find_command, ArgKind, Arguments, BoundArguments, CommandSpec, ParamSpec};
pub use factory::{BuildContext, DriverFactory};

use crate::error::DriverError;
use crate::session::SessionHandle;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Capability namespace of a driver.
///
/// Names are matched exactly and case-sensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Definition {
    /// Programmable power supply
    Source,
    /// Electronic load
    Sink,
    /// Digital multimeter
    Multimeter,
    /// Oscilloscope
    Oscilloscope,
    /// Optical power meter
    PowerMeter,
}

impl Definition {
    /// Every namespace, in listing order.
    pub const ALL: [Definition; 5] = [
        Definition::Source,
        Definition::Sink,
        Definition::Multimeter,
        Definition::Oscilloscope,
        Definition::PowerMeter,
    ];

    /// Namespace as written in configuration documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            Definition::Source => "source",
            Definition::Sink => "sink",
            Definition::Multimeter => "multimeter",
            Definition::Oscilloscope => "oscilloscope",
            Definition::PowerMeter => "powermeter",
        }
    }

    /// Look up a namespace by its exact name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.as_str() == name)
    }
}

impl fmt::Display for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Behaviour shared by every driver regardless of namespace.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Driver type name, as registered (e.g. `HP_6632A`).
    fn object(&self) -> &str;

    /// Command tables this driver answers to by name.
    fn command_tables(&self) -> &'static [&'static [CommandSpec]];

    /// Look up one command by name.
    fn command(&self, name: &str) -> Option<&'static CommandSpec> {
        find_command(self.command_tables(), name)
    }

    /// Run a command by name with arguments already bound against its spec.
    async fn invoke(&self, method: &str, args: BoundArguments<'_>) -> Result<(), DriverError>;

    /// Session the driver talks through.
    fn session(&self) -> &SessionHandle;

    /// Query the instrument identification string (`*IDN?`).
    async fn identify(&self) -> Result<String, DriverError> {
        self.session()
            .query("*IDN?")
            .await
            .map(|reply| reply.trim().to_string())
            .map_err(|e| DriverError::transport(self.object(), e))
    }

    /// Return the instrument to front-panel control.
    async fn set_local(&self) -> Result<(), DriverError> {
        self.session()
            .go_to_local()
            .await
            .map_err(|e| DriverError::transport(self.object(), e))
    }
}

/// A constructed driver, tagged by namespace.
#[derive(Clone)]
pub enum Instrument {
    /// Power supply
    Source(Arc<dyn Source>),
    /// Electronic load
    Sink(Arc<dyn Sink>),
    /// Multimeter
    Multimeter(Arc<dyn Multimeter>),
    /// Oscilloscope
    Oscilloscope(Arc<dyn Oscilloscope>),
    /// Power meter
    PowerMeter(Arc<dyn PowerMeter>),
}

macro_rules! with_driver {
    ($instrument:expr, $driver:ident => $body:expr) => {
        match $instrument {
            Instrument::Source($driver) => $body,
            Instrument::Sink($driver) => $body,
            Instrument::Multimeter($driver) => $body,
            Instrument::Oscilloscope($driver) => $body,
            Instrument::PowerMeter($driver) => $body,
        }
    };
}

impl Instrument {
    /// Namespace of the wrapped driver.
    pub fn definition(&self) -> Definition {
        match self {
            Instrument::Source(_) => Definition::Source,
            Instrument::Sink(_) => Definition::Sink,
            Instrument::Multimeter(_) => Definition::Multimeter,
            Instrument::Oscilloscope(_) => Definition::Oscilloscope,
            Instrument::PowerMeter(_) => Definition::PowerMeter,
        }
    }

    /// Driver type name.
    pub fn object(&self) -> &str {
        with_driver!(self, d => d.object())
    }

    /// Command tables of the wrapped driver.
    pub fn command_tables(&self) -> &'static [&'static [CommandSpec]] {
        with_driver!(self, d => d.command_tables())
    }

    /// Look up one command by name.
    pub fn command(&self, name: &str) -> Option<&'static CommandSpec> {
        with_driver!(self, d => d.command(name))
    }

    /// Run a command by name.
    pub async fn invoke(&self, method: &str, args: BoundArguments<'_>) -> Result<(), DriverError> {
        with_driver!(self, d => d.invoke(method, args).await)
    }

    /// Query `*IDN?`.
    pub async fn identify(&self) -> Result<String, DriverError> {
        with_driver!(self, d => d.identify().await)
    }

    /// Return to front-panel control.
    pub async fn set_local(&self) -> Result<(), DriverError> {
        with_driver!(self, d => d.set_local().await)
    }

    /// Session of the wrapped driver.
    pub fn session(&self) -> &SessionHandle {
        with_driver!(self, d => d.session())
    }

    /// The power supply handle, if this is one.
    pub fn as_source(&self) -> Option<&Arc<dyn Source>> {
        match self {
            Instrument::Source(d) => Some(d),
            _ => None,
        }
    }

    /// The electronic load handle, if this is one.
    pub fn as_sink(&self) -> Option<&Arc<dyn Sink>> {
        match self {
            Instrument::Sink(d) => Some(d),
            _ => None,
        }
    }

    /// The multimeter handle, if this is one.
    pub fn as_multimeter(&self) -> Option<&Arc<dyn Multimeter>> {
        match self {
            Instrument::Multimeter(d) => Some(d),
            _ => None,
        }
    }

    /// The oscilloscope handle, if this is one.
    pub fn as_oscilloscope(&self) -> Option<&Arc<dyn Oscilloscope>> {
        match self {
            Instrument::Oscilloscope(d) => Some(d),
            _ => None,
        }
    }

    /// The power meter handle, if this is one.
    pub fn as_power_meter(&self) -> Option<&Arc<dyn PowerMeter>> {
        match self {
            Instrument::PowerMeter(d) => Some(d),
            _ => None,
        }
    }
}

impl fmt::Debug for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrument")
            .field("definition", &self.definition())
            .field("object", &self.object())
            .field("address", &self.session().address().to_string())
            .finish()
    }
}
