//! # Lab Bench Library
//!
//! This crate turns a declarative bench description into live, initialized
//! instrument handles. A configuration document maps role names (`v_in`,
//! `dmm`, `scope`) to a driver, an address and a list of init steps; the
//! loader resolves each driver, opens its session, runs the steps in order
//! and hands back a [`loader::Bench`] keyed by role. A load either succeeds
//! for every selected role or releases everything it opened.
//!
//! ## Crate Structure
//!
//! - **`address`**: Resource address parsing (`GPIB0::14::INSTR`,
//!   `TCPIP0::10.0.0.5::inst0::INSTR`, `host:port`, ...).
//! - **`session`**: The `Transport`/`Session` seam and the shared,
//!   idempotently closable `SessionHandle`.
//! - **`transport`**: TCP socket transport and an in-memory simulated
//!   transport for tests and dry runs.
//! - **`driver`**: Capability traits (`Source`, `Sink`, `Multimeter`,
//!   `Oscilloscope`, `PowerMeter`), command tables, factories, the bundled
//!   SCPI drivers and a recording mock.
//! - **`registry`**: Immutable `(definition, object)` → factory table.
//! - **`document`**: Configuration document parsing (JSON and TOML).
//! - **`binder`**: Turns one entry into a connected driver.
//! - **`sequencer`**: Runs an entry's init steps under a failure policy.
//! - **`loader`**: Orchestrates a whole load and owns the resulting bench.
//! - **`error`**: `BenchError`, `DriverError` and `TransportError`.
//! - **`settings`**: Figment-based application settings.
//! - **`logging`**: `tracing-subscriber` setup for binaries.

pub mod address;
pub mod binder;
pub mod document;
pub mod driver;
pub mod error;
pub mod loader;
pub mod logging;
pub mod registry;
pub mod sequencer;
pub mod session;
pub mod settings;
pub mod transport;

pub use document::{ConfigEntry, ConfigurationDocument, InitStep};
pub use error::{BenchError, BenchResult, DriverError, TransportError};
pub use loader::{Bench, ConfigurationLoader, LoadOptions};
pub use registry::DriverRegistry;
