//! Mock driver for testing
//!
//! [`MockFactory`] builds [`MockInstrument`]s for any namespace without
//! talking SCPI. It provides:
//! - A call log shared by every instrument the factory built, in call order
//! - Per-method failure injection, optionally scoped to one address
//! - Construction failure injection
//! - Scripted readings for measurement methods
//!
//! # Example
//!
//! ```
//! use lab_bench::address::ResourceAddress;
//! use lab_bench::driver::mock::MockFactory;
//! use lab_bench::driver::{BuildContext, Definition, DriverFactory, Source};
//! use lab_bench::session::SessionHandle;
//! use lab_bench::transport::SimulatedTransport;
//!
//! # tokio_test::block_on(async {
//! let factory = MockFactory::new(Definition::Source);
//! let address = ResourceAddress::parse("GPIB0::14::INSTR").unwrap();
//! let session = SessionHandle::open(&SimulatedTransport::new(), &address).await.unwrap();
//!
//! let instrument = factory.build(BuildContext::new("X", session)).await.unwrap();
//! instrument.as_source().unwrap().off().await.unwrap();
//!
//! assert_eq!(factory.calls(), vec!["off()".to_string()]);
//! # })
//! ```

use super::capabilities::{Multimeter, Oscilloscope, PowerMeter, Sink, Source};
use super::command::{ArgKind, Arguments, BoundArguments, CommandSpec, ParamSpec};
use super::factory::{BuildContext, DriverFactory};
use super::{Definition, Driver, Instrument};
use crate::error::{DriverError, DriverErrorKind};
use crate::session::SessionHandle;
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const VOLTAGE_PARAMS: &[ParamSpec] = &[ParamSpec::required("voltage", ArgKind::Number)];
const CURRENT_PARAMS: &[ParamSpec] = &[ParamSpec::required("current", ArgKind::Number)];
const MODE_PARAMS: &[ParamSpec] = &[ParamSpec::required("mode", ArgKind::String)];
const SCALE_PARAMS: &[ParamSpec] = &[ParamSpec::required("scale", ArgKind::Number)];
const WAVELENGTH_PARAMS: &[ParamSpec] = &[ParamSpec::required("wavelength", ArgKind::Number)];
const CONFIGURE_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("name", ArgKind::String),
    ParamSpec::optional("enabled", ArgKind::Boolean),
    ParamSpec::optional("level", ArgKind::Number),
];

/// Commands of every mock instrument.
pub const MOCK_COMMON_COMMANDS: &[CommandSpec] = &[
    CommandSpec::new("rst", &[]),
    CommandSpec::new("configure", CONFIGURE_PARAMS),
];

const SOURCE_COMMANDS: &[CommandSpec] = &[
    CommandSpec::new("set_voltage", VOLTAGE_PARAMS),
    CommandSpec::new("set_current", CURRENT_PARAMS),
    CommandSpec::new("on", &[]),
    CommandSpec::new("off", &[]),
];

const SINK_COMMANDS: &[CommandSpec] = &[
    CommandSpec::new("set_current", CURRENT_PARAMS),
    CommandSpec::new("on", &[]),
    CommandSpec::new("off", &[]),
];

const MULTIMETER_COMMANDS: &[CommandSpec] = &[
    CommandSpec::new("set_mode", MODE_PARAMS),
    CommandSpec::new("init", &[]),
    CommandSpec::new("abort", &[]),
];

const OSCILLOSCOPE_COMMANDS: &[CommandSpec] = &[
    CommandSpec::new("trigger_run", &[]),
    CommandSpec::new("trigger_stop", &[]),
    CommandSpec::new("trigger_single", &[]),
    CommandSpec::new("set_horizontal_scale", SCALE_PARAMS),
];

const POWER_METER_COMMANDS: &[CommandSpec] =
    &[CommandSpec::new("set_wavelength", WAVELENGTH_PARAMS)];

const SOURCE_TABLES: &[&[CommandSpec]] = &[MOCK_COMMON_COMMANDS, SOURCE_COMMANDS];
const SINK_TABLES: &[&[CommandSpec]] = &[MOCK_COMMON_COMMANDS, SINK_COMMANDS];
const MULTIMETER_TABLES: &[&[CommandSpec]] = &[MOCK_COMMON_COMMANDS, MULTIMETER_COMMANDS];
const OSCILLOSCOPE_TABLES: &[&[CommandSpec]] = &[MOCK_COMMON_COMMANDS, OSCILLOSCOPE_COMMANDS];
const POWER_METER_TABLES: &[&[CommandSpec]] = &[MOCK_COMMON_COMMANDS, POWER_METER_COMMANDS];

fn tables_for(definition: Definition) -> &'static [&'static [CommandSpec]] {
    match definition {
        Definition::Source => SOURCE_TABLES,
        Definition::Sink => SINK_TABLES,
        Definition::Multimeter => MULTIMETER_TABLES,
        Definition::Oscilloscope => OSCILLOSCOPE_TABLES,
        Definition::PowerMeter => POWER_METER_TABLES,
    }
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    /// Address of the instrument that received the call
    pub address: String,
    /// `method(name=value, ...)`
    pub call: String,
}

#[derive(Default)]
struct MockState {
    calls: Mutex<Vec<MockCall>>,
    failing: Mutex<HashSet<(Option<String>, String)>>,
    rejection: Mutex<Option<String>>,
    readings: Mutex<VecDeque<f64>>,
    options: Mutex<Vec<Arguments>>,
}

impl MockState {
    fn should_fail(&self, address: &str, method: &str) -> bool {
        let failing = self.failing.lock();
        failing.contains(&(None, method.to_string()))
            || failing.contains(&(Some(address.to_string()), method.to_string()))
    }
}

/// Factory building recording mock instruments for one namespace.
///
/// Cloning shares the call log and injected failures.
#[derive(Clone)]
pub struct MockFactory {
    definition: Definition,
    state: Arc<MockState>,
}

impl MockFactory {
    /// Create a factory for `definition`.
    pub fn new(definition: Definition) -> Self {
        Self {
            definition,
            state: Arc::new(MockState::default()),
        }
    }

    /// Namespace the factory builds for.
    pub fn definition(&self) -> Definition {
        self.definition
    }

    /// Make every call to `method` fail with a hardware error.
    pub fn fail_method(&self, method: &str) {
        self.state.failing.lock().insert((None, method.to_string()));
    }

    /// Make calls to `method` fail only on the instrument at `address`.
    pub fn fail_method_at(&self, address: &str, method: &str) {
        let address = canonical(address);
        self.state
            .failing
            .lock()
            .insert((Some(address), method.to_string()));
    }

    /// Make the next builds reject their session.
    pub fn reject_sessions(&self, reason: impl Into<String>) {
        *self.state.rejection.lock() = Some(reason.into());
    }

    /// Queue a value for the next measurement call.
    pub fn queue_reading(&self, value: f64) {
        self.state.readings.lock().push_back(value);
    }

    /// Every recorded call, as `method(args)` strings, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.state
            .calls
            .lock()
            .iter()
            .map(|c| c.call.clone())
            .collect()
    }

    /// Recorded calls with the receiving address.
    pub fn call_log(&self) -> Vec<MockCall> {
        self.state.calls.lock().clone()
    }

    /// Calls received by the instrument at `address`.
    pub fn calls_at(&self, address: &str) -> Vec<String> {
        let address = canonical(address);
        self.state
            .calls
            .lock()
            .iter()
            .filter(|c| c.address == address)
            .map(|c| c.call.clone())
            .collect()
    }

    /// Clear the call log.
    pub fn clear_calls(&self) {
        self.state.calls.lock().clear();
    }

    /// Constructor options each build received, in build order.
    pub fn built_options(&self) -> Vec<Arguments> {
        self.state.options.lock().clone()
    }
}

fn canonical(address: &str) -> String {
    crate::address::ResourceAddress::parse(address)
        .map(|a| a.to_string())
        .unwrap_or_else(|_| address.to_string())
}

impl DriverFactory for MockFactory {
    fn command_tables(&self) -> &'static [&'static [CommandSpec]] {
        tables_for(self.definition)
    }

    fn build(&self, ctx: BuildContext) -> BoxFuture<'static, Result<Instrument, DriverError>> {
        let definition = self.definition;
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            if let Some(reason) = state.rejection.lock().clone() {
                return Err(DriverError::new(
                    &ctx.object,
                    DriverErrorKind::Construction,
                    reason,
                ));
            }
            state.options.lock().push(ctx.options.clone());

            let mock = Arc::new(MockInstrument {
                object: ctx.object,
                definition,
                address: ctx.session.address().to_string(),
                session: ctx.session,
                state,
                output: AtomicBool::new(false),
                setpoints: Mutex::new((0.0, 0.0)),
            });

            Ok(match definition {
                Definition::Source => Instrument::Source(mock),
                Definition::Sink => Instrument::Sink(mock),
                Definition::Multimeter => Instrument::Multimeter(mock),
                Definition::Oscilloscope => Instrument::Oscilloscope(mock),
                Definition::PowerMeter => Instrument::PowerMeter(mock),
            })
        })
    }
}

/// Recording instrument.
pub struct MockInstrument {
    object: String,
    definition: Definition,
    address: String,
    session: SessionHandle,
    state: Arc<MockState>,
    output: AtomicBool,
    // (voltage, current)
    setpoints: Mutex<(f64, f64)>,
}

fn describe_args(args: &Arguments) -> String {
    args.iter()
        .map(|(name, value)| match value {
            Value::String(s) => format!("{name}={s}"),
            other => format!("{name}={other}"),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

impl MockInstrument {
    /// Namespace the instrument was built for.
    pub fn definition(&self) -> Definition {
        self.definition
    }

    fn record(&self, method: &str, args: String) -> Result<(), DriverError> {
        self.state.calls.lock().push(MockCall {
            address: self.address.clone(),
            call: format!("{method}({args})"),
        });
        if self.state.should_fail(&self.address, method) {
            return Err(DriverError::new(
                &self.object,
                DriverErrorKind::Hardware,
                format!("injected failure in '{method}'"),
            ));
        }
        Ok(())
    }

    fn reading(&self) -> f64 {
        self.state.readings.lock().pop_front().unwrap_or(0.0)
    }

    fn set_voltage_setpoint(&self, voltage: f64) -> Result<(), DriverError> {
        self.record("set_voltage", format!("voltage={voltage}"))?;
        self.setpoints.lock().0 = voltage;
        Ok(())
    }

    fn set_current_setpoint(&self, current: f64) -> Result<(), DriverError> {
        self.record("set_current", format!("current={current}"))?;
        self.setpoints.lock().1 = current;
        Ok(())
    }

    fn set_output(&self, method: &str, on: bool) -> Result<(), DriverError> {
        self.record(method, String::new())?;
        self.output.store(on, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Driver for MockInstrument {
    fn object(&self) -> &str {
        &self.object
    }

    fn command_tables(&self) -> &'static [&'static [CommandSpec]] {
        tables_for(self.definition)
    }

    async fn invoke(&self, method: &str, args: BoundArguments<'_>) -> Result<(), DriverError> {
        self.record(method, describe_args(args.raw()))?;
        match method {
            "set_voltage" => {
                if let Some(v) = args.number("voltage") {
                    self.setpoints.lock().0 = v;
                }
            }
            "set_current" => {
                if let Some(c) = args.number("current") {
                    self.setpoints.lock().1 = c;
                }
            }
            "on" => self.output.store(true, Ordering::SeqCst),
            "off" => self.output.store(false, Ordering::SeqCst),
            _ => {}
        }
        Ok(())
    }

    fn session(&self) -> &SessionHandle {
        &self.session
    }
}

#[async_trait]
impl Source for MockInstrument {
    async fn set_voltage(&self, voltage: f64) -> Result<(), DriverError> {
        self.set_voltage_setpoint(voltage)
    }

    async fn voltage(&self) -> Result<f64, DriverError> {
        self.record("voltage", String::new())?;
        Ok(self.setpoints.lock().0)
    }

    async fn set_current(&self, current: f64) -> Result<(), DriverError> {
        self.set_current_setpoint(current)
    }

    async fn current(&self) -> Result<f64, DriverError> {
        self.record("current", String::new())?;
        Ok(self.setpoints.lock().1)
    }

    async fn on(&self) -> Result<(), DriverError> {
        self.set_output("on", true)
    }

    async fn off(&self) -> Result<(), DriverError> {
        self.set_output("off", false)
    }

    async fn is_on(&self) -> Result<bool, DriverError> {
        self.record("is_on", String::new())?;
        Ok(self.output.load(Ordering::SeqCst))
    }

    async fn measure_voltage(&self) -> Result<f64, DriverError> {
        self.record("measure_voltage", String::new())?;
        Ok(self.reading())
    }

    async fn measure_current(&self) -> Result<f64, DriverError> {
        self.record("measure_current", String::new())?;
        Ok(self.reading())
    }
}

#[async_trait]
impl Sink for MockInstrument {
    async fn set_current(&self, current: f64) -> Result<(), DriverError> {
        self.set_current_setpoint(current)
    }

    async fn on(&self) -> Result<(), DriverError> {
        self.set_output("on", true)
    }

    async fn off(&self) -> Result<(), DriverError> {
        self.set_output("off", false)
    }

    async fn is_on(&self) -> Result<bool, DriverError> {
        self.record("is_on", String::new())?;
        Ok(self.output.load(Ordering::SeqCst))
    }

    async fn measure_voltage(&self) -> Result<f64, DriverError> {
        self.record("measure_voltage", String::new())?;
        Ok(self.reading())
    }

    async fn measure_current(&self) -> Result<f64, DriverError> {
        self.record("measure_current", String::new())?;
        Ok(self.reading())
    }
}

#[async_trait]
impl Multimeter for MockInstrument {
    async fn init(&self) -> Result<(), DriverError> {
        self.record("init", String::new())
    }

    async fn fetch_data(&self) -> Result<Vec<f64>, DriverError> {
        self.record("fetch_data", String::new())?;
        Ok(vec![self.reading()])
    }

    async fn abort(&self) -> Result<(), DriverError> {
        self.record("abort", String::new())
    }

    async fn reset(&self) -> Result<(), DriverError> {
        self.record("reset", String::new())
    }

    async fn measure_voltage(&self) -> Result<f64, DriverError> {
        self.record("measure_voltage", String::new())?;
        Ok(self.reading())
    }
}

#[async_trait]
impl Oscilloscope for MockInstrument {
    async fn trigger_run(&self) -> Result<(), DriverError> {
        self.record("trigger_run", String::new())
    }

    async fn trigger_stop(&self) -> Result<(), DriverError> {
        self.record("trigger_stop", String::new())
    }

    async fn trigger_single(&self) -> Result<(), DriverError> {
        self.record("trigger_single", String::new())
    }

    async fn set_horizontal_scale(&self, scale: f64) -> Result<(), DriverError> {
        self.record("set_horizontal_scale", format!("scale={scale}"))
    }
}

#[async_trait]
impl PowerMeter for MockInstrument {
    async fn read_power(&self) -> Result<f64, DriverError> {
        self.record("read_power", String::new())?;
        Ok(self.reading())
    }

    async fn set_wavelength(&self, wavelength_nm: f64) -> Result<(), DriverError> {
        self.record("set_wavelength", format!("wavelength={wavelength_nm}"))
    }
}
