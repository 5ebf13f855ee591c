//! HP 34401A / Keysight 34461A digital multimeters.
//!
//! Both share the 34401A command set, so one driver serves both objects. The
//! `factor` constructor option scales every reading (e.g. a shunt or divider
//! ratio) before it is returned.

use super::capabilities::Multimeter;
use super::command::{require, ArgKind, BoundArguments, CommandSpec, ParamSpec};
use super::factory::{BuildContext, DriverFactory};
use super::scpi::{parse_f64_list, unknown_command, ScpiCore, COMMON_COMMANDS};
use super::{Driver, Instrument};
use crate::error::{DriverError, DriverErrorKind};
use crate::session::SessionHandle;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;

/// Registered object name of the HP 34401A.
pub const HP_34401A: &str = "HP_34401A";

/// Registered object name of the Keysight 34461A.
pub const KEYSIGHT_34461A: &str = "Keysight_34461A";

const MAX_TRIGGER_COUNT: i64 = 50_000;

const SET_MODE_PARAMS: &[ParamSpec] = &[ParamSpec::required("mode", ArgKind::String)];
const TRIGGER_SOURCE_PARAMS: &[ParamSpec] = &[ParamSpec::optional("source", ArgKind::String)];
const COUNT_PARAMS: &[ParamSpec] = &[ParamSpec::required("count", ArgKind::Integer)];
const DELAY_PARAMS: &[ParamSpec] = &[ParamSpec::optional("delay", ArgKind::Number)];

/// Multimeter commands of the 34401A family.
pub const MULTIMETER_COMMANDS: &[CommandSpec] = &[
    CommandSpec::new("set_mode", SET_MODE_PARAMS),
    CommandSpec::new("set_trigger_source", TRIGGER_SOURCE_PARAMS),
    CommandSpec::new("set_trigger_count", COUNT_PARAMS),
    CommandSpec::new("set_sample_count", COUNT_PARAMS),
    CommandSpec::new("set_trigger_delay", DELAY_PARAMS),
    CommandSpec::new("init", &[]),
    CommandSpec::new("abort", &[]),
];

const TABLES: &[&[CommandSpec]] = &[COMMON_COMMANDS, MULTIMETER_COMMANDS];

/// `CONF:` function for a measurement mode name.
fn conf_function(mode: &str) -> Option<&'static str> {
    let function = match mode.to_ascii_uppercase().as_str() {
        "VDC" => "VOLT:DC",
        "VAC" => "VOLT:AC",
        "ADC" => "CURR:DC",
        "AAC" => "CURR:AC",
        "FREQ" => "FREQ",
        "OHMS" => "RES",
        "DIOD" => "DIOD",
        "CONT" => "CONT",
        "PER" => "PER",
        _ => return None,
    };
    Some(function)
}

/// `TRIG:SOUR` keyword for a trigger source name.
fn trigger_keyword(source: &str) -> Option<&'static str> {
    let keyword = match source.to_ascii_uppercase().as_str() {
        "BUS" => "BUS",
        "IMMEDIATE" | "IMM" => "IMMediate",
        "EXTERNAL" | "EXT" => "EXTernal",
        "TIMER" | "TIME" | "TIM" => "TIMer",
        _ => return None,
    };
    Some(keyword)
}

/// 34401A-family driver.
#[derive(Debug)]
pub struct Hp34401a {
    scpi: ScpiCore,
    factor: f64,
}

impl Hp34401a {
    /// Wrap an open session with a reading factor of 1.
    pub fn new(object: &str, session: SessionHandle) -> Self {
        Self {
            scpi: ScpiCore::new(object, session),
            factor: 1.0,
        }
    }

    /// Scale factor applied to readings.
    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Select the measurement function (`VDC`, `VAC`, `ADC`, `AAC`, `FREQ`,
    /// `OHMS`, `DIOD`, `CONT`, `PER`; case-insensitive).
    pub async fn set_mode(&self, mode: &str) -> Result<(), DriverError> {
        let function = conf_function(mode).ok_or_else(|| {
            DriverError::invalid_parameter(self.object(), format!("invalid mode '{mode}'"))
        })?;
        self.scpi.write(&format!("CONF:{function}")).await
    }

    /// Select the trigger source; defaults to immediate.
    pub async fn set_trigger_source(&self, source: Option<&str>) -> Result<(), DriverError> {
        let source = source.unwrap_or("IMMEDIATE");
        let keyword = trigger_keyword(source).ok_or_else(|| {
            DriverError::invalid_parameter(
                self.object(),
                format!("invalid trigger source '{source}'"),
            )
        })?;
        self.scpi.write(&format!("TRIG:SOUR {keyword}")).await
    }

    /// Number of triggers to accept before returning to idle (1-50000).
    pub async fn set_trigger_count(&self, count: i64) -> Result<(), DriverError> {
        if !(1..=MAX_TRIGGER_COUNT).contains(&count) {
            return Err(DriverError::invalid_parameter(
                self.object(),
                format!("trigger count {count} outside 1-{MAX_TRIGGER_COUNT}"),
            ));
        }
        self.scpi.write(&format!("TRIG:COUNt {count}")).await
    }

    /// Readings taken per trigger (1-50000).
    pub async fn set_sample_count(&self, count: i64) -> Result<(), DriverError> {
        if !(1..=MAX_TRIGGER_COUNT).contains(&count) {
            return Err(DriverError::invalid_parameter(
                self.object(),
                format!("sample count {count} outside 1-{MAX_TRIGGER_COUNT}"),
            ));
        }
        self.scpi.write(&format!("SAMP:COUN {count}")).await
    }

    /// Delay between trigger and sample in seconds; `None` restores the
    /// automatic delay.
    pub async fn set_trigger_delay(&self, delay: Option<f64>) -> Result<(), DriverError> {
        match delay {
            Some(d) if d < 0.0 => Err(DriverError::invalid_parameter(
                self.object(),
                format!("trigger delay {d} s is negative"),
            )),
            Some(d) => self.scpi.write(&format!("TRIG:DELay {d}")).await,
            None => self.scpi.write("TRIG:DELay:AUTO ON").await,
        }
    }
}

#[async_trait]
impl Driver for Hp34401a {
    fn object(&self) -> &str {
        self.scpi.object()
    }

    fn command_tables(&self) -> &'static [&'static [CommandSpec]] {
        TABLES
    }

    async fn invoke(&self, method: &str, args: BoundArguments<'_>) -> Result<(), DriverError> {
        let object = self.object();
        match method {
            "set_mode" => self.set_mode(require(object, "mode", args.string("mode"))?).await,
            "set_trigger_source" => self.set_trigger_source(args.string("source")).await,
            "set_trigger_count" => {
                self.set_trigger_count(require(object, "count", args.integer("count"))?)
                    .await
            }
            "set_sample_count" => {
                self.set_sample_count(require(object, "count", args.integer("count"))?)
                    .await
            }
            "set_trigger_delay" => self.set_trigger_delay(args.number("delay")).await,
            "init" => Multimeter::init(self).await,
            "abort" => Multimeter::abort(self).await,
            "set_local" => Driver::set_local(self).await,
            other => {
                if self.scpi.invoke_common(other, args).await? {
                    Ok(())
                } else {
                    Err(unknown_command(object, other))
                }
            }
        }
    }

    fn session(&self) -> &SessionHandle {
        self.scpi.session()
    }

    /// Remote interfaces need `SYST:LOC`; GPIB uses the bus go-to-local.
    async fn set_local(&self) -> Result<(), DriverError> {
        match self.session().address().kind() {
            crate::address::TransportKind::Gpib => self
                .session()
                .go_to_local()
                .await
                .map_err(|e| DriverError::transport(self.object(), e)),
            _ => self.scpi.write("SYSTem:LOCal").await,
        }
    }
}

#[async_trait]
impl Multimeter for Hp34401a {
    async fn init(&self) -> Result<(), DriverError> {
        self.scpi.write("INITiate").await
    }

    async fn fetch_data(&self) -> Result<Vec<f64>, DriverError> {
        let reply = self.scpi.query("FETC?").await?;
        let readings = parse_f64_list(self.object(), &reply)?;
        Ok(readings.into_iter().map(|r| r * self.factor).collect())
    }

    async fn abort(&self) -> Result<(), DriverError> {
        self.scpi.write("ABORt").await
    }

    async fn reset(&self) -> Result<(), DriverError> {
        self.scpi.write("*RST").await
    }

    async fn measure_voltage(&self) -> Result<f64, DriverError> {
        Ok(self.scpi.query_f64("MEAS:VOLT:DC?").await? * self.factor)
    }
}

/// Factory for one 34401A-family object name.
#[derive(Debug, Clone, Copy)]
pub struct Hp34401aFactory {
    model: &'static str,
}

impl Hp34401aFactory {
    /// Factory for `HP_34401A`.
    pub const fn hp_34401a() -> Self {
        Self { model: "34401A" }
    }

    /// Factory for `Keysight_34461A`.
    pub const fn keysight_34461a() -> Self {
        Self { model: "34461A" }
    }
}

impl DriverFactory for Hp34401aFactory {
    fn command_tables(&self) -> &'static [&'static [CommandSpec]] {
        TABLES
    }

    fn build(&self, ctx: BuildContext) -> BoxFuture<'static, Result<Instrument, DriverError>> {
        let model = self.model;
        Box::pin(async move {
            let factor = match ctx.options.get("factor") {
                None => 1.0,
                Some(Value::Number(n)) => n.as_f64().unwrap_or(1.0),
                Some(other) => {
                    return Err(DriverError::new(
                        &ctx.object,
                        DriverErrorKind::Construction,
                        format!("option 'factor' must be a number, got {other}"),
                    ))
                }
            };
            let scpi = ScpiCore::from_context(&ctx, model, &["factor"]).await?;
            Ok(Instrument::Multimeter(Arc::new(Hp34401a { scpi, factor })))
        })
    }
}
