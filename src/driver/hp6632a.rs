//! HP 6632A system DC power supply (0-20 V, 0-5 A).

use super::capabilities::Source;
use super::command::{require, ArgKind, BoundArguments, CommandSpec, ParamSpec};
use super::factory::{BuildContext, DriverFactory};
use super::scpi::{unknown_command, ScpiCore, COMMON_COMMANDS};
use super::{Driver, Instrument};
use crate::error::DriverError;
use crate::session::SessionHandle;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Registered object name.
pub const OBJECT: &str = "HP_6632A";

const SET_VOLTAGE_PARAMS: &[ParamSpec] = &[ParamSpec::required("voltage", ArgKind::Number)];
const SET_CURRENT_PARAMS: &[ParamSpec] = &[ParamSpec::required("current", ArgKind::Number)];
const STATE_PARAMS: &[ParamSpec] = &[ParamSpec::required("state", ArgKind::Boolean)];

/// Source commands of the 6632A.
pub const SOURCE_COMMANDS: &[CommandSpec] = &[
    CommandSpec::new("set_voltage", SET_VOLTAGE_PARAMS),
    CommandSpec::new("set_current", SET_CURRENT_PARAMS),
    CommandSpec::new("on", &[]),
    CommandSpec::new("off", &[]),
    CommandSpec::new("set_state", STATE_PARAMS),
    CommandSpec::new("set_ocp_state", STATE_PARAMS),
];

const TABLES: &[&[CommandSpec]] = &[COMMON_COMMANDS, SOURCE_COMMANDS];

fn flag(state: bool) -> u8 {
    u8::from(state)
}

/// HP 6632A driver.
#[derive(Debug)]
pub struct Hp6632a {
    scpi: ScpiCore,
}

impl Hp6632a {
    /// Wrap an open session without any checks.
    pub fn new(session: SessionHandle) -> Self {
        Self {
            scpi: ScpiCore::new(OBJECT, session),
        }
    }

    /// Enable or disable the output.
    pub async fn set_state(&self, state: bool) -> Result<(), DriverError> {
        self.scpi.write(&format!("OUTP:STAT {}", flag(state))).await
    }

    /// Enable or disable over-current protection.
    pub async fn set_ocp_state(&self, state: bool) -> Result<(), DriverError> {
        self.scpi
            .write(&format!("SOUR:CURR:PROT:STATE {}", flag(state)))
            .await
    }

    /// Whether over-current protection is enabled.
    pub async fn ocp_state(&self) -> Result<bool, DriverError> {
        Ok(self.scpi.query_f64("SOUR:CURR:PROT:STATE?").await? != 0.0)
    }

    /// Over-voltage protection limit in volts.
    pub async fn voltage_limit(&self) -> Result<f64, DriverError> {
        self.scpi.query_f64("SOUR:VOLT:PROT?").await
    }
}

#[async_trait]
impl Driver for Hp6632a {
    fn object(&self) -> &str {
        self.scpi.object()
    }

    fn command_tables(&self) -> &'static [&'static [CommandSpec]] {
        TABLES
    }

    async fn invoke(&self, method: &str, args: BoundArguments<'_>) -> Result<(), DriverError> {
        match method {
            "set_voltage" => {
                Source::set_voltage(self, require(OBJECT, "voltage", args.number("voltage"))?).await
            }
            "set_current" => {
                Source::set_current(self, require(OBJECT, "current", args.number("current"))?).await
            }
            "on" => Source::on(self).await,
            "off" => Source::off(self).await,
            "set_state" => self.set_state(require(OBJECT, "state", args.boolean("state"))?).await,
            "set_ocp_state" => {
                self.set_ocp_state(require(OBJECT, "state", args.boolean("state"))?)
                    .await
            }
            "set_local" => Driver::set_local(self).await,
            other => {
                if self.scpi.invoke_common(other, args).await? {
                    Ok(())
                } else {
                    Err(unknown_command(OBJECT, other))
                }
            }
        }
    }

    fn session(&self) -> &SessionHandle {
        self.scpi.session()
    }
}

#[async_trait]
impl Source for Hp6632a {
    async fn set_voltage(&self, voltage: f64) -> Result<(), DriverError> {
        if !(0.0..=20.475).contains(&voltage) {
            return Err(DriverError::invalid_parameter(
                OBJECT,
                format!("voltage {voltage} V outside 0-20.475 V"),
            ));
        }
        self.scpi.write(&format!("SOUR:VOLT:LEV {voltage}")).await
    }

    async fn voltage(&self) -> Result<f64, DriverError> {
        self.scpi.query_f64("SOUR:VOLT:LEV?").await
    }

    async fn set_current(&self, current: f64) -> Result<(), DriverError> {
        if !(0.0..=5.1188).contains(&current) {
            return Err(DriverError::invalid_parameter(
                OBJECT,
                format!("current {current} A outside 0-5.1188 A"),
            ));
        }
        self.scpi.write(&format!("SOUR:CURR:LEV {current}")).await
    }

    async fn current(&self) -> Result<f64, DriverError> {
        self.scpi.query_f64("SOUR:CURR:LEV?").await
    }

    async fn on(&self) -> Result<(), DriverError> {
        self.set_state(true).await
    }

    async fn off(&self) -> Result<(), DriverError> {
        self.set_state(false).await
    }

    async fn is_on(&self) -> Result<bool, DriverError> {
        Ok(self.scpi.query_f64("OUTP:STAT?").await? != 0.0)
    }

    async fn measure_voltage(&self) -> Result<f64, DriverError> {
        self.scpi.query_f64("MEAS:VOLT?").await
    }

    async fn measure_current(&self) -> Result<f64, DriverError> {
        self.scpi.query_f64("MEAS:CURR?").await
    }
}

/// Factory registered as `source` / `HP_6632A`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Hp6632aFactory;

impl DriverFactory for Hp6632aFactory {
    fn command_tables(&self) -> &'static [&'static [CommandSpec]] {
        TABLES
    }

    fn build(&self, ctx: BuildContext) -> BoxFuture<'static, Result<Instrument, DriverError>> {
        Box::pin(async move {
            let scpi = ScpiCore::from_context(&ctx, "6632A", &[]).await?;
            Ok(Instrument::Source(Arc::new(Hp6632a { scpi })))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::ResourceAddress;
    use crate::driver::command::Arguments;
    use crate::error::DriverErrorKind;
    use crate::transport::SimulatedTransport;
    use serde_json::json;

    const ADDR: &str = "GPIB0::14::INSTR";

    async fn driver(transport: &SimulatedTransport) -> Hp6632a {
        let address = ResourceAddress::parse(ADDR).unwrap();
        Hp6632a::new(SessionHandle::open(transport, &address).await.unwrap())
    }

    fn args(value: serde_json::Value) -> Arguments {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[tokio::test]
    async fn test_invoke_by_name_writes_scpi() {
        let transport = SimulatedTransport::new();
        let psu = driver(&transport).await;

        let a = args(json!({"voltage": 12.5}));
        let spec = psu.command("set_voltage").unwrap();
        psu.invoke("set_voltage", spec.bind(&a).unwrap()).await.unwrap();

        let none = Arguments::new();
        let spec = psu.command("off").unwrap();
        psu.invoke("off", spec.bind(&none).unwrap()).await.unwrap();

        assert_eq!(
            transport.writes_to(ADDR),
            vec!["SOUR:VOLT:LEV 12.5".to_string(), "OUTP:STAT 0".to_string()]
        );
    }

    #[tokio::test]
    async fn test_voltage_out_of_range_is_rejected() {
        let transport = SimulatedTransport::new();
        let psu = driver(&transport).await;

        let err = Source::set_voltage(&psu, 30.0).await.unwrap_err();

        assert_eq!(err.kind, DriverErrorKind::InvalidParameter);
        assert!(transport.writes_to(ADDR).is_empty());
    }

    #[tokio::test]
    async fn test_measurements_parse_replies() {
        let transport = SimulatedTransport::new();
        transport.queue_response(ADDR, "+5.00120E+00");
        transport.queue_response(ADDR, "1");
        let psu = driver(&transport).await;

        assert_eq!(Source::measure_voltage(&psu).await.unwrap(), 5.0012);
        assert!(Source::is_on(&psu).await.unwrap());
    }

    #[tokio::test]
    async fn test_common_commands_are_reachable() {
        let transport = SimulatedTransport::new();
        let psu = driver(&transport).await;

        let none = Arguments::new();
        let spec = psu.command("rst").unwrap();
        psu.invoke("rst", spec.bind(&none).unwrap()).await.unwrap();

        assert!(psu.command("trigger_run").is_none());
        assert_eq!(transport.writes_to(ADDR), vec!["*RST".to_string()]);
    }
}
