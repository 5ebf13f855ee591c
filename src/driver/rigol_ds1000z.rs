//! Rigol DS1000Z four-channel oscilloscope.

use super::capabilities::Oscilloscope;
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
pub const OBJECT: &str = "Rigol_DS1000Z";

const CHANNELS: std::ops::RangeInclusive<i64> = 1..=4;

const SCALE_PARAMS: &[ParamSpec] = &[ParamSpec::required("scale", ArgKind::Number)];
const CHANNEL_SCALE_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("channel", ArgKind::Integer),
    ParamSpec::required("scale", ArgKind::Number),
];
const CHANNEL_OFFSET_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("channel", ArgKind::Integer),
    ParamSpec::required("offset", ArgKind::Number),
];
const CHANNEL_ENABLE_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("channel", ArgKind::Integer),
    ParamSpec::required("enable", ArgKind::Boolean),
];

/// Oscilloscope commands of the DS1000Z.
pub const OSCILLOSCOPE_COMMANDS: &[CommandSpec] = &[
    CommandSpec::new("autoscale", &[]),
    CommandSpec::new("trigger_run", &[]),
    CommandSpec::new("trigger_stop", &[]),
    CommandSpec::new("trigger_single", &[]),
    CommandSpec::new("trigger_force", &[]),
    CommandSpec::new("clear", &[]),
    CommandSpec::new("set_horizontal_scale", SCALE_PARAMS),
    CommandSpec::new("set_channel_scale", CHANNEL_SCALE_PARAMS),
    CommandSpec::new("set_channel_offset", CHANNEL_OFFSET_PARAMS),
    CommandSpec::new("set_channel_enable", CHANNEL_ENABLE_PARAMS),
];

const TABLES: &[&[CommandSpec]] = &[COMMON_COMMANDS, OSCILLOSCOPE_COMMANDS];

/// DS1000Z driver.
#[derive(Debug)]
pub struct RigolDs1000z {
    scpi: ScpiCore,
}

impl RigolDs1000z {
    /// Wrap an open session without any checks.
    pub fn new(session: SessionHandle) -> Self {
        Self {
            scpi: ScpiCore::new(OBJECT, session),
        }
    }

    fn channel(&self, channel: i64) -> Result<i64, DriverError> {
        if CHANNELS.contains(&channel) {
            Ok(channel)
        } else {
            Err(DriverError::invalid_parameter(
                OBJECT,
                format!("channel {channel} outside 1-4"),
            ))
        }
    }

    /// Let the scope pick scales and trigger level.
    pub async fn autoscale(&self) -> Result<(), DriverError> {
        self.scpi.write(":AUToscale").await
    }

    /// Force a trigger.
    pub async fn trigger_force(&self) -> Result<(), DriverError> {
        self.scpi.write(":TFORce").await
    }

    /// Clear all waveforms from the screen.
    pub async fn clear(&self) -> Result<(), DriverError> {
        self.scpi.write(":CLEar").await
    }

    /// Current horizontal scale in seconds per division.
    pub async fn horizontal_scale(&self) -> Result<f64, DriverError> {
        self.scpi.query_f64(":TIMebase:SCALe?").await
    }

    /// Vertical scale of a channel in volts per division.
    pub async fn set_channel_scale(&self, channel: i64, scale: f64) -> Result<(), DriverError> {
        let channel = self.channel(channel)?;
        self.scpi
            .write(&format!(":CHANnel{channel}:SCALe {scale}"))
            .await
    }

    /// Current vertical scale of a channel.
    pub async fn channel_scale(&self, channel: i64) -> Result<f64, DriverError> {
        let channel = self.channel(channel)?;
        self.scpi
            .query_f64(&format!(":CHANnel{channel}:SCALe?"))
            .await
    }

    /// Vertical offset of a channel in volts.
    pub async fn set_channel_offset(&self, channel: i64, offset: f64) -> Result<(), DriverError> {
        let channel = self.channel(channel)?;
        self.scpi
            .write(&format!(":CHANnel{channel}:OFFSet {offset}"))
            .await
    }

    /// Show or hide a channel.
    pub async fn set_channel_enable(&self, channel: i64, enable: bool) -> Result<(), DriverError> {
        let channel = self.channel(channel)?;
        self.scpi
            .write(&format!(":CHANnel{channel}:DISPlay {}", u8::from(enable)))
            .await
    }
}

#[async_trait]
impl Driver for RigolDs1000z {
    fn object(&self) -> &str {
        self.scpi.object()
    }

    fn command_tables(&self) -> &'static [&'static [CommandSpec]] {
        TABLES
    }

    async fn invoke(&self, method: &str, args: BoundArguments<'_>) -> Result<(), DriverError> {
        let channel = || require(OBJECT, "channel", args.integer("channel"));
        match method {
            "autoscale" => self.autoscale().await,
            "trigger_run" => self.trigger_run().await,
            "trigger_stop" => self.trigger_stop().await,
            "trigger_single" => self.trigger_single().await,
            "trigger_force" => self.trigger_force().await,
            "clear" => self.clear().await,
            "set_horizontal_scale" => {
                self.set_horizontal_scale(require(OBJECT, "scale", args.number("scale"))?)
                    .await
            }
            "set_channel_scale" => {
                let scale = require(OBJECT, "scale", args.number("scale"))?;
                self.set_channel_scale(channel()?, scale).await
            }
            "set_channel_offset" => {
                let offset = require(OBJECT, "offset", args.number("offset"))?;
                self.set_channel_offset(channel()?, offset).await
            }
            "set_channel_enable" => {
                let enable = require(OBJECT, "enable", args.boolean("enable"))?;
                self.set_channel_enable(channel()?, enable).await
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
impl Oscilloscope for RigolDs1000z {
    async fn trigger_run(&self) -> Result<(), DriverError> {
        self.scpi.write(":RUN").await
    }

    async fn trigger_stop(&self) -> Result<(), DriverError> {
        self.scpi.write(":STOP").await
    }

    async fn trigger_single(&self) -> Result<(), DriverError> {
        self.scpi.write(":SINGle").await
    }

    async fn set_horizontal_scale(&self, scale: f64) -> Result<(), DriverError> {
        if scale <= 0.0 {
            return Err(DriverError::invalid_parameter(
                OBJECT,
                format!("horizontal scale {scale} must be positive"),
            ));
        }
        self.scpi.write(&format!(":TIMebase:SCALe {scale}")).await
    }
}

/// Factory registered as `oscilloscope` / `Rigol_DS1000Z`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RigolDs1000zFactory;

impl DriverFactory for RigolDs1000zFactory {
    fn command_tables(&self) -> &'static [&'static [CommandSpec]] {
        TABLES
    }

    fn build(&self, ctx: BuildContext) -> BoxFuture<'static, Result<Instrument, DriverError>> {
        Box::pin(async move {
            let scpi = ScpiCore::from_context(&ctx, "DS1", &[]).await?;
            Ok(Instrument::Oscilloscope(Arc::new(RigolDs1000z { scpi })))
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
    use serde_json::{json, Value};

    const ADDR: &str = "USB0::0x1AB1::0x04CE::DS1ZA000000001::INSTR";

    async fn scope(transport: &SimulatedTransport) -> RigolDs1000z {
        let address = ResourceAddress::parse(ADDR).unwrap();
        RigolDs1000z::new(SessionHandle::open(transport, &address).await.unwrap())
    }

    async fn call(scope: &RigolDs1000z, method: &str, raw: Value) -> Result<(), DriverError> {
        let args = match raw {
            Value::Object(map) => map,
            _ => Arguments::new(),
        };
        let spec = scope.command(method).unwrap();
        scope.invoke(method, spec.bind(&args).unwrap()).await
    }

    #[tokio::test]
    async fn test_setup_sequence() {
        let transport = SimulatedTransport::new();
        let scope = scope(&transport).await;

        call(&scope, "trigger_stop", json!({})).await.unwrap();
        call(&scope, "set_horizontal_scale", json!({"scale": 0.001})).await.unwrap();
        call(&scope, "set_channel_scale", json!({"channel": 2, "scale": 0.5})).await.unwrap();
        call(&scope, "set_channel_enable", json!({"channel": 3, "enable": false}))
            .await
            .unwrap();
        call(&scope, "trigger_single", json!({})).await.unwrap();

        assert_eq!(
            transport.writes_to(ADDR),
            vec![
                ":STOP",
                ":TIMebase:SCALe 0.001",
                ":CHANnel2:SCALe 0.5",
                ":CHANnel3:DISPlay 0",
                ":SINGle",
            ]
        );
    }

    #[tokio::test]
    async fn test_channel_out_of_range() {
        let transport = SimulatedTransport::new();
        let scope = scope(&transport).await;

        let err = call(&scope, "set_channel_offset", json!({"channel": 5, "offset": 0}))
            .await
            .unwrap_err();

        assert_eq!(err.kind, DriverErrorKind::InvalidParameter);
        assert!(transport.writes_to(ADDR).is_empty());
    }
}
