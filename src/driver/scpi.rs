//! Common SCPI plumbing for the bundled drivers.
//!
//! [`ScpiCore`] wraps the session with driver-scoped error mapping and
//! handles the constructor options every SCPI driver accepts:
//!
//! - `timeout_ms` (integer): session I/O timeout to apply before first use
//! - `verify_identity` (boolean): query `*IDN?` and reject the session when
//!   the reply does not name the expected model
//!
//! The commands in [`COMMON_COMMANDS`] are answered by [`ScpiCore::invoke_common`].

use super::command::{require, ArgKind, BoundArguments, CommandSpec, ParamSpec};
use super::factory::BuildContext;
use crate::error::{DriverError, DriverErrorKind};
use crate::session::SessionHandle;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const WRITE_PARAMS: &[ParamSpec] = &[ParamSpec::required("command", ArgKind::String)];
const SET_TIMEOUT_PARAMS: &[ParamSpec] = &[ParamSpec::required("timeout_ms", ArgKind::Integer)];

/// Commands every SCPI driver accepts.
pub const COMMON_COMMANDS: &[CommandSpec] = &[
    CommandSpec::new("cls", &[]),
    CommandSpec::new("rst", &[]),
    CommandSpec::new("write", WRITE_PARAMS),
    CommandSpec::new("set_timeout", SET_TIMEOUT_PARAMS),
    CommandSpec::new("set_local", &[]),
];

/// Constructor options shared by SCPI drivers.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScpiOptions {
    /// Session timeout in milliseconds
    pub timeout_ms: Option<u64>,
    /// Check the `*IDN?` reply against the model name
    pub verify_identity: bool,
}

/// Session plus driver name, with SCPI helpers.
#[derive(Debug, Clone)]
pub struct ScpiCore {
    object: String,
    session: SessionHandle,
}

impl ScpiCore {
    /// Wrap a session without touching it.
    pub fn new(object: impl Into<String>, session: SessionHandle) -> Self {
        Self {
            object: object.into(),
            session,
        }
    }

    /// Build from a factory context, applying the common options.
    ///
    /// `extra` names driver-specific option keys that are removed before the
    /// common options are parsed; the caller reads them from `ctx.options`.
    /// `model` is the substring `verify_identity` looks for in the `*IDN?`
    /// reply.
    pub async fn from_context(
        ctx: &BuildContext,
        model: &str,
        extra: &[&str],
    ) -> Result<Self, DriverError> {
        let mut common = ctx.options.clone();
        common.retain(|key, _| !extra.contains(&key.as_str()));
        let options: ScpiOptions = serde_json::from_value(serde_json::Value::Object(common))
            .map_err(|e| {
                DriverError::new(
                    &ctx.object,
                    DriverErrorKind::Construction,
                    format!("invalid constructor options: {e}"),
                )
            })?;

        let core = Self::new(&ctx.object, ctx.session.clone());

        if let Some(ms) = options.timeout_ms {
            core.set_timeout(ms).await?;
        }

        if options.verify_identity {
            let idn = core.idn().await?;
            if !idn.contains(model) {
                return Err(DriverError::new(
                    &ctx.object,
                    DriverErrorKind::Construction,
                    format!("expected a {model}, instrument identifies as '{idn}'"),
                ));
            }
            debug!(object = %ctx.object, %idn, "Instrument identity verified");
        }

        Ok(core)
    }

    /// Driver type name.
    pub fn object(&self) -> &str {
        &self.object
    }

    /// Underlying session.
    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Send a command.
    pub async fn write(&self, command: &str) -> Result<(), DriverError> {
        self.session
            .write(command)
            .await
            .map_err(|e| DriverError::transport(&self.object, e))
    }

    /// Send a query and return the trimmed reply.
    pub async fn query(&self, command: &str) -> Result<String, DriverError> {
        self.session
            .query(command)
            .await
            .map(|reply| reply.trim().to_string())
            .map_err(|e| DriverError::transport(&self.object, e))
    }

    /// Send a query and parse the reply as a number.
    pub async fn query_f64(&self, command: &str) -> Result<f64, DriverError> {
        let reply = self.query(command).await?;
        parse_f64_response(&self.object, &reply)
    }

    /// `*IDN?`
    pub async fn idn(&self) -> Result<String, DriverError> {
        self.query("*IDN?").await
    }

    /// Change the session timeout.
    pub async fn set_timeout(&self, timeout_ms: u64) -> Result<(), DriverError> {
        if timeout_ms == 0 {
            return Err(DriverError::invalid_parameter(
                &self.object,
                "timeout_ms must be positive",
            ));
        }
        self.session
            .set_timeout(Duration::from_millis(timeout_ms))
            .await
            .map_err(|e| DriverError::transport(&self.object, e))
    }

    /// Run one of [`COMMON_COMMANDS`].
    ///
    /// Returns `Ok(false)` when `method` is not a common command. `set_local`
    /// also returns `Ok(false)`: drivers answer it with their own
    /// [`Driver::set_local`](super::Driver::set_local).
    pub async fn invoke_common(
        &self,
        method: &str,
        args: BoundArguments<'_>,
    ) -> Result<bool, DriverError> {
        match method {
            "cls" => self.write("*CLS").await?,
            "rst" => self.write("*RST").await?,
            "write" => {
                let command = require(&self.object, "command", args.string("command"))?;
                self.write(command).await?
            }
            "set_timeout" => {
                let ms = require(&self.object, "timeout_ms", args.integer("timeout_ms"))?;
                let ms = u64::try_from(ms).map_err(|_| {
                    DriverError::invalid_parameter(&self.object, "timeout_ms must be positive")
                })?;
                self.set_timeout(ms).await?
            }
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// Parse a numeric SCPI reply.
pub fn parse_f64_response(object: &str, response: &str) -> Result<f64, DriverError> {
    response.trim().parse::<f64>().map_err(|_| {
        DriverError::new(
            object,
            DriverErrorKind::Communication,
            format!("failed to parse SCPI response as number: '{response}'"),
        )
    })
}

/// Parse a comma separated list of numeric readings.
pub fn parse_f64_list(object: &str, response: &str) -> Result<Vec<f64>, DriverError> {
    let body = response.trim();
    if body.is_empty() {
        return Ok(Vec::new());
    }
    body.split(',')
        .map(|field| parse_f64_response(object, field))
        .collect()
}

/// Reject an operation a driver does not implement.
pub fn unknown_command(object: &str, method: &str) -> DriverError {
    DriverError::new(
        object,
        DriverErrorKind::Unsupported,
        format!("no command named '{method}'"),
    )
}
