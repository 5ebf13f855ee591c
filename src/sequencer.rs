//! Initialization sequencer.
//!
//! Runs an entry's init steps against its freshly bound driver, strictly in
//! the order they were written. Each step is resolved by name in the driver's
//! command tables, its arguments are bound against the command's parameters,
//! and only then is the driver called.
//!
//! Applied steps are never rolled back. Nothing is retried here; retries
//! belong to the transport.

use crate::document::InitStep;
use crate::driver::command::{find_command, BoundArguments, CommandSpec};
use crate::driver::Instrument;
use crate::error::{BenchError, BenchResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// What to do when an init step fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop at the first failing step and fail the entry.
    #[default]
    FailFast,
    /// Record the failure in the entry's [`InitReport`] and keep going.
    ContinueOnError,
}

impl FailurePolicy {
    /// Policy name as used in settings.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::FailFast => "fail_fast",
            FailurePolicy::ContinueOnError => "continue_on_error",
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fail_fast" => Ok(FailurePolicy::FailFast),
            "continue_on_error" => Ok(FailurePolicy::ContinueOnError),
            other => Err(format!(
                "unknown failure policy '{other}' (expected fail_fast or continue_on_error)"
            )),
        }
    }
}

/// Outcome of one entry's init steps.
#[derive(Debug, Default)]
pub struct InitReport {
    /// Steps that completed
    pub applied: usize,
    /// Steps that failed and were tolerated
    pub failures: Vec<BenchError>,
}

impl InitReport {
    /// Whether every step completed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Resolve a step by name and bind its arguments without calling anything.
fn bind_step<'a>(
    tables: &'static [&'static [CommandSpec]],
    object: &str,
    index: usize,
    step: &'a InitStep,
) -> BenchResult<BoundArguments<'a>> {
    let spec = find_command(tables, &step.method).ok_or_else(|| BenchError::UnknownMethod {
        step: index,
        method: step.method.clone(),
        object: object.to_string(),
    })?;
    spec.bind(&step.arguments)
        .map_err(|reason| BenchError::ArgumentBinding {
            step: index,
            method: step.method.clone(),
            reason,
        })
}

/// Applies init steps under a failure policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct InitSequencer {
    policy: FailurePolicy,
}

impl InitSequencer {
    /// Sequencer with the given policy.
    pub fn new(policy: FailurePolicy) -> Self {
        Self { policy }
    }

    /// Active policy.
    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Check steps against command tables without touching a driver.
    ///
    /// Fails on the first unknown method or unbindable argument set.
    pub fn check(
        tables: &'static [&'static [CommandSpec]],
        object: &str,
        steps: &[InitStep],
    ) -> BenchResult<()> {
        for (index, step) in steps.iter().enumerate() {
            bind_step(tables, object, index, step)?;
        }
        Ok(())
    }

    /// Run `steps` in order against `instrument`.
    ///
    /// Under [`FailurePolicy::FailFast`] the first failure is returned and
    /// later steps are not run. Under [`FailurePolicy::ContinueOnError`]
    /// failures are collected in the report and the call succeeds.
    pub async fn apply(&self, instrument: &Instrument, steps: &[InitStep]) -> BenchResult<InitReport> {
        let mut report = InitReport::default();
        let tables = instrument.command_tables();

        for (index, step) in steps.iter().enumerate() {
            let outcome = match bind_step(tables, instrument.object(), index, step) {
                Ok(args) => instrument
                    .invoke(&step.method, args)
                    .await
                    .map_err(|source| BenchError::InitStep {
                        step: index,
                        method: step.method.clone(),
                        source,
                    }),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(()) => {
                    debug!(step = index, method = %step.method, "Init step applied");
                    report.applied += 1;
                }
                Err(e) if self.policy == FailurePolicy::ContinueOnError => {
                    warn!(step = index, method = %step.method, error = %e, "Init step failed, continuing");
                    report.failures.push(e);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::ResourceAddress;
    use crate::driver::command::Arguments;
    use crate::driver::mock::MockFactory;
    use crate::driver::{BuildContext, Definition, DriverFactory};
    use crate::session::SessionHandle;
    use crate::transport::SimulatedTransport;
    use serde_json::json;

    async fn mock_source(factory: &MockFactory) -> Instrument {
        let address = ResourceAddress::parse("GPIB0::14::INSTR").unwrap();
        let session = SessionHandle::open(&SimulatedTransport::new(), &address)
            .await
            .unwrap();
        factory.build(BuildContext::new("X", session)).await.unwrap()
    }

    fn step(method: &str, args: serde_json::Value) -> InitStep {
        match args {
            serde_json::Value::Object(map) => InitStep::new(method, map),
            _ => InitStep::new(method, Arguments::new()),
        }
    }

    #[tokio::test]
    async fn test_steps_run_in_document_order() {
        let factory = MockFactory::new(Definition::Source);
        let src = mock_source(&factory).await;
        let steps = vec![
            step("set_current", json!({"current": 1.5})),
            step("set_voltage", json!({"voltage": 5})),
            step("on", json!({})),
        ];

        let report = InitSequencer::default().apply(&src, &steps).await.unwrap();

        assert_eq!(report.applied, 3);
        assert!(report.is_clean());
        assert_eq!(
            factory.calls(),
            vec!["set_current(current=1.5)", "set_voltage(voltage=5)", "on()"]
        );
    }

    #[tokio::test]
    async fn test_fail_fast_stops_at_first_failure() {
        let factory = MockFactory::new(Definition::Source);
        factory.fail_method("off");
        let src = mock_source(&factory).await;
        let steps = vec![
            step("set_voltage", json!({"voltage": 0})),
            step("off", json!({})),
            step("on", json!({})),
        ];

        let err = InitSequencer::default().apply(&src, &steps).await.unwrap_err();

        assert!(matches!(err, BenchError::InitStep { step: 1, ref method, .. } if method == "off"));
        assert_eq!(factory.calls(), vec!["set_voltage(voltage=0)", "off()"]);
    }

    #[tokio::test]
    async fn test_unknown_method_is_not_invoked() {
        let factory = MockFactory::new(Definition::Source);
        let src = mock_source(&factory).await;

        let err = InitSequencer::default()
            .apply(&src, &[step("explode", json!({}))])
            .await
            .unwrap_err();

        assert!(matches!(err, BenchError::UnknownMethod { step: 0, .. }));
        assert!(factory.calls().is_empty());
    }

    #[tokio::test]
    async fn test_argument_type_mismatch() {
        let factory = MockFactory::new(Definition::Source);
        let src = mock_source(&factory).await;
        let steps = vec![step("on", json!({})), step("set_voltage", json!({"voltage": "0"}))];

        let err = InitSequencer::default().apply(&src, &steps).await.unwrap_err();

        assert!(matches!(err, BenchError::ArgumentBinding { step: 1, .. }));
        assert_eq!(factory.calls(), vec!["on()"]);
    }

    #[tokio::test]
    async fn test_continue_on_error_collects_failures() {
        let factory = MockFactory::new(Definition::Source);
        factory.fail_method("set_voltage");
        let src = mock_source(&factory).await;
        let steps = vec![
            step("set_voltage", json!({"voltage": 3.3})),
            step("bogus", json!({})),
            step("on", json!({})),
        ];

        let report = InitSequencer::new(FailurePolicy::ContinueOnError)
            .apply(&src, &steps)
            .await
            .unwrap();

        assert_eq!(report.applied, 1);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[1].step(), Some(1));
        assert_eq!(factory.calls(), vec!["set_voltage(voltage=3.3)", "on()"]);
    }

    #[test]
    fn test_check_validates_without_a_driver() {
        let factory = MockFactory::new(Definition::Multimeter);
        let tables = factory.command_tables();

        assert!(InitSequencer::check(tables, "X", &[step("init", json!({}))]).is_ok());
        let err = InitSequencer::check(tables, "X", &[step("set_mode", json!({}))]).unwrap_err();
        assert!(matches!(err, BenchError::ArgumentBinding { ref reason, .. } if reason.contains("mode")));
    }

    #[test]
    fn test_policy_names() {
        assert_eq!(
            "continue_on_error".parse::<FailurePolicy>(),
            Ok(FailurePolicy::ContinueOnError)
        );
        assert!("FailFast".parse::<FailurePolicy>().is_err());
        assert_eq!(FailurePolicy::default().to_string(), "fail_fast");
    }
}
