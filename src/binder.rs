//! Instrument binder.
//!
//! Turns one configuration entry into a connected driver, in four steps:
//!
//! 1. Parse the address (no I/O; fails with `AddressFormat`)
//! 2. Resolve `(definition, object)` in the registry (`UnknownDriver`)
//! 3. Open a session through the transport (`Connection`)
//! 4. Build the driver around the session (`DriverConstruction`)
//!
//! A session opened in step 3 is closed again before a step 4 failure is
//! returned. Init steps are not run here; see [`crate::sequencer`].

use crate::address::ResourceAddress;
use crate::document::ConfigEntry;
use crate::driver::{BuildContext, Definition, Instrument};
use crate::error::{BenchError, BenchResult, DriverError, DriverErrorKind};
use crate::registry::DriverRegistry;
use crate::sequencer::InitReport;
use crate::session::{SessionHandle, Transport};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// A bound instrument, owned by the bench table.
pub struct ResolvedInstrument {
    role: String,
    definition: Definition,
    instrument: Instrument,
    session: SessionHandle,
    report: InitReport,
}

impl ResolvedInstrument {
    /// Role name the instrument was configured under.
    pub fn role(&self) -> &str {
        &self.role
    }

    /// Capability namespace.
    pub fn definition(&self) -> Definition {
        self.definition
    }

    /// Driver type name.
    pub fn object(&self) -> &str {
        self.instrument.object()
    }

    /// The driver handle.
    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    /// The open session.
    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Address the session was opened at.
    pub fn address(&self) -> &ResourceAddress {
        self.session.address()
    }

    /// Outcome of the init steps.
    pub fn report(&self) -> &InitReport {
        &self.report
    }

    pub(crate) fn set_report(&mut self, report: InitReport) {
        self.report = report;
    }
}

impl fmt::Debug for ResolvedInstrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedInstrument")
            .field("role", &self.role)
            .field("definition", &self.definition)
            .field("object", &self.object())
            .field("address", &self.address().to_string())
            .field("report", &self.report)
            .finish()
    }
}

/// Binds configuration entries to live drivers.
#[derive(Clone)]
pub struct InstrumentBinder {
    registry: Arc<DriverRegistry>,
    transport: Arc<dyn Transport>,
}

impl InstrumentBinder {
    /// Create a binder over a registry and a transport.
    pub fn new(registry: Arc<DriverRegistry>, transport: Arc<dyn Transport>) -> Self {
        Self {
            registry,
            transport,
        }
    }

    /// Registry used for resolution.
    pub fn registry(&self) -> &DriverRegistry {
        &self.registry
    }

    /// Bind one entry. Init steps are not applied.
    pub async fn bind(&self, role: &str, entry: &ConfigEntry) -> BenchResult<ResolvedInstrument> {
        let address = ResourceAddress::parse(&entry.address)?;
        let factory = self.registry.resolve(&entry.definition, &entry.object)?;
        let definition = Definition::from_name(&entry.definition).ok_or_else(|| {
            BenchError::UnknownDriver {
                definition: entry.definition.clone(),
                object: entry.object.clone(),
            }
        })?;

        let session = SessionHandle::open(self.transport.as_ref(), &address)
            .await
            .map_err(|source| BenchError::Connection {
                address: entry.address.clone(),
                source,
            })?;
        debug!(%address, transport = self.transport.name(), "Session opened");

        let ctx = BuildContext::new(&entry.object, session.clone()).with_options(entry.kwargs.clone());
        let built = factory.build(ctx).await.and_then(|instrument| {
            if instrument.definition() == definition {
                Ok(instrument)
            } else {
                Err(DriverError::new(
                    &entry.object,
                    DriverErrorKind::Construction,
                    format!(
                        "factory built a {} driver for definition '{}'",
                        instrument.definition(),
                        definition
                    ),
                ))
            }
        });

        let instrument = match built {
            Ok(instrument) => instrument,
            Err(source) => {
                if let Err(e) = session.close().await {
                    warn!(%address, error = %e, "Failed to close rejected session");
                }
                return Err(BenchError::DriverConstruction {
                    object: entry.object.clone(),
                    address: entry.address.clone(),
                    source,
                });
            }
        };

        debug!(object = %entry.object, %definition, "Driver constructed");
        Ok(ResolvedInstrument {
            role: role.to_string(),
            definition,
            instrument,
            session,
            report: InitReport::default(),
        })
    }
}

impl fmt::Debug for InstrumentBinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentBinder")
            .field("registry", &self.registry)
            .field("transport", &self.transport.name())
            .finish()
    }
}
