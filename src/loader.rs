//! Configuration loader.
//!
//! Loads a whole [`ConfigurationDocument`] into a [`Bench`]: role names are
//! checked for uniqueness, then each entry is bound and initialized strictly
//! in document order, one at a time.
//!
//! # Failure handling
//!
//! A load either returns every selected role or nothing. When an entry fails
//! to bind or initialize, its own session is closed, every session opened
//! earlier in the same call is closed in reverse order of acquisition, and
//! the error is returned wrapped in [`BenchError::Role`]. The only tolerated
//! failures are init steps under [`FailurePolicy::ContinueOnError`], which
//! are kept in the entry's [`InitReport`].
//!
//! # Example
//!
//! ```
//! use lab_bench::document::ConfigurationDocument;
//! use lab_bench::loader::ConfigurationLoader;
//! use lab_bench::registry::DriverRegistry;
//! use lab_bench::transport::SimulatedTransport;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let registry = Arc::new(DriverRegistry::with_builtin_drivers().unwrap());
//! let loader = ConfigurationLoader::new(registry, Arc::new(SimulatedTransport::new()));
//!
//! let document = ConfigurationDocument::from_json_str(r#"{
//!     "v_in": {
//!         "object": "HP_6632A",
//!         "definition": "source",
//!         "address": "GPIB0::14::INSTR",
//!         "init": [["set_voltage", {"voltage": 0}], ["off", {}]]
//!     }
//! }"#).unwrap();
//!
//! let bench = loader.load(document).await.unwrap();
//! assert!(bench.source("v_in").is_some());
//! bench.release().await.unwrap();
//! # })
//! ```

use crate::address::ResourceAddress;
use crate::binder::{InstrumentBinder, ResolvedInstrument};
use crate::document::{ConfigEntry, ConfigurationDocument};
use crate::driver::{Definition, Instrument, Multimeter, Oscilloscope, PowerMeter, Sink, Source};
use crate::error::{BenchError, BenchResult, DriverError, TransportError};
use crate::registry::DriverRegistry;
use crate::sequencer::{FailurePolicy, InitSequencer};
use crate::session::Transport;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::Instrument as _;
use tracing::{debug, info, info_span, warn};

/// Options for one load.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Run each entry's init steps (default `true`).
    pub init_devices: bool,
    /// How init step failures are handled.
    pub failure_policy: FailurePolicy,
    /// Load only these roles. `None` loads every role.
    pub roles: Option<Vec<String>>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            init_devices: true,
            failure_policy: FailurePolicy::FailFast,
            roles: None,
        }
    }
}

/// One entry of a preflight plan.
#[derive(Debug, Clone)]
pub struct PlannedEntry {
    /// Role name
    pub role: String,
    /// Capability namespace
    pub definition: Definition,
    /// Driver type name
    pub object: String,
    /// Parsed address
    pub address: ResourceAddress,
    /// Init steps that would run
    pub steps: usize,
}

/// Result of [`ConfigurationLoader::check`]: the entries a load would bind,
/// in order.
#[derive(Debug, Clone, Default)]
pub struct LoadPlan {
    /// Entries in binding order
    pub entries: Vec<PlannedEntry>,
}

/// Loads documents into benches.
#[derive(Debug, Clone)]
pub struct ConfigurationLoader {
    binder: InstrumentBinder,
    options: LoadOptions,
}

impl ConfigurationLoader {
    /// Loader with default options.
    pub fn new(registry: Arc<DriverRegistry>, transport: Arc<dyn Transport>) -> Self {
        Self {
            binder: InstrumentBinder::new(registry, transport),
            options: LoadOptions::default(),
        }
    }

    /// Replace the load options.
    pub fn with_options(mut self, options: LoadOptions) -> Self {
        self.options = options;
        self
    }

    /// Active load options.
    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    /// Pick the entries this load will bind, in document order.
    ///
    /// Fails on a repeated role or a masked role missing from the document.
    fn select<'d>(&self, document: &'d ConfigurationDocument) -> BenchResult<Vec<&'d (String, ConfigEntry)>> {
        let mut seen = HashSet::new();
        for (role, _) in document.entries() {
            if !seen.insert(role.as_str()) {
                return Err(BenchError::DuplicateRole(role.clone()));
            }
        }

        match &self.options.roles {
            None => Ok(document.entries().iter().collect()),
            Some(mask) => {
                let missing: Vec<String> = mask
                    .iter()
                    .filter(|role| !seen.contains(role.as_str()))
                    .cloned()
                    .collect();
                if !missing.is_empty() {
                    return Err(BenchError::MissingRoles(missing));
                }
                Ok(document
                    .entries()
                    .iter()
                    .filter(|(role, _)| mask.contains(role))
                    .collect())
            }
        }
    }

    /// Validate a document without opening any session.
    ///
    /// Checks role uniqueness, the role mask, every address, registry
    /// resolution and, when init is enabled, every init step against the
    /// factory's command tables.
    pub fn check(&self, document: &ConfigurationDocument) -> BenchResult<LoadPlan> {
        let mut plan = LoadPlan::default();
        for (role, entry) in self.select(document)? {
            let planned = self
                .plan_entry(role, entry)
                .map_err(|e| BenchError::for_role(role, e))?;
            plan.entries.push(planned);
        }
        Ok(plan)
    }

    fn plan_entry(&self, role: &str, entry: &ConfigEntry) -> BenchResult<PlannedEntry> {
        let address = ResourceAddress::parse(&entry.address)?;
        let factory = self
            .binder
            .registry()
            .resolve(&entry.definition, &entry.object)?;
        let definition = Definition::from_name(&entry.definition).ok_or_else(|| {
            BenchError::UnknownDriver {
                definition: entry.definition.clone(),
                object: entry.object.clone(),
            }
        })?;

        let steps = if self.options.init_devices {
            InitSequencer::check(factory.command_tables(), &entry.object, &entry.init)?;
            entry.init.len()
        } else {
            0
        };

        Ok(PlannedEntry {
            role: role.to_string(),
            definition,
            object: entry.object.clone(),
            address,
            steps,
        })
    }

    /// Read a document from disk and load it.
    pub async fn load_path(&self, path: impl AsRef<Path>) -> BenchResult<Bench> {
        let document = ConfigurationDocument::from_path(path)?;
        self.load(document).await
    }

    /// Bind and initialize every selected entry.
    pub async fn load(&self, document: ConfigurationDocument) -> BenchResult<Bench> {
        let selected = self.select(&document)?;
        let sequencer = InitSequencer::new(self.options.failure_policy);
        info!(
            entries = selected.len(),
            init_devices = self.options.init_devices,
            policy = %self.options.failure_policy,
            "Loading bench"
        );

        let mut bound: Vec<ResolvedInstrument> = Vec::with_capacity(selected.len());
        for (role, entry) in selected {
            let span = info_span!(
                "bind",
                role = %role,
                definition = %entry.definition,
                object = %entry.object
            );
            let result = self.load_entry(&sequencer, role, entry).instrument(span).await;

            match result {
                Ok(resolved) => bound.push(resolved),
                Err(err) => {
                    warn!(role = %role, error = %err, "Entry failed, unwinding {} bound instrument(s)", bound.len());
                    unwind(bound).await;
                    return Err(BenchError::for_role(role, err));
                }
            }
        }

        info!(roles = bound.len(), "Bench loaded");
        Ok(Bench::new(bound))
    }

    async fn load_entry(
        &self,
        sequencer: &InitSequencer,
        role: &str,
        entry: &ConfigEntry,
    ) -> BenchResult<ResolvedInstrument> {
        let mut resolved = self.binder.bind(role, entry).await?;

        if !self.options.init_devices {
            debug!(steps = entry.init.len(), "Init skipped");
            return Ok(resolved);
        }

        match sequencer.apply(ResolvedInstrument::instrument(&resolved), &entry.init).await {
            Ok(report) => {
                debug!(applied = report.applied, failed = report.failures.len(), "Entry initialized");
                resolved.set_report(report);
                Ok(resolved)
            }
            Err(err) => {
                if let Err(e) = resolved.session().close().await {
                    warn!(error = %e, "Failed to close session of failed entry");
                }
                Err(err)
            }
        }
    }
}

/// Close sessions newest first. Close failures are logged, not returned.
async fn unwind(bound: Vec<ResolvedInstrument>) {
    for resolved in bound.into_iter().rev() {
        match resolved.session().close().await {
            Ok(()) => debug!(role = resolved.role(), "Session closed during unwind"),
            Err(e) => warn!(role = resolved.role(), error = %e, "Failed to close session during unwind"),
        }
    }
}

/// The resolved role → instrument table.
///
/// Owns every session it holds. Call [`Bench::release`] to close them; a
/// bench dropped without release hands its sessions to a background close
/// task when a tokio runtime is available.
#[derive(Debug)]
pub struct Bench {
    instruments: Vec<ResolvedInstrument>,
    released: bool,
}

impl Bench {
    fn new(instruments: Vec<ResolvedInstrument>) -> Self {
        Self {
            instruments,
            released: false,
        }
    }

    /// Resolved instrument for `role`.
    pub fn get(&self, role: &str) -> Option<&ResolvedInstrument> {
        self.instruments.iter().find(|r| r.role() == role)
    }

    /// Driver handle for `role`.
    pub fn instrument(&self, role: &str) -> Option<&Instrument> {
        self.get(role).map(ResolvedInstrument::instrument)
    }

    /// Role names in load order.
    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.instruments.iter().map(ResolvedInstrument::role)
    }

    /// Resolved instruments in load order.
    pub fn iter(&self) -> impl Iterator<Item = &ResolvedInstrument> {
        self.instruments.iter()
    }

    /// Number of roles.
    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    /// Whether the bench holds no roles.
    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    /// Power supply at `role`.
    pub fn source(&self, role: &str) -> Option<&Arc<dyn Source>> {
        self.instrument(role).and_then(Instrument::as_source)
    }

    /// Electronic load at `role`.
    pub fn sink(&self, role: &str) -> Option<&Arc<dyn Sink>> {
        self.instrument(role).and_then(Instrument::as_sink)
    }

    /// Multimeter at `role`.
    pub fn multimeter(&self, role: &str) -> Option<&Arc<dyn Multimeter>> {
        self.instrument(role).and_then(Instrument::as_multimeter)
    }

    /// Oscilloscope at `role`.
    pub fn oscilloscope(&self, role: &str) -> Option<&Arc<dyn Oscilloscope>> {
        self.instrument(role).and_then(Instrument::as_oscilloscope)
    }

    /// Power meter at `role`.
    pub fn power_meter(&self, role: &str) -> Option<&Arc<dyn PowerMeter>> {
        self.instrument(role).and_then(Instrument::as_power_meter)
    }

    /// Every multimeter role, as a group.
    ///
    /// Members are named by their role with any `DMM` marker removed, so
    /// `v_inDMM` joins the group as `v_in`.
    pub fn multimeters(&self) -> MultimeterGroup<'_> {
        MultimeterGroup {
            members: self
                .instruments
                .iter()
                .filter_map(|r| {
                    r.instrument()
                        .as_multimeter()
                        .map(|m| (member_name(r.role()), r.role(), m))
                })
                .collect(),
        }
    }

    /// Query `*IDN?` on every instrument, in load order.
    pub async fn identify(&self) -> Vec<(String, Result<String, DriverError>)> {
        let mut replies = Vec::with_capacity(self.instruments.len());
        for resolved in &self.instruments {
            let reply = resolved.instrument().identify().await;
            replies.push((resolved.role().to_string(), reply));
        }
        replies
    }

    /// Return every instrument to front-panel control.
    ///
    /// Best effort: every instrument is attempted and failures are returned
    /// per role.
    pub async fn set_local_all(&self) -> Vec<BenchError> {
        let mut failures = Vec::new();
        for resolved in &self.instruments {
            if let Err(source) = resolved.instrument().set_local().await {
                warn!(role = resolved.role(), error = %source, "Failed to return instrument to local");
                failures.push(BenchError::Instrument {
                    role: resolved.role().to_string(),
                    source,
                });
            }
        }
        failures
    }

    /// Close every session, newest first.
    ///
    /// Every session is attempted; the first close failure is returned.
    pub async fn release(mut self) -> Result<(), TransportError> {
        self.released = true;
        let mut first_error = None;
        for resolved in std::mem::take(&mut self.instruments).into_iter().rev() {
            if let Err(e) = resolved.session().close().await {
                warn!(role = resolved.role(), error = %e, "Failed to close session");
                first_error.get_or_insert(e);
            }
        }
        info!("Bench released");
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for Bench {
    fn drop(&mut self) {
        if self.released || self.instruments.is_empty() {
            return;
        }
        let sessions: Vec<_> = self
            .instruments
            .drain(..)
            .rev()
            .map(|r| r.session().clone())
            .collect();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(sessions = sessions.len(), "Bench dropped without release, closing in background");
                handle.spawn(async move {
                    for session in sessions {
                        if let Err(e) = session.close().await {
                            warn!(address = %session.address(), error = %e, "Background close failed");
                        }
                    }
                });
            }
            Err(_) => {
                warn!(sessions = sessions.len(), "Bench dropped without release outside a runtime");
            }
        }
    }
}

/// Group name of a multimeter role: the role without `DMM`.
fn member_name(role: &str) -> String {
    let name = role.replace("DMM", "");
    if name.is_empty() {
        role.to_string()
    } else {
        name
    }
}

/// All multimeter roles of a bench, in load order.
pub struct MultimeterGroup<'a> {
    members: Vec<(String, &'a str, &'a Arc<dyn Multimeter>)>,
}

impl<'a> MultimeterGroup<'a> {
    /// Roles in the group.
    pub fn roles(&self) -> Vec<&'a str> {
        self.members.iter().map(|(_, role, _)| *role).collect()
    }

    /// Member names, which key [`fetch_all`](Self::fetch_all) results.
    pub fn names(&self) -> Vec<&str> {
        self.members.iter().map(|(name, _, _)| name.as_str()).collect()
    }

    /// Number of multimeters.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the bench has no multimeters.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Arm every multimeter's trigger.
    pub async fn init_all(&self) -> BenchResult<()> {
        for (_, role, meter) in &self.members {
            meter.init().await.map_err(|source| BenchError::Instrument {
                role: role.to_string(),
                source,
            })?;
        }
        Ok(())
    }

    /// Reset every multimeter.
    pub async fn reset_all(&self) -> BenchResult<()> {
        for (_, role, meter) in &self.members {
            meter.reset().await.map_err(|source| BenchError::Instrument {
                role: role.to_string(),
                source,
            })?;
        }
        Ok(())
    }

    /// Fetch readings from every multimeter.
    ///
    /// Results are keyed by member name. `mapper` renames members; with
    /// `only_mapped`, members absent from the mapper are skipped and not
    /// queried.
    pub async fn fetch_all(
        &self,
        mapper: Option<&HashMap<String, String>>,
        only_mapped: bool,
    ) -> BenchResult<Vec<(String, Vec<f64>)>> {
        let mut results = Vec::with_capacity(self.members.len());
        for (name, role, meter) in &self.members {
            let key = match mapper.and_then(|m| m.get(name)) {
                Some(renamed) => renamed.clone(),
                None if only_mapped => continue,
                None => name.clone(),
            };
            let readings = meter.fetch_data().await.map_err(|source| BenchError::Instrument {
                role: role.to_string(),
                source,
            })?;
            results.push((key, readings));
        }
        Ok(results)
    }
}
