//! Driver registry.
//!
//! Maps a `(definition, object)` pair to the [`DriverFactory`] that builds it.
//! A registry is assembled once with [`DriverRegistryBuilder`] during startup
//! and is read-only afterwards, so lookups take no locks and an
//! `Arc<DriverRegistry>` can be shared freely between loaders and threads.
//!
//! ```
//! use lab_bench::driver::mock::MockFactory;
//! use lab_bench::driver::Definition;
//! use lab_bench::registry::DriverRegistry;
//!
//! let mut builder = DriverRegistry::builder();
//! builder
//!     .register(Definition::Source, "X", MockFactory::new(Definition::Source))
//!     .unwrap();
//! let registry = builder.build();
//!
//! assert!(registry.resolve("source", "X").is_ok());
//! assert!(registry.resolve("source", "x").is_err());
//! ```

use crate::driver::hp34401a::{Hp34401aFactory, HP_34401A, KEYSIGHT_34461A};
use crate::driver::hp6632a::{self, Hp6632aFactory};
use crate::driver::rigol_ds1000z::{self, RigolDs1000zFactory};
use crate::driver::{Definition, DriverFactory};
use crate::error::{BenchError, BenchResult};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type RegistryKey = (Definition, String);

/// Collects registrations before the registry is frozen.
#[derive(Default)]
pub struct DriverRegistryBuilder {
    factories: HashMap<RegistryKey, Arc<dyn DriverFactory>>,
}

impl DriverRegistryBuilder {
    /// Register `factory` under `(definition, object)`.
    ///
    /// Registering the same pair twice is an error; entries are immutable
    /// once registered.
    pub fn register<F>(
        &mut self,
        definition: Definition,
        object: impl Into<String>,
        factory: F,
    ) -> BenchResult<&mut Self>
    where
        F: DriverFactory + 'static,
    {
        let object = object.into();
        if object.is_empty() {
            return Err(BenchError::Registry(format!(
                "empty object name in definition '{definition}'"
            )));
        }
        let key = (definition, object);
        if self.factories.contains_key(&key) {
            return Err(BenchError::Registry(format!(
                "'{}' is already registered in definition '{}'",
                key.1, key.0
            )));
        }
        self.factories.insert(key, Arc::new(factory));
        Ok(self)
    }

    /// Freeze the registrations.
    pub fn build(self) -> DriverRegistry {
        DriverRegistry {
            factories: self.factories,
        }
    }
}

/// Read-only `(definition, object)` → factory table.
pub struct DriverRegistry {
    factories: HashMap<RegistryKey, Arc<dyn DriverFactory>>,
}

impl DriverRegistry {
    /// Start an empty registry.
    pub fn builder() -> DriverRegistryBuilder {
        DriverRegistryBuilder::default()
    }

    /// Registry holding every bundled driver.
    pub fn with_builtin_drivers() -> BenchResult<Self> {
        let mut builder = Self::builder();
        register_builtin_drivers(&mut builder)?;
        Ok(builder.build())
    }

    /// Find the factory for an entry's `definition` and `object`.
    ///
    /// Matching is exact and case-sensitive. An unknown definition is
    /// reported the same way as an unknown object.
    pub fn resolve(&self, definition: &str, object: &str) -> BenchResult<Arc<dyn DriverFactory>> {
        let unknown = || BenchError::UnknownDriver {
            definition: definition.to_string(),
            object: object.to_string(),
        };
        let namespace = Definition::from_name(definition).ok_or_else(unknown)?;
        self.factories
            .get(&(namespace, object.to_string()))
            .cloned()
            .ok_or_else(unknown)
    }

    /// Whether `(definition, object)` is registered.
    pub fn contains(&self, definition: Definition, object: &str) -> bool {
        self.factories.contains_key(&(definition, object.to_string()))
    }

    /// Registered pairs, sorted by definition then object.
    pub fn list(&self) -> Vec<(Definition, String)> {
        let mut entries: Vec<_> = self.factories.keys().cloned().collect();
        entries.sort();
        entries
    }

    /// Number of registered drivers.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.list())
            .finish()
    }
}

/// Register every bundled driver.
pub fn register_builtin_drivers(builder: &mut DriverRegistryBuilder) -> BenchResult<()> {
    builder
        .register(Definition::Source, hp6632a::OBJECT, Hp6632aFactory)?
        .register(Definition::Multimeter, HP_34401A, Hp34401aFactory::hp_34401a())?
        .register(
            Definition::Multimeter,
            KEYSIGHT_34461A,
            Hp34401aFactory::keysight_34461a(),
        )?
        .register(
            Definition::Oscilloscope,
            rigol_ds1000z::OBJECT,
            RigolDs1000zFactory,
        )?;
    Ok(())
}
