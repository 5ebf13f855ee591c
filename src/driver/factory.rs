//! Driver construction.
//!
//! A [`DriverFactory`] is the constructor half of a registry entry. The binder
//! hands it an open session in a [`BuildContext`]; the factory returns the
//! driver wrapped in its namespace variant, or a `DriverError` when the driver
//! rejects the session.
//!
//! # Example
//!
//! ```rust,ignore
//! struct Hp6632aFactory;
//!
//! impl DriverFactory for Hp6632aFactory {
//!     fn command_tables(&self) -> &'static [&'static [CommandSpec]] {
//!         HP6632A_TABLES
//!     }
//!
//!     fn build(&self, ctx: BuildContext) -> BoxFuture<'static, Result<Instrument, DriverError>> {
//!         Box::pin(async move {
//!             let driver = Hp6632a::connect(ctx).await?;
//!             Ok(Instrument::Source(Arc::new(driver)))
//!         })
//!     }
//! }
//! ```

use super::command::{Arguments, CommandSpec};
use super::Instrument;
use crate::error::DriverError;
use crate::session::SessionHandle;
use futures::future::BoxFuture;

/// Everything a factory gets to build one driver.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Object name the entry asked for
    pub object: String,
    /// Freshly opened session; the factory must not close it
    pub session: SessionHandle,
    /// Constructor options from the entry's `kwargs`
    pub options: Arguments,
}

impl BuildContext {
    /// Context with no constructor options.
    pub fn new(object: impl Into<String>, session: SessionHandle) -> Self {
        Self {
            object: object.into(),
            session,
            options: Arguments::new(),
        }
    }

    /// Attach constructor options.
    pub fn with_options(mut self, options: Arguments) -> Self {
        self.options = options;
        self
    }
}

/// Constructor for one registered driver type.
pub trait DriverFactory: Send + Sync {
    /// Command tables the built driver will expose.
    ///
    /// Used for preflight checks before any session is opened.
    fn command_tables(&self) -> &'static [&'static [CommandSpec]];

    /// Build a driver around an open session.
    fn build(&self, ctx: BuildContext) -> BoxFuture<'static, Result<Instrument, DriverError>>;
}
