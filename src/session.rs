//! Communication sessions.
//!
//! A [`Transport`] opens a [`Session`] for a parsed [`ResourceAddress`]. The
//! opened session is wrapped in a [`SessionHandle`], which is shared between
//! the driver talking through it and the resolved bench table that owns its
//! lifetime.
//!
//! Closing a handle closes the channel for every clone. Any operation after
//! that fails with [`TransportError::Closed`].

use crate::address::ResourceAddress;
use crate::error::TransportError;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Default I/O timeout for new sessions.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// One open, message-based channel to an instrument.
#[async_trait]
pub trait Session: Send {
    /// Send one message (the transport appends its terminator).
    async fn write(&mut self, message: &str) -> Result<(), TransportError>;

    /// Read one message (terminator stripped).
    async fn read(&mut self) -> Result<String, TransportError>;

    /// Write a message and read the reply.
    async fn query(&mut self, message: &str) -> Result<String, TransportError> {
        self.write(message).await?;
        self.read().await
    }

    /// Current I/O timeout.
    fn timeout(&self) -> Duration;

    /// Change the I/O timeout.
    fn set_timeout(&mut self, timeout: Duration);

    /// Return the instrument to front-panel (local) control.
    ///
    /// Only bus transports can do this; the default reports it as unsupported.
    async fn go_to_local(&mut self) -> Result<(), TransportError> {
        Err(TransportError::Unsupported {
            transport: "session".into(),
            kind: "go-to-local".into(),
        })
    }

    /// Release the channel.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens sessions for parsed addresses.
///
/// Opening is the only blocking step of binding; the transport's own timeout
/// bounds it.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name, for logs and errors.
    fn name(&self) -> &str;

    /// Open a session at `address`.
    async fn open(&self, address: &ResourceAddress) -> Result<Box<dyn Session>, TransportError>;
}

/// Shared handle to one open session.
#[derive(Clone)]
pub struct SessionHandle {
    address: Arc<ResourceAddress>,
    inner: Arc<Mutex<Option<Box<dyn Session>>>>,
}

impl SessionHandle {
    /// Wrap an already opened session.
    pub fn new(address: ResourceAddress, session: Box<dyn Session>) -> Self {
        Self {
            address: Arc::new(address),
            inner: Arc::new(Mutex::new(Some(session))),
        }
    }

    /// Open a session through `transport`.
    pub async fn open(
        transport: &dyn Transport,
        address: &ResourceAddress,
    ) -> Result<Self, TransportError> {
        debug!(transport = transport.name(), %address, "Opening session");
        let session = transport.open(address).await?;
        Ok(Self::new(address.clone(), session))
    }

    /// Address this session was opened at.
    pub fn address(&self) -> &ResourceAddress {
        &self.address
    }

    /// Whether the channel is still open.
    pub async fn is_open(&self) -> bool {
        self.inner.lock().await.is_some()
    }

    /// Send one message.
    pub async fn write(&self, message: &str) -> Result<(), TransportError> {
        let mut guard = self.inner.lock().await;
        let session = guard.as_mut().ok_or(TransportError::Closed)?;
        session.write(message).await
    }

    /// Read one message.
    pub async fn read(&self) -> Result<String, TransportError> {
        let mut guard = self.inner.lock().await;
        let session = guard.as_mut().ok_or(TransportError::Closed)?;
        session.read().await
    }

    /// Write then read while holding the channel, so replies cannot interleave.
    pub async fn query(&self, message: &str) -> Result<String, TransportError> {
        let mut guard = self.inner.lock().await;
        let session = guard.as_mut().ok_or(TransportError::Closed)?;
        session.query(message).await
    }

    /// Current I/O timeout.
    pub async fn timeout(&self) -> Result<Duration, TransportError> {
        let guard = self.inner.lock().await;
        let session = guard.as_ref().ok_or(TransportError::Closed)?;
        Ok(session.timeout())
    }

    /// Change the I/O timeout.
    pub async fn set_timeout(&self, timeout: Duration) -> Result<(), TransportError> {
        let mut guard = self.inner.lock().await;
        let session = guard.as_mut().ok_or(TransportError::Closed)?;
        session.set_timeout(timeout);
        Ok(())
    }

    /// Return the instrument to local control.
    pub async fn go_to_local(&self) -> Result<(), TransportError> {
        let mut guard = self.inner.lock().await;
        let session = guard.as_mut().ok_or(TransportError::Closed)?;
        session.go_to_local().await
    }

    /// Close the channel. Closing an already closed handle is a no-op.
    pub async fn close(&self) -> Result<(), TransportError> {
        let session = self.inner.lock().await.take();
        match session {
            Some(mut session) => {
                debug!(address = %self.address, "Closing session");
                session.close().await
            }
            None => Ok(()),
        }
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("address", &self.address.to_string())
            .finish_non_exhaustive()
    }
}
