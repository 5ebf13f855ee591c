//! Simulated transport for testing
//!
//! Opens in-memory sessions instead of touching hardware. It provides:
//! - An event log of every open, write and close for test verification
//! - Per-address open failure injection
//! - Scripted replies for queries
//! - Optional simulated latency

use crate::address::ResourceAddress;
use crate::error::TransportError;
use crate::session::{Session, Transport, DEFAULT_TIMEOUT};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// One observable transport action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A session was opened at the address
    Open(String),
    /// A message was written to the session at the address
    Write(String, String),
    /// The session at the address was closed
    Close(String),
}

#[derive(Default)]
struct SimState {
    events: Mutex<Vec<TransportEvent>>,
    failing: Mutex<HashSet<String>>,
    responses: Mutex<HashMap<String, VecDeque<String>>>,
}

impl SimState {
    fn log(&self, event: TransportEvent) {
        self.events.lock().push(event);
    }
}

/// In-memory transport.
///
/// Cloning shares the event log, so a test can keep a clone after handing the
/// transport to a loader.
///
/// # Example
///
/// ```
/// use lab_bench::address::ResourceAddress;
/// use lab_bench::session::SessionHandle;
/// use lab_bench::transport::SimulatedTransport;
///
/// # tokio_test::block_on(async {
/// let transport = SimulatedTransport::new();
/// let address = ResourceAddress::parse("GPIB0::14::INSTR").unwrap();
/// let session = SessionHandle::open(&transport, &address).await.unwrap();
/// session.close().await.unwrap();
/// assert_eq!(transport.open_sessions(), 0);
/// # })
/// ```
#[derive(Clone, Default)]
pub struct SimulatedTransport {
    state: Arc<SimState>,
    latency: Duration,
}

/// Canonical key so `GPIB::14::INSTR` and `GPIB0::14::INSTR` match.
fn key(address: &str) -> String {
    ResourceAddress::parse(address)
        .map(|a| a.to_string())
        .unwrap_or_else(|_| address.to_string())
}

impl SimulatedTransport {
    /// Create a transport with no latency and no injected failures.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate latency on every open.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make every open at `address` fail as if no device were present.
    pub fn fail_open(&self, address: &str) {
        self.state.failing.lock().insert(key(address));
    }

    /// Queue a reply for the next query sent to `address`.
    pub fn queue_response(&self, address: &str, response: impl Into<String>) {
        self.state
            .responses
            .lock()
            .entry(key(address))
            .or_default()
            .push_back(response.into());
    }

    /// Copy of the event log.
    pub fn events(&self) -> Vec<TransportEvent> {
        self.state.events.lock().clone()
    }

    /// Clear the event log.
    pub fn clear_events(&self) {
        self.state.events.lock().clear();
    }

    /// Number of sessions opened so far.
    pub fn opened_count(&self) -> usize {
        self.count(|e| matches!(e, TransportEvent::Open(_)))
    }

    /// Number of sessions closed so far.
    pub fn closed_count(&self) -> usize {
        self.count(|e| matches!(e, TransportEvent::Close(_)))
    }

    /// Sessions currently open.
    pub fn open_sessions(&self) -> usize {
        self.opened_count().saturating_sub(self.closed_count())
    }

    /// Messages written to the session at `address`, in order.
    pub fn writes_to(&self, address: &str) -> Vec<String> {
        let target = key(address);
        self.state
            .events
            .lock()
            .iter()
            .filter_map(|e| match e {
                TransportEvent::Write(addr, msg) if *addr == target => Some(msg.clone()),
                _ => None,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&TransportEvent) -> bool) -> usize {
        self.state.events.lock().iter().filter(|e| pred(e)).count()
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn open(&self, address: &ResourceAddress) -> Result<Box<dyn Session>, TransportError> {
        let key = address.to_string();

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if self.state.failing.lock().contains(&key) {
            return Err(TransportError::NotFound(key));
        }

        self.state.log(TransportEvent::Open(key.clone()));
        tracing::debug!(address = %key, "Simulated session opened");

        Ok(Box::new(SimulatedSession {
            key,
            state: Arc::clone(&self.state),
            timeout: DEFAULT_TIMEOUT,
            pending: None,
        }))
    }
}

struct SimulatedSession {
    key: String,
    state: Arc<SimState>,
    timeout: Duration,
    pending: Option<String>,
}

impl SimulatedSession {
    fn reply_for(&self, message: &str) -> String {
        let queued = self
            .state
            .responses
            .lock()
            .get_mut(&self.key)
            .and_then(VecDeque::pop_front);

        queued.unwrap_or_else(|| {
            if message.trim().eq_ignore_ascii_case("*IDN?") {
                format!("LAB-BENCH,SIMULATED,{},1.0", self.key)
            } else {
                "0".to_string()
            }
        })
    }
}

#[async_trait]
impl Session for SimulatedSession {
    async fn write(&mut self, message: &str) -> Result<(), TransportError> {
        self.state
            .log(TransportEvent::Write(self.key.clone(), message.to_string()));
        if message.trim_end().ends_with('?') {
            self.pending = Some(self.reply_for(message));
        }
        Ok(())
    }

    async fn read(&mut self) -> Result<String, TransportError> {
        self.pending
            .take()
            .ok_or(TransportError::Timeout(self.timeout))
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    async fn go_to_local(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.state.log(TransportEvent::Close(self.key.clone()));
        Ok(())
    }
}
