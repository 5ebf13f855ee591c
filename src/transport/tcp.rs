//! Raw SCPI over TCP.
//!
//! Serves `host:port` and `TCPIP<board>::<host>::<port>::SOCKET` addresses.
//! Messages are newline terminated; each read and write is bounded by the
//! session timeout. GPIB, USB and VXI-11 addresses need a VISA library and
//! are refused with [`TransportError::Unsupported`].

use crate::address::ResourceAddress;
use crate::error::TransportError;
use crate::session::{Session, Transport, DEFAULT_TIMEOUT};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// TCP socket transport.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    connect_timeout: Duration,
    io_timeout: Duration,
    terminator: String,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            io_timeout: DEFAULT_TIMEOUT,
            terminator: "\n".to_string(),
        }
    }
}

impl TcpTransport {
    /// Create a transport with default timeouts and a `\n` terminator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect timeout
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Set the initial read/write timeout of opened sessions
    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    /// Set the line terminator appended to outgoing messages
    pub fn with_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.terminator = terminator.into();
        self
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn name(&self) -> &str {
        "tcp"
    }

    async fn open(&self, address: &ResourceAddress) -> Result<Box<dyn Session>, TransportError> {
        let (host, port) = address
            .socket_target()
            .ok_or_else(|| TransportError::Unsupported {
                transport: self.name().to_string(),
                kind: address.kind().to_string(),
            })?;
        let target = format!("{host}:{port}");

        let stream = timeout(self.connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| TransportError::Timeout(self.connect_timeout))?
            .map_err(|e| TransportError::from_connect(e, &target))?;
        stream.set_nodelay(true)?;

        tracing::debug!(%target, "TCP session connected");

        let (reader, writer) = stream.into_split();
        Ok(Box::new(TcpSession {
            reader: BufReader::new(reader),
            writer,
            timeout: self.io_timeout,
            terminator: self.terminator.clone(),
        }))
    }
}

struct TcpSession {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    timeout: Duration,
    terminator: String,
}

#[async_trait]
impl Session for TcpSession {
    async fn write(&mut self, message: &str) -> Result<(), TransportError> {
        let frame = format!("{message}{}", self.terminator);
        timeout(self.timeout, self.writer.write_all(frame.as_bytes()))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))??;
        Ok(())
    }

    async fn read(&mut self) -> Result<String, TransportError> {
        let mut line = String::new();
        let n = timeout(self.timeout, self.reader.read_line(&mut line))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))??;
        if n == 0 {
            return Err(TransportError::Io(std::io::Error::from(
                std::io::ErrorKind::UnexpectedEof,
            )));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionHandle;
    use tokio::net::TcpListener;

    /// Answers every line ending in '?' with "ECHO <line>".
    async fn spawn_echo_instrument() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.ends_with('?') {
                    writer
                        .write_all(format!("ECHO {line}\r\n").as_bytes())
                        .await
                        .unwrap();
                }
            }
        });
        local
    }

    #[tokio::test]
    async fn test_query_over_socket() {
        let local = spawn_echo_instrument().await;
        let address = ResourceAddress::parse(&local.to_string()).unwrap();

        let session = SessionHandle::open(&TcpTransport::new(), &address)
            .await
            .unwrap();

        assert_eq!(session.query("*IDN?").await.unwrap(), "ECHO *IDN?");
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_read_times_out_without_reply() {
        let local = spawn_echo_instrument().await;
        let address = ResourceAddress::parse(&format!(
            "TCPIP0::127.0.0.1::{}::SOCKET",
            local.port()
        ))
        .unwrap();

        let transport = TcpTransport::new().with_io_timeout(Duration::from_millis(50));
        let session = SessionHandle::open(&transport, &address).await.unwrap();

        session.write("OUTP ON").await.unwrap();
        assert!(matches!(
            session.read().await,
            Err(TransportError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_bus_addresses_are_unsupported() {
        let address = ResourceAddress::parse("GPIB0::14::INSTR").unwrap();
        let result = TcpTransport::new().open(&address).await;
        assert!(matches!(
            result,
            Err(TransportError::Unsupported { ref kind, .. }) if kind == "gpib"
        ));
    }

    #[tokio::test]
    async fn test_refused_connection_is_not_found() {
        // Bind then drop to get a port with no listener.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let address = ResourceAddress::parse(&format!("127.0.0.1:{port}")).unwrap();

        let result = TcpTransport::new().open(&address).await;
        assert!(matches!(result, Err(TransportError::NotFound(_))));
    }
}
