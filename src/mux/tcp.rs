use super::client::{Destination, DialerClientFactory, StreamSettings};
use crate::utils::error::{MuxError, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, trace};

/// Dialer client backed by a single TCP connection.
#[derive(Debug)]
pub struct TcpDialerClient {
    peer: SocketAddr,
    stream: Mutex<TcpStream>,
}

impl TcpDialerClient {
    /// Remote address the connection was established to
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Exclusive access to the underlying stream.
    pub fn stream(&self) -> &Mutex<TcpStream> {
        &self.stream
    }
}

/// Opens one TCP connection per dialer client.
#[derive(Debug, Clone)]
pub struct TcpDialerFactory {
    connect_timeout: Duration,
}

impl TcpDialerFactory {
    /// Create a factory whose connects give up after `connect_timeout`
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn connect(&self, addr: SocketAddr) -> Result<TcpStream> {
        match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(MuxError::Io(e)),
            Err(_) => Err(MuxError::ConnectTimeout(addr.to_string())),
        }
    }
}

impl Default for TcpDialerFactory {
    fn default() -> Self {
        Self::new(Duration::from_millis(5000))
    }
}

#[async_trait]
impl DialerClientFactory for TcpDialerFactory {
    type Client = TcpDialerClient;

    async fn create_client(
        &self,
        destination: &Destination,
        _settings: &StreamSettings,
    ) -> Result<TcpDialerClient> {
        let targets: Vec<SocketAddr> = tokio::net::lookup_host(destination.authority())
            .await?
            .collect();

        let mut last_error = None;
        for addr in targets {
            match self.connect(addr).await {
                Ok(stream) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        trace!(peer = %addr, error = %e, "Failed to set TCP_NODELAY");
                    }
                    debug!(%destination, peer = %addr, "Connected dialer client");
                    return Ok(TcpDialerClient {
                        peer: addr,
                        stream: Mutex::new(stream),
                    });
                }
                Err(e) => {
                    trace!(%destination, peer = %addr, error = %e, "Connect attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            MuxError::Dial(format!("no addresses found for {}", destination))
        }))
    }
}
