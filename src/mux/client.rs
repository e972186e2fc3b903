use crate::config::TransportConfig;
use crate::utils::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Tcp,
    Udp,
}

/// Target the tunnel should reach.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    pub network: Network,
    pub host: String,
    pub port: u16,
}

impl Destination {
    /// TCP destination at `host:port`
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            network: Network::Tcp,
            host: host.into(),
            port,
        }
    }

    /// `host:port` form, with brackets around IPv6 literals.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let network = match self.network {
            Network::Tcp => "tcp",
            Network::Udp => "udp",
        };
        write!(f, "{}:{}", network, self.authority())
    }
}

/// Per-outbound stream settings handed to the pool and the factory.
#[derive(Debug, Clone, Default)]
pub struct StreamSettings {
    pub transport: Arc<TransportConfig>,
}

impl StreamSettings {
    /// Wrap a transport config for sharing across streams
    pub fn new(transport: TransportConfig) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }
}

/// Builds dialer clients, each bound to one underlying HTTP connection.
#[async_trait]
pub trait DialerClientFactory: Send + Sync {
    type Client: Send + Sync + 'static;

    /// Open a new dialer client towards `destination`
    async fn create_client(
        &self,
        destination: &Destination,
        settings: &StreamSettings,
    ) -> Result<Self::Client>;
}

/// Stable identity of a pooled dialer client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client#{}", self.0)
    }
}

/// Dialer client handed out by the pool.
///
/// Pooled handles carry the id used to release or discard them; handles
/// produced with multiplexing disabled have none.
#[derive(Debug)]
pub struct DialerClientHandle<C> {
    id: Option<ClientId>,
    client: Arc<C>,
}

impl<C> DialerClientHandle<C> {
    pub(crate) fn pooled(id: ClientId, client: Arc<C>) -> Self {
        Self {
            id: Some(id),
            client,
        }
    }

    pub(crate) fn unpooled(client: C) -> Self {
        Self {
            id: None,
            client: Arc::new(client),
        }
    }

    /// Pool id, `None` for unpooled handles
    pub fn id(&self) -> Option<ClientId> {
        self.id
    }

    /// Whether the pool tracks this handle
    pub fn is_pooled(&self) -> bool {
        self.id.is_some()
    }

    /// Shared dialer client behind the handle
    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// `true` when both handles refer to the same dialer client.
    pub fn same_client(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.client, &other.client)
    }
}

impl<C> Clone for DialerClientHandle<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            client: Arc::clone(&self.client),
        }
    }
}

impl<C> Deref for DialerClientHandle<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.client
    }
}
