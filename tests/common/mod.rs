//! Shared fixtures for mux pool tests

#![allow(dead_code)]

use async_trait::async_trait;
use splitmux::config::{MultiplexingConfig, MuxMode, RangeConfig, TransportConfig};
use splitmux::mux::{Destination, DialerClientFactory, StreamSettings};
use splitmux::{MuxError, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Stand-in for an HTTP dialer client.
#[derive(Debug)]
pub struct MockClient {
    pub serial: usize,
}

/// Factory that counts creations and can be told to fail.
#[derive(Debug, Default)]
pub struct MockFactory {
    created: AtomicUsize,
    fail: AtomicBool,
}

impl MockFactory {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DialerClientFactory for MockFactory {
    type Client = MockClient;

    async fn create_client(
        &self,
        destination: &Destination,
        _settings: &StreamSettings,
    ) -> Result<MockClient> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MuxError::Dial(format!("{} refused", destination)));
        }
        let serial = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MockClient { serial })
    }
}

pub fn destination() -> Destination {
    Destination::tcp("edge.example.com", 443)
}

pub fn mux_config(
    mode: MuxMode,
    max_connections: u32,
    concurrency: i32,
    lifetime_secs: i32,
) -> MultiplexingConfig {
    MultiplexingConfig {
        mode,
        max_connection_concurrency: RangeConfig::fixed(concurrency),
        max_connection_lifetime: RangeConfig::fixed(lifetime_secs),
        max_connections,
    }
}

/// Settings whose upload delay (and so each client's allotted lifetime) is `delay_ms`.
pub fn settings_with_delay_ms(delay_ms: i32) -> StreamSettings {
    StreamSettings::new(TransportConfig {
        sc_min_posts_interval_ms: RangeConfig::fixed(delay_ms),
        ..Default::default()
    })
}

/// Settings whose upload delay always samples to zero.
pub fn settings_without_delay() -> StreamSettings {
    StreamSettings::new(TransportConfig {
        sc_min_posts_interval_ms: RangeConfig::new(0, 1),
        ..Default::default()
    })
}
