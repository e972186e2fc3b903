use super::range::RangeConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

const DEFAULT_X_PADDING_BYTES: RangeConfig = RangeConfig::new(100, 1000);
const DEFAULT_SC_MAX_EACH_POST_BYTES: RangeConfig = RangeConfig::fixed(1_000_000);
const DEFAULT_SC_MAX_CONCURRENT_POSTS: RangeConfig = RangeConfig::fixed(100);
const DEFAULT_SC_MIN_POSTS_INTERVAL_MS: RangeConfig = RangeConfig::fixed(30);
const DEFAULT_MAX_CONNECTION_CONCURRENCY: RangeConfig = RangeConfig::new(1, 3);
const DEFAULT_MAX_CONNECTION_LIFETIME_SECS: RangeConfig = RangeConfig::new(60, 90);

/// How new logical streams are spread over dialer clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MuxMode {
    /// Every stream gets its own unpooled dialer client.
    #[default]
    Disabled,
    /// Reuse whenever possible, open new clients only when none is reusable.
    PreferExisting,
    /// Open new clients until the cap is hit, then reuse.
    PreferNew,
}

impl std::fmt::Display for MuxMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MuxMode::Disabled => "disabled",
            MuxMode::PreferExisting => "prefer_existing",
            MuxMode::PreferNew => "prefer_new",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MultiplexingConfig {
    #[serde(default)]
    pub mode: MuxMode,
    /// Logical streams allowed per dialer client; only `to` is enforced.
    #[serde(default)]
    pub max_connection_concurrency: RangeConfig,
    /// Age in seconds after which a dialer client is evicted.
    #[serde(default)]
    pub max_connection_lifetime: RangeConfig,
    /// Cap on live dialer clients, 0 = unbounded.
    #[serde(default)]
    pub max_connections: u32,
}

impl MultiplexingConfig {
    pub fn normalized_max_connection_concurrency(&self) -> RangeConfig {
        self.max_connection_concurrency
            .or(DEFAULT_MAX_CONNECTION_CONCURRENCY)
    }

    pub fn normalized_max_connection_lifetime(&self) -> RangeConfig {
        self.max_connection_lifetime
            .or(DEFAULT_MAX_CONNECTION_LIFETIME_SECS)
    }

    /// Eviction age derived from the upper lifetime bound.
    pub fn eviction_age(&self) -> Duration {
        let secs = self.normalized_max_connection_lifetime().to.max(0) as u64;
        Duration::from_secs(secs)
    }

    /// Per-client stream cap derived from the upper concurrency bound.
    pub fn concurrency_cap(&self) -> u32 {
        self.normalized_max_connection_concurrency().to.max(0) as u32
    }

    /// `true` when `total` live clients leave no room for another one.
    pub fn is_saturated(&self, total: usize) -> bool {
        self.max_connections != 0 && total >= self.max_connections as usize
    }
}

/// Settings of the split HTTP transport that the pool reads from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub x_padding_bytes: RangeConfig,
    #[serde(default)]
    pub sc_max_each_post_bytes: RangeConfig,
    #[serde(default)]
    pub sc_max_concurrent_posts: RangeConfig,
    #[serde(default)]
    pub sc_min_posts_interval_ms: RangeConfig,
    #[serde(default)]
    pub multiplexing: MultiplexingConfig,
}

impl TransportConfig {
    /// Path without query, always starting and ending with `/`.
    pub fn normalized_path(&self) -> String {
        let path = self.path.split('?').next().unwrap_or_default();

        let mut normalized = String::with_capacity(path.len() + 2);
        if !path.starts_with('/') {
            normalized.push('/');
        }
        normalized.push_str(path);
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        normalized
    }

    /// Query carried over from `path` plus a freshly sampled `x_padding`.
    pub fn normalized_query(&self) -> String {
        let mut query = self
            .path
            .split_once('?')
            .map(|(_, q)| q.to_string())
            .unwrap_or_default();

        if !query.is_empty() {
            query.push('&');
        }

        let padding = self.normalized_x_padding_bytes().sample();
        if padding > 0 {
            query.push_str("x_padding=");
            query.push_str(&"0".repeat(padding as usize));
        }
        query
    }

    pub fn request_headers(&self) -> HashMap<String, String> {
        self.headers.clone()
    }

    /// `X-Padding` response header, `None` when the sampled length is 0.
    pub fn response_padding_header(&self) -> Option<(&'static str, String)> {
        let padding = self.normalized_x_padding_bytes().sample();
        if padding > 0 {
            Some(("X-Padding", "0".repeat(padding as usize)))
        } else {
            None
        }
    }

    pub fn normalized_x_padding_bytes(&self) -> RangeConfig {
        self.x_padding_bytes.or(DEFAULT_X_PADDING_BYTES)
    }

    pub fn normalized_sc_max_each_post_bytes(&self) -> RangeConfig {
        self.sc_max_each_post_bytes
            .or(DEFAULT_SC_MAX_EACH_POST_BYTES)
    }

    pub fn normalized_sc_max_concurrent_posts(&self) -> RangeConfig {
        self.sc_max_concurrent_posts
            .or(DEFAULT_SC_MAX_CONCURRENT_POSTS)
    }

    pub fn normalized_sc_min_posts_interval_ms(&self) -> RangeConfig {
        self.sc_min_posts_interval_ms
            .or(DEFAULT_SC_MIN_POSTS_INTERVAL_MS)
    }

    /// Delay between uploads, sampled anew on every call.
    pub fn normalized_upload_delay(&self) -> Duration {
        let millis = self.normalized_sc_min_posts_interval_ms().sample().max(0);
        Duration::from_millis(millis as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_is_wrapped_in_slashes() {
        let mut config = TransportConfig::default();
        assert_eq!(config.normalized_path(), "/");

        config.path = "tunnel".to_string();
        assert_eq!(config.normalized_path(), "/tunnel/");

        config.path = "/tunnel/?ed=2048".to_string();
        assert_eq!(config.normalized_path(), "/tunnel/");
    }

    #[test]
    fn query_keeps_user_part_and_appends_padding() {
        let config = TransportConfig {
            path: "/up?ed=2048".to_string(),
            x_padding_bytes: RangeConfig::fixed(4),
            ..Default::default()
        };
        assert_eq!(config.normalized_query(), "ed=2048&x_padding=0000");
    }

    #[test]
    fn padding_header_uses_sampled_length() {
        let config = TransportConfig {
            x_padding_bytes: RangeConfig::fixed(3),
            ..Default::default()
        };
        assert_eq!(
            config.response_padding_header(),
            Some(("X-Padding", "000".to_string()))
        );

        let no_padding = TransportConfig {
            x_padding_bytes: RangeConfig::new(0, 1),
            ..Default::default()
        };
        assert_eq!(no_padding.response_padding_header(), None);
    }

    #[test]
    fn unset_ranges_get_defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.normalized_x_padding_bytes(), RangeConfig::new(100, 1000));
        assert_eq!(
            config.normalized_sc_max_each_post_bytes(),
            RangeConfig::fixed(1_000_000)
        );
        assert_eq!(config.normalized_sc_max_concurrent_posts(), RangeConfig::fixed(100));
        assert_eq!(config.normalized_upload_delay(), Duration::from_millis(30));

        let mux = MultiplexingConfig::default();
        assert_eq!(mux.mode, MuxMode::Disabled);
        assert_eq!(mux.concurrency_cap(), 3);
        assert_eq!(mux.eviction_age(), Duration::from_secs(90));
    }

    #[test]
    fn zero_max_connections_is_never_saturated() {
        let mut mux = MultiplexingConfig::default();
        assert!(!mux.is_saturated(10_000));

        mux.max_connections = 2;
        assert!(!mux.is_saturated(1));
        assert!(mux.is_saturated(2));
    }

    #[test]
    fn mode_parses_from_snake_case() {
        let mux: MultiplexingConfig = toml::from_str("mode = \"prefer_new\"").unwrap();
        assert_eq!(mux.mode, MuxMode::PreferNew);
        assert_eq!(mux.mode.to_string(), "prefer_new");
    }
}
