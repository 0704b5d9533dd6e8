use std::env;
use std::time::Duration;

/// One upstream playlist feed. `ordinal` is its fixed position in `SOURCES`
/// and decides "first occurrence wins" across feeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub ordinal: usize,
    pub label: String,
    pub url: String,
}

/// Per-operation deadlines for engine control calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineTimeouts {
    pub start: Duration,
    pub stats: Duration,
    pub stop: Duration,
    pub ping: Duration,
}

impl Default for EngineTimeouts {
    fn default() -> Self {
        Self {
            start: Duration::from_secs(30),
            stats: Duration::from_secs(5),
            stop: Duration::from_secs(5),
            ping: Duration::from_secs(5),
        }
    }
}

impl EngineTimeouts {
    /// Defaults, with each entry overridable from the environment.
    /// Peer discovery latency varies a lot between deployments, so the
    /// start timeout is the one operators usually touch.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            start: env_secs("ENGINE_START_TIMEOUT_SECS", defaults.start),
            stats: env_secs("ENGINE_STATS_TIMEOUT_SECS", defaults.stats),
            stop: env_secs("ENGINE_STOP_TIMEOUT_SECS", defaults.stop),
            ping: env_secs("ENGINE_PING_TIMEOUT_SECS", defaults.ping),
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub port: u16,
    pub base_url: String,

    // Upstream playlists
    pub sources: Vec<SourceConfig>,
    pub fetch_timeout_ms: u64,
    pub fetch_cache_ttl_secs: u64,
    pub fetch_cache_max_entries: usize,
    pub max_retries: u32,
    pub transcode_audio: Option<String>,

    // Engine
    pub engine_url: String,
    pub engine_timeouts: EngineTimeouts,
    pub relay_write_timeout: Duration,
    pub relay_buffer_bytes: usize,

    // Storage
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub redis_url: Option<String>,

    // Misc
    pub user_agent: String,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self {
            // Server
            port: env::var("PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .unwrap_or(3001),
            base_url: env::var("BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_default(),

            // Upstream playlists
            sources: parse_sources(&env::var("SOURCES").unwrap_or_default()),
            fetch_timeout_ms: env::var("FETCH_TIMEOUT_MS")
                .unwrap_or_else(|_| "30000".to_string())
                .parse()
                .unwrap_or(30_000),
            fetch_cache_ttl_secs: env::var("FETCH_CACHE_TTL_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .unwrap_or(300), // 5 minutes
            fetch_cache_max_entries: env::var("FETCH_CACHE_MAX_ENTRIES")
                .unwrap_or_else(|_| "32".to_string())
                .parse()
                .unwrap_or(32),
            max_retries: env::var("MAX_RETRIES")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .unwrap_or(2),
            transcode_audio: env::var("TRANSCODE_AUDIO")
                .ok()
                .filter(|v| !v.trim().is_empty()),

            // Engine
            engine_url: env::var("ENGINE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| "http://127.0.0.1:6878".to_string()),
            engine_timeouts: EngineTimeouts::from_env(),
            relay_write_timeout: env_secs("RELAY_WRITE_TIMEOUT_SECS", Duration::from_secs(15)),
            relay_buffer_bytes: env::var("RELAY_BUFFER_KB")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(256)
                * 1024,

            // Storage
            database_url: env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
            redis_url: env::var("REDIS_URL").ok().filter(|v| !v.is_empty()),

            // Misc - Use VLC user agent to avoid playlist host blocks
            user_agent: env::var("USER_AGENT")
                .unwrap_or_else(|_| "VLC/3.0.20 LibVLC/3.0.20".to_string()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_secs(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

/// Parse `label=url,label=url`. An entry without `=` uses its position as label.
pub fn parse_sources(raw: &str) -> Vec<SourceConfig> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .enumerate()
        .map(|(ordinal, entry)| {
            let (label, url) = match entry.split_once('=') {
                // `=` inside a query string must not be taken as the separator
                Some((label, url)) if !label.contains("://") => {
                    (label.trim().to_string(), url.trim().to_string())
                }
                _ => (format!("source{}", ordinal + 1), entry.to_string()),
            };
            SourceConfig { ordinal, label, url }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sources_keeps_order() {
        let sources = parse_sources("main=http://a/list.m3u, backup=http://b/list.m3u");
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].ordinal, 0);
        assert_eq!(sources[0].label, "main");
        assert_eq!(sources[1].label, "backup");
        assert_eq!(sources[1].url, "http://b/list.m3u");
    }

    #[test]
    fn test_parse_sources_without_label() {
        let sources = parse_sources("http://a/get.php?type=m3u,,");
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].label, "source1");
        assert_eq!(sources[0].url, "http://a/get.php?type=m3u");
    }

    #[test]
    fn test_engine_timeout_defaults() {
        let timeouts = EngineTimeouts::default();
        assert_eq!(timeouts.start, Duration::from_secs(30));
        assert_eq!(timeouts.stop, Duration::from_secs(5));
    }
}
