use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub port: u16,
    pub app_env: String,
    pub static_dir: Option<String>,

    // Upstream sources
    pub m3u_url: String,
    pub xmltv_url: String,
    pub playlist_fetch_timeout_ms: u64,
    pub guide_fetch_timeout_ms: u64,
    pub max_redirects: usize,

    // Stream proxy
    pub stream_connect_timeout_ms: u64,
    pub default_user_agent: String,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self {
            // Server
            port: env::var("PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .unwrap_or(8000),
            app_env: env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
            static_dir: env::var("STATIC_DIR").ok().filter(|v| !v.trim().is_empty()),

            // Upstream sources (xTeVe defaults)
            m3u_url: env::var("M3U_URL")
                .unwrap_or_else(|_| "http://192.168.1.198:34400/m3u/xteve.m3u".to_string()),
            xmltv_url: env::var("XMLTV_URL")
                .unwrap_or_else(|_| "http://192.168.1.198:34400/xmltv/xteve.xml".to_string()),

            playlist_fetch_timeout_ms: env::var("PLAYLIST_FETCH_TIMEOUT_MS")
                .unwrap_or_else(|_| "30000".to_string())
                .parse()
                .unwrap_or(30_000), // 30 seconds

            guide_fetch_timeout_ms: env::var("GUIDE_FETCH_TIMEOUT_MS")
                .unwrap_or_else(|_| "60000".to_string())
                .parse()
                .unwrap_or(60_000), // 60 seconds, guides are large

            max_redirects: env::var("MAX_REDIRECTS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),

            // Stream proxy
            stream_connect_timeout_ms: env::var("STREAM_CONNECT_TIMEOUT_MS")
                .unwrap_or_else(|_| "30000".to_string())
                .parse()
                .unwrap_or(30_000),

            default_user_agent: env::var("DEFAULT_USER_AGENT").unwrap_or_else(|_| {
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string()
            }),
        }
    }

    pub fn playlist_fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.playlist_fetch_timeout_ms)
    }

    pub fn guide_fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.guide_fetch_timeout_ms)
    }

    pub fn stream_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_connect_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
