use std::time::Duration;

pub const DEFAULT_SIGNALING_PORT: u16 = 3479;
pub const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:3000";
const PING_INTERVAL: Duration = Duration::from_secs(30);
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Relay process settings.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind_addr: String,
    /// `None` accepts any origin.
    pub allowed_origin: Option<String>,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{}", DEFAULT_SIGNALING_PORT),
            allowed_origin: Some(DEFAULT_ALLOWED_ORIGIN.to_string()),
            ping_interval: PING_INTERVAL,
            pong_timeout: PONG_TIMEOUT,
        }
    }
}

impl RelayConfig {
    /// Read `MESHCALL_BIND`, `MESHCALL_PORT` (or `PORT`) and
    /// `MESHCALL_ALLOWED_ORIGIN` over the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        let port = lookup("MESHCALL_PORT")
            .or_else(|| lookup("PORT"))
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(DEFAULT_SIGNALING_PORT);
        config.bind_addr = lookup("MESHCALL_BIND").unwrap_or_else(|| format!("0.0.0.0:{}", port));

        if let Some(origin) = lookup("MESHCALL_ALLOWED_ORIGIN") {
            config.allowed_origin = match origin.trim() {
                "*" => None,
                origin => Some(origin.to_string()),
            };
        }

        config
    }

    /// Native clients send no Origin header and are always let through.
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        match (&self.allowed_origin, origin) {
            (None, _) | (_, None) => true,
            (Some(allowed), Some(origin)) => allowed == origin,
        }
    }
}
