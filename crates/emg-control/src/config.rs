use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;

const DEV_JWT_SECRET: &str = "dev-insecure-change-me";

/// Process configuration, read once from the environment at boot.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    pub admin_email: String,
    pub admin_password: String,
    pub allowed_origins: Vec<String>,
    pub geocoding_url: String,
    pub geocoding_cache_ttl: Duration,
    pub setup_token_ttl: Duration,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

pub fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.trim_end_matches('/').to_string())
        .collect()
}

impl ControlConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").map_err(|_| anyhow::anyhow!("DATABASE_URL is required"))?;

        let bind_addr = env_or("EMG_BIND_ADDR", "0.0.0.0:8080")
            .parse()
            .context("EMG_BIND_ADDR must be host:port")?;

        let jwt_secret = env_or("EMG_JWT_SECRET", DEV_JWT_SECRET);
        if jwt_secret == DEV_JWT_SECRET {
            tracing::warn!("EMG_JWT_SECRET not set, using the development secret");
        }

        // Dev-friendly defaults. Production should set `EMG_ALLOWED_ORIGINS` explicitly.
        let allowed_origins = parse_origins(&env_or(
            "EMG_ALLOWED_ORIGINS",
            "http://localhost:3000,http://127.0.0.1:3000",
        ));

        let cache_secs = env_or("EMG_GEOCODING_CACHE_SECS", "3600")
            .parse::<u64>()
            .context("EMG_GEOCODING_CACHE_SECS must be a number of seconds")?;

        Ok(Self {
            database_url,
            bind_addr,
            jwt_secret,
            admin_email: env_or("EMG_ADMIN_EMAIL", "admin@hmq.local"),
            admin_password: env_or("EMG_ADMIN_PASSWORD", "admin"),
            allowed_origins,
            geocoding_url: env_or("EMG_GEOCODING_URL", "https://nominatim.openstreetmap.org"),
            geocoding_cache_ttl: Duration::from_secs(cache_secs),
            setup_token_ttl: Duration::from_secs(7 * 24 * 60 * 60),
        })
    }

    pub fn origin_is_allowed(&self, origin: &str) -> bool {
        let origin = origin.trim_end_matches('/');
        self.allowed_origins.iter().any(|a| a == origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origins_are_trimmed_and_split() {
        let got = parse_origins(" https://emg.hmq.ch/ ,,http://localhost:3000");
        assert_eq!(got, vec!["https://emg.hmq.ch", "http://localhost:3000"]);
    }
}
