// Gateway server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. Individual modules (DB pool, batching, etc.) may still read
// their own env vars — this module covers the core server settings.

use std::net::SocketAddr;

/// Core gateway configuration.
///
/// Constructed via [`GatewayConfig::from_env`] which reads environment
/// variables and falls back to sensible development defaults.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// JWT signing secret for access tokens.
    pub jwt_secret: String,
    /// PostgreSQL connection string; absent means the in-memory store.
    pub database_url: Option<String>,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
    /// Log filter directive (e.g. `info`, `quad_gateway=debug`).
    pub log_filter: String,
}

impl GatewayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `QUAD_GATEWAY_HOST` | `0.0.0.0` |
    /// | `QUAD_GATEWAY_PORT` | `8000` |
    /// | `QUAD_GATEWAY_JWT_SECRET` | dev-only placeholder |
    /// | `QUAD_GATEWAY_DATABASE_URL` | *(none — in-memory store)* |
    /// | `QUAD_GATEWAY_CORS_ORIGINS` | *(none — permissive dev default)* |
    /// | `QUAD_GATEWAY_LOG_FILTER` | `info` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("QUAD_GATEWAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("QUAD_GATEWAY_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8000);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let jwt_secret = env("QUAD_GATEWAY_JWT_SECRET")
            .unwrap_or_else(|_| "quad_local_development_jwt_secret_must_be_32_chars".into());

        let database_url = env("QUAD_GATEWAY_DATABASE_URL").ok();
        let cors_origins = env("QUAD_GATEWAY_CORS_ORIGINS").ok();

        let log_filter = env("QUAD_GATEWAY_LOG_FILTER").unwrap_or_else(|_| "info".into());

        Self { listen_addr, jwt_secret, database_url, cors_origins, log_filter }
    }

    /// Returns true when using the development-only JWT secret.
    pub fn is_dev_jwt_secret(&self) -> bool {
        self.jwt_secret == "quad_local_development_jwt_secret_must_be_32_chars"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from_map(
        map: HashMap<&'static str, &'static str>,
    ) -> impl Fn(&str) -> Result<String, std::env::VarError> {
        move |key: &str| {
            map.get(key)
                .map(|v| v.to_string())
                .ok_or(std::env::VarError::NotPresent)
        }
    }

    #[test]
    fn defaults_when_no_env_vars() {
        let cfg = GatewayConfig::from_env_fn(env_from_map(HashMap::new()));
        assert_eq!(cfg.listen_addr.port(), 8000);
        assert_eq!(cfg.listen_addr.ip().to_string(), "0.0.0.0");
        assert!(cfg.is_dev_jwt_secret());
        assert!(cfg.database_url.is_none());
        assert!(cfg.cors_origins.is_none());
        assert_eq!(cfg.log_filter, "info");
    }

    #[test]
    fn custom_host_and_port() {
        let mut m = HashMap::new();
        m.insert("QUAD_GATEWAY_HOST", "127.0.0.1");
        m.insert("QUAD_GATEWAY_PORT", "9000");
        let cfg = GatewayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:9000");
    }

    #[test]
    fn custom_jwt_secret_is_not_dev() {
        let mut m = HashMap::new();
        m.insert("QUAD_GATEWAY_JWT_SECRET", "production_secret_at_least_32_chars!!");
        let cfg = GatewayConfig::from_env_fn(env_from_map(m));
        assert!(!cfg.is_dev_jwt_secret());
        assert_eq!(cfg.jwt_secret, "production_secret_at_least_32_chars!!");
    }

    #[test]
    fn database_url_from_env() {
        let mut m = HashMap::new();
        m.insert("QUAD_GATEWAY_DATABASE_URL", "postgres://u:p@host/quad");
        let cfg = GatewayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://u:p@host/quad"));
    }

    #[test]
    fn cors_origins_from_env() {
        let mut m = HashMap::new();
        m.insert("QUAD_GATEWAY_CORS_ORIGINS", "https://app.quad.dev");
        let cfg = GatewayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.cors_origins.as_deref(), Some("https://app.quad.dev"));
    }

    #[test]
    fn log_filter_override() {
        let mut m = HashMap::new();
        m.insert("QUAD_GATEWAY_LOG_FILTER", "debug,tower_http=trace");
        let cfg = GatewayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.log_filter, "debug,tower_http=trace");
    }

    #[test]
    fn invalid_port_uses_default() {
        let mut m = HashMap::new();
        m.insert("QUAD_GATEWAY_PORT", "not_a_number");
        let cfg = GatewayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.listen_addr.port(), 8000);
    }
}
