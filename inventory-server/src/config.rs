use std::net::SocketAddr;
use std::path::PathBuf;

use inventory_core::Scope;
use serde::Deserialize;

use crate::merge::ScopeLimits;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub limits: ScopeLimits,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub clients: ClientsConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address for the HTTP server to listen on
    pub http_addr: SocketAddr,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    Memory,
    Sqlite { path: PathBuf },
}

#[derive(Debug, Deserialize)]
pub struct QueryConfig {
    /// Scopes the strict (v2) listing accepts in filters
    pub strict_scopes: Vec<Scope>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            strict_scopes: vec![Scope::Identity],
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ClientsConfig {
    /// Base URL of the workflows service, reindexing is off when unset
    pub workflows_addr: Option<String>,
    /// Base URL of the device monitor service
    pub devicemonitor_addr: Option<String>,
}

impl Config {
    pub fn load(path: &PathBuf) -> color_eyre::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                http_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            },
            store: StoreConfig::Memory,
            limits: ScopeLimits::default(),
            query: QueryConfig::default(),
            clients: ClientsConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config: Config = toml::from_str(
            r#"
            [server]
            http_addr = "127.0.0.1:9090"

            [store]
            type = "sqlite"
            path = "/var/lib/inventory/inventory.db"

            [limits]
            inventory = 10
            tags = 5

            [query]
            strict_scopes = ["identity", "inventory"]

            [clients]
            workflows_addr = "http://workflows:8080"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.http_addr.port(), 9090);
        assert!(matches!(config.store, StoreConfig::Sqlite { ref path } if path.ends_with("inventory.db")));
        assert_eq!(config.limits.limit(Scope::Inventory), 10);
        assert_eq!(config.limits.limit(Scope::Tags), 5);
        assert_eq!(config.limits.limit(Scope::Identity), 0);
        assert_eq!(config.query.strict_scopes, [Scope::Identity, Scope::Inventory]);
        assert_eq!(
            config.clients.workflows_addr.as_deref(),
            Some("http://workflows:8080")
        );
        assert!(config.clients.devicemonitor_addr.is_none());
    }

    #[test]
    fn test_partial_limits_keep_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            http_addr = "0.0.0.0:8080"

            [store]
            type = "memory"

            [limits]
            inventory = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.limits.limit(Scope::Inventory), 50);
        assert_eq!(config.limits.limit(Scope::Tags), ScopeLimits::DEFAULT_TAGS);
    }

    #[test]
    fn test_optional_sections_default() {
        let config: Config = toml::from_str(
            r#"
            [server]
            http_addr = "0.0.0.0:8080"

            [store]
            type = "memory"
            "#,
        )
        .unwrap();

        assert_eq!(config.limits, ScopeLimits::default());
        assert_eq!(config.query.strict_scopes, [Scope::Identity]);
        assert!(config.clients.workflows_addr.is_none());
    }
}
