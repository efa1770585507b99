pub mod api;
pub mod client;
pub mod concurrency;
pub mod config;
pub mod context;
pub mod inventory;
pub mod merge;
pub mod query;
pub mod store;

use std::sync::Arc;

use config::Config;
use inventory::Inventory;
use query::{ParserConfig, QueryParser};

/// Shared state of the HTTP handlers.
#[derive(Clone)]
pub struct AppState<S> {
    pub inventory: Inventory<S>,
    /// Parser of the v1 listing, unscoped keys address inventory attributes.
    pub legacy_parser: Arc<QueryParser>,
    /// Parser of the v2 listing, keys must carry an allowed scope.
    pub strict_parser: Arc<QueryParser>,
}

impl<S> AppState<S> {
    pub fn new(inventory: Inventory<S>, config: &Config) -> Self {
        Self {
            inventory,
            legacy_parser: Arc::new(QueryParser::new(ParserConfig::legacy())),
            strict_parser: Arc::new(QueryParser::new(ParserConfig::strict(
                config.query.strict_scopes.clone(),
            ))),
        }
    }
}
