//! Redirect and rewrite rule engine.

pub mod admin;
pub mod aging;
pub mod analysis;
pub mod conditions;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod notfound;
pub mod observability;
pub mod routing;
pub mod rules;

pub use config::schema::EngineConfig;
pub use http::{AppState, HttpServer};
pub use lifecycle::Shutdown;
pub use routing::{MatchResult, Redirector};
pub use rules::{RuleCache, RuleManager, RuleStore};
