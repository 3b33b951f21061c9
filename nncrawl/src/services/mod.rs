//! Crawl services
//!
//! Leaf-first: weight store, UCI parser, engine runner, coordinator.

pub mod crawl_coordinator;
pub mod engine_runner;
pub mod uci_parser;
pub mod weight_store;

pub use crawl_coordinator::{CrawlCoordinator, CrawlSettings, CrawlSummary};
pub use engine_runner::{EngineConfig, EngineError, Evaluator, UciEngineRunner};
pub use uci_parser::{parse_output, UciParseError};
pub use weight_store::{ResolvedWeights, WeightError, WeightLease, WeightStore, WeightStoreConfig};
