pub mod backend;
pub mod cli;
pub mod client;
pub mod config;
pub mod entity;
pub mod error;
pub mod merge;
pub mod propagation;
pub mod search;
pub mod seed;
pub mod server;
pub mod service;
pub mod storage;

pub use error::{EffectError, Result};
pub use merge::{merge_catalogs, MergedPromptItem};
pub use propagation::ChangeBus;
pub use service::EffectService;
pub use storage::{CatalogStore, OverrideStore};
