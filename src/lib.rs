pub mod classify;
pub mod core;
pub mod fetch;

// --- Primary core exports ---
pub use classify::ContentClassifier;
pub use core::config;
pub use core::config::BatchConfig;
pub use core::error::FetchError;
pub use core::types;
pub use core::types::*;
pub use fetch::aggregate::ResultAggregator;
pub use fetch::batch::fetch_batch;
pub use fetch::decodo::DecodoClient;
pub use fetch::renderer::RendererPool;
pub use fetch::static_xhr::StaticFetcher;
