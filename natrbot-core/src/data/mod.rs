//! Quote ingestion, storage and incremental sync

pub mod circuit_breaker;
pub mod http;
pub mod provider;
pub mod quotes;
pub mod replay;
pub mod store;
pub mod sync;

pub use circuit_breaker::CircuitBreaker;
pub use http::{Credentials, HttpQuoteProvider};
pub use provider::{DataError, ProviderSession, QuoteProvider};
pub use quotes::{canonical_code, normalize, DailyQuotes, QuoteRow};
pub use replay::ReplayQuoteProvider;
pub use store::{MergeSummary, QuoteStore, StoreStats};
pub use sync::{sync, SyncOptions, SyncReport, MAX_LOOKBACK_DAYS};
