//! Knowledge-base operations: retrieve-and-generate queries with stale
//! session recovery, and ingestion sync.

pub mod ingestion;
pub mod query;
pub mod retry;

pub use ingestion::{Clock, IngestionOutcome, IngestionPoller, KnowledgeBaseSync, TokioClock};
pub use query::QueryAttempt;
pub use retry::{FragmentMatcher, QueryOutcome, RetryingQueryExecutor, StaleSessionMatcher};
