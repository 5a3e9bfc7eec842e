pub mod engine;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod frontier;
pub mod liveness;
pub mod result;
pub mod sink;

pub use engine::{
    CrawlEngine, CrawlEvent, EngineConfig, EngineState, ProgressCallback, StopHandle, parse_seed_url,
    validate_seed,
};
pub use error::ScanError;
pub use fetch::{FetchConfig, Fetcher, HttpFetcher};
pub use frontier::Frontier;
pub use liveness::LivenessChecker;
pub use result::{CrawlRecord, CrawlSummary, DomainVerdict, Verdict};
pub use sink::RecordSink;
