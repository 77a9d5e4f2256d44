//! Canary testing of software updates

mod signal;
mod tester;

pub use signal::{FaultSignal, KnownFailures, MetadataFaultSignal};
pub use tester::{
    recommend, sample_size, CanaryConfig, CanaryTester, INVESTIGATE_ERROR_RATE,
    INVESTIGATE_LATENCY_IMPACT, ROLLBACK_ERROR_RATE,
};
