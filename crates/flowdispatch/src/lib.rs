//! Work dispatch coordinator
//!
//! Queues library files, hands each one to exactly one processing node at a
//! time, tracks node liveness and eligibility, and detects duplicate content.

mod clock;
mod config;
pub mod fingerprint;
mod nodes;
mod queue;
mod scanner;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::DispatchConfig;
pub use fingerprint::{fingerprint_bytes, fingerprint_file, Deduper, Verdict};
pub use nodes::{normalize_address, NodeRegistry};
pub use queue::WorkQueue;
pub use scanner::{ScanSummary, Scanner};
pub use store::{Claim, Completion, CompletionResult, MemoryStore, Store, StoreError};
