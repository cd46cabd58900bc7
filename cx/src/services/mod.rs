//! Service runtime: bounded-queue workers fronting every external
//! side-effect
//!
//! Every LLM call, disk write, and CPU-bound parse goes through a
//! registered [`Service`]. Services are registered for the duration of a
//! [`RunningServices`] scope; submitting to a service outside its scope is
//! a programmer error surfaced as [`ServiceError::NotInitialized`].

pub mod base;
pub mod cpu;
pub mod threaded;
pub mod usage;

pub use base::{RunningServices, Service, ServiceError, ServicesBuilder, call};
pub use cpu::{PdfLoader, PdfParser};
pub use threaded::{
    CachedFile, CleanedFileWriter, FileMover, JurisdictionEntry, JurisdictionUpdater,
    TempFileCache, UsageUpdater, ValuesCsvWriter,
};
pub use usage::{
    SharedUsage, TimeBoundedUsageTracker, TimedEntry, UsageCategory, UsageCounts, UsageTracker,
    model_cost_per_million, usage_from_response,
};
