//! # dester-startup
//!
//! Cold-start sequencing: read the configuration, bring up the rclone daemon,
//! bind one remote handle per category, and run metadata ingestion once.
//!
//! [`StartupSequencer::run`] returns a [`StartupOutcome`]; the process entry
//! point ([`start_blocking`]) aborts on `Failed`.

pub mod error;
pub mod metadata;
mod runtime;
pub mod sequencer;

pub use error::{MetadataError, StartupError};
pub use metadata::{
    IngestReport, MetadataIngestor, MetadataSyncTrigger, TmdbClient, TmdbIngestor, TriggerOutcome,
};
pub use runtime::{init_tracing, run, start_blocking};
pub use sequencer::{ProvisionReport, StartupOutcome, StartupSequencer, StartupState};
