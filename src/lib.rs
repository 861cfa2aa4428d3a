//! Debounced, comment-preserving editor for `/etc/hosts` style files.
//!
//! Queue add/remove intents against a [`Hosts`] handle; a worker task
//! coalesces them into reconciliation cycles that merge the queue into the
//! on-disk file and write the result back, leaving comments, blank lines,
//! and original spacing intact.

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod fs;
pub mod merge;
pub mod queue;
mod snapshot;

pub use config::{HostsOptions, LineEnding};
pub use engine::Hosts;
pub use error::{FileOp, HostsError, HostsResult};
pub use events::HostsEvent;
pub use fs::{HostsFs, RealFs};
pub use merge::reconcile;
pub use queue::{HostArg, MutationQueue, Removal, WILDCARD};
