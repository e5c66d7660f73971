//! Download scheduling.
//!
//! The [`Scheduler`] takes the conflict-free output of the catalog and
//! drives every resource to a terminal state: already satisfied, newly
//! downloaded, corrupted, or hardlinked. Bytes come from a [`Transport`],
//! which only has to open a URL and hand out chunks; [`HttpTransport`] does
//! that over HTTP(S).
//!
//! Everything the run changed is summarised in a [`Changelog`].

mod changelog;
pub mod error;
mod handle;
mod retry;
mod scheduler;
#[cfg(test)]
mod testing;
mod transport;

pub use crate::changelog::{Changelog, Entry, Summary};
pub use crate::handle::RunHandle;
pub use crate::retry::RetryPolicy;
pub use crate::scheduler::{Scheduler, SchedulerSettings};
pub use crate::transport::{Body, Credential, HttpTransport, Transport, TransportError, TransportResult};
