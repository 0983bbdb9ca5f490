//! Log sessions for ulogview
//!
//! A [`Session`] binds a [`LogProfile`] to log readers, merges their logs in
//! one sorted collection, filters them, keeps marked logs in sidecar files and
//! saves or restores its state. Process-wide services live in a
//! [`SessionContext`] shared by every session.

mod config;
mod context;
mod dispose;
mod io_queue;
pub mod marks;
mod profile;
mod scheduled;
mod session;
mod state;

pub use config::{MAX_UPDATE_INTERVAL_MS, MIN_UPDATE_INTERVAL_MS, Settings};
pub use context::SessionContext;
pub use dispose::{DISPOSE_CHUNK_SIZE, DISPOSE_INTERVAL, DisposeQueue};
pub use io_queue::IoQueue;
pub use marks::{MARKED_FILE_EXTENSION, MarkedLogInfo};
pub use profile::{LogProfile, PredefinedLogTextFilter};
pub use scheduled::ScheduledAction;
pub use session::{Session, SessionNotification, SessionPhase, TimeInfo};
pub use state::{LogReaderSnapshot, SessionState, TextFilterSnapshot};
