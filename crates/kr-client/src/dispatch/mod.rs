//! Notification dispatch
//!
//! Observers register per role. Pushed notifications and polled state diffs
//! both end up as [`NotificationEvent`](kr_protocol::NotificationEvent)s
//! handed to [`NotificationDispatcher::dispatch`].

mod dispatcher;
mod poller;
mod state;

pub use dispatcher::{observer_fn, DispatchMark, NotificationDispatcher, Observer};
pub use poller::{query_snapshot, run_poller};
pub use state::{diff_snapshots, fold, snapshot_events, ApplicationSnapshot, HostSnapshot};
