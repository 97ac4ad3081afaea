//! kr-client: Connection runtime for Kore Remote
//!
//! This crate owns everything that happens between a collaborator issuing a
//! call and its callback firing:
//! - Transports (push TCP, polling HTTP, in-memory)
//! - The call correlator matching responses to pending calls
//! - The notification dispatcher, including polling emulation
//! - The best-effort control-packet channel
//! - Task chains for multi-step flows
//! - The connection lifecycle manager (host switch, reconnect, background)
//!
//! Results and notifications are always delivered on a [`DeliveryExecutor`]
//! supplied by the caller; nothing runs collaborator code on a network task.

pub mod connection;
pub mod control;
pub mod dispatch;
pub mod executor;
pub mod manager;
pub mod reconnect;
pub mod rpc;
pub mod task;
pub mod transport;

pub use connection::{Connection, ConnectionSettings};
pub use control::ControlChannel;
pub use dispatch::{
    diff_snapshots, observer_fn, ApplicationSnapshot, DispatchMark, HostSnapshot,
    NotificationDispatcher, Observer,
};
pub use executor::{DeliveryExecutor, Job, JobQueue, SerialExecutor};
pub use manager::ConnectionManager;
pub use reconnect::ExponentialBackoff;
pub use rpc::{methods, ApiMethod, CallCorrelator};
pub use task::{Callback, ChainHandle, StageFailure, TaskChain};
pub use transport::{Connector, DefaultConnector, Transport};
