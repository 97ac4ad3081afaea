//! Calls: typed method descriptors and the pending-call correlator

mod correlator;
pub mod methods;

pub use correlator::{run_outbound_pump, run_timeout_sweep, CallCorrelator, OutboundQueue};
pub use methods::ApiMethod;
