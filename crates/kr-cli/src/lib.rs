//! kore-remote: command-line remote control for Kodi-style hosts
//!
//! Provides the `kore` CLI: one-shot JSON-RPC calls, a state readout, a
//! notification stream, and an interactive keyboard remote.

pub mod commands;
pub mod output;
