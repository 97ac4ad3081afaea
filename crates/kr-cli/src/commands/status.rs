//! Status command implementation

use anyhow::{Context, Result};

use kr_client::SerialExecutor;
use kr_core::ClientConfig;

use super::Session;
use crate::output::format_snapshot;

/// Print what the host is playing and its volume
pub async fn status_command(config: ClientConfig, host: Option<&str>, json: bool) -> Result<()> {
    let session = Session::new(config, host, SerialExecutor::spawn())?;
    let conn = session.connect().await?;

    let snapshot = conn.snapshot().await;
    let status = session.manager.status();
    let host = session.host.clone();
    session.close().await;

    let snapshot = snapshot.context("Failed to query host state")?;
    if json {
        let application = snapshot.application.map(|a| {
            serde_json::json!({"volume": a.volume, "muted": a.muted})
        });
        let value = serde_json::json!({
            "host": host.name,
            "mode": host.mode,
            "player": snapshot.player,
            "application": application,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{}", format_snapshot(&host, status, &snapshot));
    }

    Ok(())
}
