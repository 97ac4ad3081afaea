//! One-shot input: event-server buttons and text entry

use anyhow::{Context, Result};

use kr_client::control::KEYBOARD_MAP;
use kr_client::methods::{SendText, SendTextParams};
use kr_client::{ControlChannel, SerialExecutor};
use kr_core::ClientConfig;

use super::Session;
use crate::output::{print_success, print_warning};

/// Press `button` on the host's event server.
///
/// Control packets are fire-and-forget UDP, so success only means the
/// packets left this machine.
pub async fn button_command(
    config: ClientConfig,
    host: Option<&str>,
    button: &str,
    map: Option<&str>,
) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    let host = config
        .host(host)
        .context("No host to talk to (add one with 'kore config init')")?;

    let channel = ControlChannel::open(&host, &config.event_server.device_name)
        .await
        .with_context(|| format!("Failed to reach event server at {}", host.event_server_address()))?;

    let map = map.unwrap_or(KEYBOARD_MAP);
    let sent = channel.button_press(map, button);
    channel.close();

    match sent {
        Ok(()) => {
            print_success(&format!("Sent {} ({}) to {}", button, map, host.name));
            Ok(())
        }
        Err(e) => {
            print_warning(&format!("Button {} was not sent: {}", button, e));
            Err(e.into())
        }
    }
}

/// Type `text` into the host's active input dialog
pub async fn text_command(
    config: ClientConfig,
    host: Option<&str>,
    text: &str,
    keep_open: bool,
) -> Result<()> {
    let session = Session::new(config, host, SerialExecutor::spawn())?;
    let conn = session.connect().await?;

    let outcome = conn
        .request::<SendText>(SendTextParams {
            text: text.to_string(),
            done: !keep_open,
        })
        .await;
    session.close().await;

    outcome.context("Input.SendText failed")?;
    print_success("Text sent");
    Ok(())
}
