//! Stream host notifications to stdout

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};

use kr_client::{observer_fn, SerialExecutor};
use kr_core::ClientConfig;
use kr_protocol::{NotificationEvent, ObserverRole};

use super::Session;
use crate::output::{format_event, print_info, print_warning};

/// Parse role names; no names means every role
pub fn parse_roles(names: &[String]) -> Result<Vec<ObserverRole>> {
    if names.is_empty() {
        return Ok(ObserverRole::ALL.to_vec());
    }

    let mut roles = Vec::with_capacity(names.len());
    for name in names {
        let role = match name.to_ascii_lowercase().as_str() {
            "player" => ObserverRole::Player,
            "application" | "app" => ObserverRole::Application,
            "playlist" => ObserverRole::Playlist,
            "input" => ObserverRole::Input,
            "system" => ObserverRole::System,
            other => bail!(
                "Unknown role '{}' (expected player, application, playlist, input or system)",
                other
            ),
        };
        if !roles.contains(&role) {
            roles.push(role);
        }
    }
    Ok(roles)
}

/// Print notifications for `roles` until Ctrl+C, or until `limit` have been shown
pub async fn watch_command(
    config: ClientConfig,
    host: Option<&str>,
    roles: Vec<ObserverRole>,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    // Observers run on this task, between the selects below
    let (executor, mut queue) = SerialExecutor::manual();
    let session = Session::new(config, host, executor)?;

    let shown = Arc::new(AtomicUsize::new(0));
    for role in &roles {
        let shown = shown.clone();
        session.manager.register_observer(
            *role,
            observer_fn(move |event| {
                // Registration placeholders are noise on a live stream
                if matches!(event, NotificationEvent::NoResultsYet(_)) {
                    return;
                }
                if json {
                    println!("{}", event_json(event));
                } else {
                    println!("{}", format_event(event));
                }
                shown.fetch_add(1, Ordering::SeqCst);
            }),
        );
    }

    session.connect().await?;
    print_info(&format!(
        "Watching {} on {} (Ctrl+C to stop)",
        roles
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join(", "),
        session.host.name
    ));

    let mut status = session.manager.subscribe_status();
    let done = |shown: &AtomicUsize| limit.is_some_and(|l| shown.load(Ordering::SeqCst) >= l);

    while !done(&shown) {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            more = queue.next() => {
                if !more {
                    break;
                }
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                print_warning(&format!("Connection {}", current));
            }
        }
    }

    session.close().await;
    queue.run_pending();
    Ok(())
}

fn event_json(event: &NotificationEvent) -> serde_json::Value {
    serde_json::json!({
        "role": event.role(),
        "event": format_event(event),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roles() {
        assert_eq!(parse_roles(&[]).unwrap(), ObserverRole::ALL.to_vec());
        assert_eq!(
            parse_roles(&["Player".to_string(), "app".to_string(), "player".to_string()]).unwrap(),
            vec![ObserverRole::Player, ObserverRole::Application]
        );
        assert!(parse_roles(&["library".to_string()]).is_err());
    }
}
