//! State queries and notification emulation for polling-only hosts

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use kr_core::{CallError, ConnectionError};
use kr_protocol::PlayerSnapshot;

use super::dispatcher::NotificationDispatcher;
use super::state::{diff_snapshots, ApplicationSnapshot, HostSnapshot};
use crate::rpc::methods::{
    GetActivePlayers, GetApplicationProperties, GetPlayerItem, GetPlayerProperties, PlayerQuery,
    PropertyQuery, APPLICATION_PROPERTIES, ITEM_PROPERTIES, PLAYER_PROPERTIES,
};
use crate::executor::{DeliveryExecutor, Handoff};
use crate::rpc::CallCorrelator;

/// Query the host's full player and application state.
///
/// Each step completes through `executor`.
pub async fn query_snapshot(
    correlator: &CallCorrelator,
    timeout: Duration,
    executor: Arc<dyn DeliveryExecutor>,
) -> Result<HostSnapshot, CallError> {
    let players = correlator
        .request::<GetActivePlayers>((), timeout, executor.clone())
        .await?;

    let player = match players.into_iter().next() {
        Some(active) => {
            let query = || PlayerQuery {
                player_id: active.player_id,
                properties: PLAYER_PROPERTIES,
            };
            let properties = correlator
                .request::<GetPlayerProperties>(query(), timeout, executor.clone())
                .await?;
            let item = correlator
                .request::<GetPlayerItem>(
                    PlayerQuery {
                        properties: ITEM_PROPERTIES,
                        ..query()
                    },
                    timeout,
                    executor.clone(),
                )
                .await?;

            Some(PlayerSnapshot {
                player_id: active.player_id,
                kind: properties.kind.unwrap_or_else(|| active.kind.clone()),
                speed: properties.speed,
                item: Some(item.item),
                position: properties.time,
                duration: properties.totaltime,
            })
        }
        None => None,
    };

    let app = correlator
        .request::<GetApplicationProperties>(
            PropertyQuery {
                properties: APPLICATION_PROPERTIES,
            },
            timeout,
            executor,
        )
        .await?;

    Ok(HostSnapshot {
        player,
        application: Some(ApplicationSnapshot {
            volume: app.volume,
            muted: app.muted,
        }),
    })
}

/// Poll the host and dispatch the difference between successive snapshots.
///
/// The first snapshot is published in full. Returns the connection error
/// that stopped polling, or `None` when cancelled.
pub async fn run_poller(
    correlator: Arc<CallCorrelator>,
    dispatcher: Arc<NotificationDispatcher>,
    interval: Duration,
    cancel: CancellationToken,
) -> Option<ConnectionError> {
    let timeout = correlator.default_timeout();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut previous: Option<(HostSnapshot, Instant)> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => return None,
            result = query_snapshot(&correlator, timeout, Arc::new(Handoff)) => result,
        };

        match result {
            Ok(snapshot) => {
                let now = Instant::now();
                let events = match &previous {
                    Some((prev, at)) => diff_snapshots(Some(prev), &snapshot, now - *at),
                    None => diff_snapshots(None, &snapshot, Duration::ZERO),
                };
                if !events.is_empty() {
                    tracing::debug!("Poll produced {} events", events.len());
                }
                for event in events {
                    dispatcher.dispatch(event);
                }
                previous = Some((snapshot, now));
            }
            Err(CallError::Connection(err)) => {
                tracing::warn!("Polling stopped: {}", err);
                return Some(err);
            }
            Err(CallError::Cancelled) => return None,
            Err(e) => {
                tracing::warn!("State query failed: {}", e);
            }
        }
    }
}
