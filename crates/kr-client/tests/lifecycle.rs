//! Connection lifecycle: host switch, reconnect, background, shutdown

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use kr_client::transport::memory::{MemoryConnector, MemoryTransport};
use kr_client::transport::{Connector, Transport};
use kr_client::{observer_fn, ConnectionManager, SerialExecutor};
use kr_core::{CallError, ConnectionError, ConnectionStatus, HostDescriptor, TransportMode};
use kr_protocol::{NotificationEvent, ObserverRole, PlayerEvent};

use common::{bedroom, test_config, wait_for, FakeHost, HostState};

type Outcomes = Arc<Mutex<Vec<Result<Value, CallError>>>>;

fn recorder(outcomes: &Outcomes) -> impl FnOnce(Result<Value, CallError>) + Send + 'static {
    let outcomes = outcomes.clone();
    move |outcome| outcomes.lock().unwrap().push(outcome)
}

/// Records whether the first transport was closed when the second connect began
struct OrderCheckingConnector {
    inner: MemoryConnector,
    first: Arc<MemoryTransport>,
    first_closed_before_second: AtomicBool,
}

#[async_trait]
impl Connector for OrderCheckingConnector {
    async fn connect(&self, host: &HostDescriptor) -> Result<Arc<dyn Transport>, ConnectionError> {
        if self.inner.attempts() == 1 {
            self.first_closed_before_second
                .store(self.first.is_closed(), Ordering::SeqCst);
        }
        self.inner.connect(host).await
    }
}

async fn next(rx: &mut mpsc::UnboundedReceiver<NotificationEvent>) -> NotificationEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("observer channel closed")
}

#[tokio::test]
async fn test_host_switch_cancels_pending_calls_before_opening_new_connection() {
    let inner = MemoryConnector::new();
    let (first, first_end) = inner.expect_connection(TransportMode::Push);
    let (second, second_end) = inner.expect_connection(TransportMode::Push);
    let old_host = FakeHost::spawn(first_end, TransportMode::Push, HostState::default());
    let _new_host = FakeHost::spawn(second_end, TransportMode::Push, HostState::default());

    let connector = Arc::new(OrderCheckingConnector {
        inner,
        first: first.clone(),
        first_closed_before_second: AtomicBool::new(false),
    });

    let (executor, mut jobs) = SerialExecutor::manual();
    let manager = ConnectionManager::new(test_config(), connector.clone(), executor);

    let conn = manager.connection().await.unwrap();
    assert_eq!(conn.host().name, "den");

    let outcomes: Outcomes = Default::default();
    assert!(conn.call_raw("Test.Hold", Value::Null, recorder(&outcomes)).is_some());
    assert!(conn.call_raw("Test.Hold", Value::Null, recorder(&outcomes)).is_some());
    wait_for(|| old_host.count("Test.Hold") == 2).await;

    let new_conn = manager.switch_host(bedroom()).await.unwrap();
    assert_eq!(new_conn.host().name, "bedroom");
    assert!(first.is_closed());
    assert!(!second.is_closed());
    assert!(connector.first_closed_before_second.load(Ordering::SeqCst));

    jobs.run_pending();
    let outcomes = outcomes.lock().unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| *o == Err(CallError::Cancelled)));

    assert_eq!(manager.host().unwrap().name, "bedroom");
    assert_eq!(
        connector.inner.connected_hosts(),
        vec!["den".to_string(), "bedroom".to_string()]
    );
}

#[tokio::test]
async fn test_every_call_completes_exactly_once_across_teardown() {
    let connector = Arc::new(MemoryConnector::new());
    let (_transport, end) = connector.expect_connection(TransportMode::Push);
    let host = FakeHost::spawn(end, TransportMode::Push, HostState::default());

    let (executor, mut jobs) = SerialExecutor::manual();
    let manager = ConnectionManager::new(test_config(), connector, executor);
    let conn = manager.connection().await.unwrap();

    let outcomes: Outcomes = Default::default();
    for i in 0..40 {
        let method = if i % 2 == 0 { "JSONRPC.Ping" } else { "Test.Hold" };
        conn.call_raw(method, Value::Null, recorder(&outcomes));
    }
    wait_for(|| host.count("JSONRPC.Ping") >= 10).await;

    manager.disconnect("test").await;
    // Calls after teardown fail immediately instead of being sent
    conn.call_raw("JSONRPC.Ping", Value::Null, recorder(&outcomes));

    jobs.run_pending();
    let outcomes = outcomes.lock().unwrap();
    assert_eq!(outcomes.len(), 41);
    assert!(outcomes.iter().filter(|o| o.is_ok()).count() >= 10);
    assert!(outcomes
        .iter()
        .filter_map(|o| o.as_ref().err())
        .all(|e| *e == CallError::Cancelled));
    assert_eq!(manager.status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_reconnects_after_transport_loss_and_refreshes_state() {
    let connector = Arc::new(MemoryConnector::new());
    let (_first, first_end) = connector.expect_connection(TransportMode::Push);
    let (_second, second_end) = connector.expect_connection(TransportMode::Push);

    let playing = HostState {
        player: Some((7, 1, 30)),
        ..HostState::default()
    };
    let first_host = FakeHost::spawn(first_end, TransportMode::Push, playing.clone());
    let _second_host = FakeHost::spawn(second_end, TransportMode::Push, playing);

    let executor = SerialExecutor::spawn();
    let manager = ConnectionManager::new(test_config(), connector.clone(), executor);

    let (tx, mut rx) = mpsc::unbounded_channel();
    manager.register_observer(
        ObserverRole::Player,
        observer_fn(move |event| {
            let _ = tx.send(event.clone());
        }),
    );

    manager.connection().await.unwrap();

    assert_eq!(next(&mut rx).await, NotificationEvent::NoResultsYet(ObserverRole::Player));
    assert!(matches!(
        next(&mut rx).await,
        NotificationEvent::Player(PlayerEvent::NowPlaying(s)) if s.item.as_ref().and_then(|i| i.id) == Some(7)
    ));

    first_host.hang_up();
    assert!(matches!(
        next(&mut rx).await,
        NotificationEvent::ConnectionLost { role: ObserverRole::Player, .. }
    ));
    assert!(matches!(
        next(&mut rx).await,
        NotificationEvent::Player(PlayerEvent::NowPlaying(_))
    ));

    assert_eq!(connector.attempts(), 2);
    wait_for(|| manager.status() == ConnectionStatus::Connected).await;
    manager.shutdown().await;
}

#[tokio::test]
async fn test_reconnect_keeps_trying_until_host_returns() {
    let connector = Arc::new(MemoryConnector::new());
    let (_first, first_end) = connector.expect_connection(TransportMode::Push);
    let first_host = FakeHost::spawn(first_end, TransportMode::Push, HostState::default());

    let executor = SerialExecutor::spawn();
    let manager = ConnectionManager::new(test_config(), connector.clone(), executor);
    manager.connection().await.unwrap();

    first_host.hang_up();
    wait_for(|| connector.attempts() >= 4).await;
    assert_eq!(manager.status(), ConnectionStatus::Reconnecting);
    assert!(manager.current().await.is_none());

    let (_second, second_end) = connector.expect_connection(TransportMode::Push);
    let _second_host = FakeHost::spawn(second_end, TransportMode::Push, HostState::default());
    wait_for(|| manager.status() == ConnectionStatus::Connected).await;
    assert!(manager.current().await.is_some());

    manager.shutdown().await;
}

#[tokio::test]
async fn test_backoff_starts_over_after_successful_reconnect() {
    let mut config = test_config();
    config.backoff.initial = Duration::from_millis(20);
    config.backoff.multiplier = 10.0;
    config.backoff.max = Duration::from_secs(5);

    let connector = Arc::new(MemoryConnector::new());
    let (_first, first_end) = connector.expect_connection(TransportMode::Push);
    let first_host = FakeHost::spawn(first_end, TransportMode::Push, HostState::default());

    let manager = ConnectionManager::new(config, connector.clone(), SerialExecutor::spawn());
    manager.connection().await.unwrap();

    // One refused attempt pushes the next delay to 200ms
    first_host.hang_up();
    wait_for(|| connector.attempts() >= 2).await;
    let (_second, second_end) = connector.expect_connection(TransportMode::Push);
    let second_host = FakeHost::spawn(second_end, TransportMode::Push, HostState::default());
    wait_for(|| connector.attempts() == 3 && manager.status() == ConnectionStatus::Connected).await;

    // Without a reset the next delay would be 2s
    let (_third, third_end) = connector.expect_connection(TransportMode::Push);
    let _third_host = FakeHost::spawn(third_end, TransportMode::Push, HostState::default());
    second_host.hang_up();

    tokio::time::timeout(
        Duration::from_millis(1000),
        wait_for(|| connector.attempts() == 4),
    )
    .await
    .expect("reconnect reused the grown delay");
    wait_for(|| manager.status() == ConnectionStatus::Connected).await;

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_background_grace_period_drops_connection() {
    let connector = Arc::new(MemoryConnector::new());
    let (first, first_end) = connector.expect_connection(TransportMode::Push);
    let _host = FakeHost::spawn(first_end, TransportMode::Push, HostState::default());

    let config = test_config();
    let grace = config.background_grace_period;
    let manager = ConnectionManager::new(config, connector.clone(), SerialExecutor::spawn());
    manager.connection().await.unwrap();

    // Coming back before the grace period keeps the connection
    manager.enter_background();
    tokio::time::sleep(grace / 2).await;
    manager.enter_foreground();
    tokio::time::sleep(grace).await;
    assert!(manager.current().await.is_some());
    assert!(!first.is_closed());

    manager.enter_background();
    tokio::time::sleep(grace + Duration::from_secs(1)).await;
    assert!(manager.current().await.is_none());
    assert!(first.is_closed());
    assert_eq!(manager.status(), ConnectionStatus::Disconnected);

    // Foreground reconnects lazily
    manager.enter_foreground();
    let (_second, second_end) = connector.expect_connection(TransportMode::Push);
    let _second_host = FakeHost::spawn(second_end, TransportMode::Push, HostState::default());
    assert!(manager.current().await.is_none());
    manager.connection().await.unwrap();
    assert_eq!(connector.attempts(), 2);
}

#[tokio::test]
async fn test_shutdown_stops_everything() {
    let connector = Arc::new(MemoryConnector::new());
    let (transport, end) = connector.expect_connection(TransportMode::Push);
    let _host = FakeHost::spawn(end, TransportMode::Push, HostState::default());

    let manager = ConnectionManager::new(test_config(), connector.clone(), SerialExecutor::spawn());
    manager.connection().await.unwrap();
    manager.shutdown().await;

    assert!(transport.is_closed());
    assert_eq!(manager.connection().await.err(), Some(ConnectionError::Closed));
}

#[tokio::test]
async fn test_connect_failure_is_connection_error() {
    let connector = Arc::new(MemoryConnector::new());
    let manager = ConnectionManager::new(test_config(), connector, SerialExecutor::spawn());

    let err = manager.connection().await.err().unwrap();
    assert!(matches!(err, ConnectionError::Refused(_)));
    assert_eq!(manager.status(), ConnectionStatus::Disconnected);
}
