//! Unit tests for request sequencing on a single connection

use super::*;
use crate::gatt::constants::*;
use crate::gatt::{CharacteristicRead, CharacteristicWrite, LinkState};
use crate::logs::LogConfig;
use crate::mock::{MockBehavior, MockLink};
use crate::profile::{DiscoveredCharacteristic, Properties};
use crate::state::{Connecting, DisconnectStatus};
use crate::uuid::Uuid;
use crate::observation::ChangeSender;

const SERVICE: u16 = 0x180F;
const LEVEL: u16 = 0x2A19;
const NAME: u16 = 0x2A00;

struct Harness {
    link: Arc<MockLink>,
    connection: Arc<Connection>,
    state: Arc<watch::Sender<State>>,
    mtu: Arc<watch::Sender<Option<u16>>>,
    services: Arc<watch::Sender<Option<Vec<DiscoveredService>>>>,
}

fn characteristic(uuid: u16, handle: u16) -> DiscoveredCharacteristic {
    DiscoveredCharacteristic {
        service_uuid: Uuid::from_u16(SERVICE),
        uuid: Uuid::from_u16(uuid),
        handle,
        properties: Properties::READ | Properties::WRITE | Properties::NOTIFY,
        descriptors: Vec::new(),
    }
}

fn battery_service() -> Vec<DiscoveredService> {
    vec![DiscoveredService {
        uuid: Uuid::from_u16(SERVICE),
        characteristics: vec![characteristic(LEVEL, 0x03), characteristic(NAME, 0x05)],
    }]
}

fn harness(behavior: MockBehavior) -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();
    let state = Arc::new(watch::channel(State::Connecting(Connecting::Bluetooth)).0);
    let mtu = Arc::new(watch::channel(None).0);
    let services = Arc::new(watch::channel(None).0);
    let changes = ChangeSender::new();
    let (callback, receivers) = Callback::new(
        "test",
        state.clone(),
        mtu.clone(),
        changes,
        LogConfig::default(),
    );
    let link = Arc::new(MockLink::standalone(
        callback.clone(),
        battery_service(),
        behavior,
    ));
    link.callback()
        .on_connection_state_change(LinkState::Connected, LINK_REASON_SUCCESS);

    let dyn_link: Arc<dyn Link> = link.clone();
    let connection = Connection::new(
        ConnectionConfig {
            identifier: "test".to_string(),
            disconnect_timeout: Duration::from_secs(1),
            discovery: ServiceDiscoveryRetrier::new(5),
        },
        dyn_link,
        callback,
        receivers,
        services.clone(),
        Arc::new(Dispatcher::Inline),
        &TaskScope::new(),
    );
    Harness {
        link,
        connection,
        state,
        mtu,
        services,
    }
}

fn paused() -> MockBehavior {
    MockBehavior {
        respond: false,
        ..MockBehavior::default()
    }
}

/// Yields until `condition` holds, failing the test if it never does.
async fn settle(mut condition: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never settled");
}

async fn read(connection: Arc<Connection>, target: DiscoveredCharacteristic) -> Result<CharacteristicRead> {
    connection
        .execute::<CharacteristicRead, _>(move |link| link.read_characteristic(&target))
        .await
}

#[tokio::test]
async fn test_requests_are_serialized() {
    let h = harness(paused());

    let mut tasks = Vec::new();
    for _ in 0..5 {
        tasks.push(tokio::spawn(read(
            h.connection.clone(),
            characteristic(LEVEL, 0x03),
        )));
    }

    for _ in 0..5 {
        settle(|| h.link.pending() == 1).await;
        assert!(h.link.respond(GattStatus::SUCCESS));
    }
    for task in tasks {
        assert!(task.await.unwrap().is_ok());
    }
    assert_eq!(h.link.max_outstanding(), 1);
    assert_eq!(h.link.requests().len(), 5);
}

#[tokio::test]
async fn test_cancelled_request_does_not_strand_response() {
    let h = harness(paused());

    let first = tokio::spawn(read(h.connection.clone(), characteristic(LEVEL, 0x03)));
    settle(|| h.link.pending() == 1).await;
    first.abort();
    assert!(first.await.unwrap_err().is_cancelled());

    let second = tokio::spawn(read(h.connection.clone(), characteristic(NAME, 0x05)));
    // The first request still owns the link until its completion arrives.
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(h.link.requests().len(), 1);

    assert!(h.link.respond(GattStatus::SUCCESS));
    settle(|| h.link.pending() == 1).await;
    assert!(h.link.respond(GattStatus::SUCCESS));

    let response = second.await.unwrap().unwrap();
    assert_eq!(response.characteristic, characteristic(NAME, 0x05).to_ref());
}

#[tokio::test]
async fn test_insufficient_authentication_requires_bond() {
    let h = harness(MockBehavior {
        status: GattStatus(GATT_INSUFFICIENT_AUTHENTICATION),
        ..MockBehavior::default()
    });

    let err = read(h.connection.clone(), characteristic(LEVEL, 0x03))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        Error::BondRequired {
            status: GattStatus(GATT_INSUFFICIENT_AUTHENTICATION)
        }
    );
}

#[tokio::test]
async fn test_failed_status() {
    let h = harness(MockBehavior {
        status: GattStatus(GATT_READ_NOT_PERMITTED),
        ..MockBehavior::default()
    });

    let err = read(h.connection.clone(), characteristic(LEVEL, 0x03))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        Error::Status {
            operation: "CharacteristicRead".into(),
            status: GattStatus(GATT_READ_NOT_PERMITTED),
        }
    );
}

#[tokio::test]
async fn test_unexpected_response_type() {
    let h = harness(paused());

    let task = tokio::spawn(read(h.connection.clone(), characteristic(LEVEL, 0x03)));
    settle(|| h.link.pending() == 1).await;
    h.link.deliver(
        CharacteristicWrite {
            characteristic: characteristic(LEVEL, 0x03).to_ref(),
            status: GattStatus::SUCCESS,
        }
        .into(),
    );

    match task.await.unwrap() {
        Err(Error::Internal(message)) => {
            assert!(message.contains("CharacteristicRead"));
            assert!(message.contains("CharacteristicWrite"));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_request_mtu_skips_earlier_changes() {
    let h = harness(MockBehavior {
        mtu: 185,
        ..MockBehavior::default()
    });

    // Peer-initiated exchange before anyone asked.
    h.link.callback().on_mtu_changed(MtuChanged {
        mtu: 64,
        status: GattStatus::SUCCESS,
    });
    assert_eq!(*h.mtu.borrow(), Some(64));

    assert_eq!(h.connection.request_mtu(247).await.unwrap(), 185);
    assert_eq!(*h.mtu.borrow(), Some(185));
}

#[tokio::test]
async fn test_discover_services_retries_and_publishes() {
    let h = harness(MockBehavior {
        empty_discoveries: 2,
        ..MockBehavior::default()
    });

    let services = h.connection.discover_services().await.unwrap();
    assert_eq!(services.len(), 1);
    assert_eq!(h.link.discovery_count(), 3);
    assert_eq!(h.services.borrow().as_ref(), Some(&services));
}

#[tokio::test]
async fn test_service_change_triggers_rediscovery() {
    let h = harness(MockBehavior::default());

    h.link.callback().on_service_changed();
    settle(|| h.services.borrow().is_some()).await;
    assert_eq!(h.link.discovery_count(), 1);
}

#[tokio::test]
async fn test_link_loss_closes_connection() {
    let h = harness(MockBehavior::default());

    h.link.drop_link(LINK_REASON_PEER_USER);
    settle(|| h.connection.is_closed()).await;
    assert_eq!(h.link.close_count(), 1);
    assert_eq!(
        *h.state.borrow(),
        State::Disconnected(Some(DisconnectStatus::PeripheralDisconnected))
    );

    let err = read(h.connection.clone(), characteristic(LEVEL, 0x03))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotConnected(_)));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_timeout_fails_pending_request() {
    let h = harness(MockBehavior {
        respond: false,
        confirm_disconnect: false,
        ..MockBehavior::default()
    });

    let pending = tokio::spawn(read(h.connection.clone(), characteristic(LEVEL, 0x03)));
    settle(|| h.link.pending() == 1).await;

    let started = tokio::time::Instant::now();
    h.connection.disconnect().await;
    assert!(started.elapsed() >= Duration::from_secs(1));

    assert_eq!(
        pending.await.unwrap().unwrap_err(),
        Error::NotConnected("Connection closed".into())
    );
    assert!(h.connection.is_closed());
    assert_eq!(h.link.close_count(), 1);
    assert_eq!(*h.state.borrow(), State::Disconnected(None));
}

#[tokio::test]
async fn test_graceful_disconnect() {
    let h = harness(MockBehavior::default());

    h.connection.disconnect().await;
    assert!(h.connection.is_closed());
    assert_eq!(
        *h.state.borrow(),
        State::Disconnected(Some(DisconnectStatus::CentralDisconnected))
    );

    // Closing again is a no-op.
    h.connection.close();
    assert_eq!(h.link.close_count(), 1);
}
