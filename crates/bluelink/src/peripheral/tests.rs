//! Unit tests for the peripheral connection state machine

use super::*;
use crate::error::UnmetRequirementReason;
use crate::gatt::constants::*;
use crate::gatt::GattStatus;
use crate::mock::{MockBehavior, MockRequest, MockTransport};
use crate::observation::subscription_hook;
use crate::profile::{DiscoveredCharacteristic, DiscoveredDescriptor, Properties};
use crate::state::DisconnectStatus;
use crate::uuid::Uuid;
use futures::StreamExt;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;

const SERVICE: u16 = 0xFFE0;
const DATA: u16 = 0xFFE1;
const CONTROL: u16 = 0xFFE2;
const CCCD: u16 = 0x2902;

fn discovered_services() -> Vec<DiscoveredService> {
    let service_uuid = Uuid::from_u16(SERVICE);
    vec![DiscoveredService {
        uuid: service_uuid,
        characteristics: vec![
            DiscoveredCharacteristic {
                service_uuid,
                uuid: Uuid::from_u16(DATA),
                handle: 0x10,
                properties: Properties::READ | Properties::NOTIFY,
                descriptors: vec![DiscoveredDescriptor {
                    service_uuid,
                    characteristic_uuid: Uuid::from_u16(DATA),
                    uuid: Uuid::from_u16(CCCD),
                    handle: 0x11,
                }],
            },
            DiscoveredCharacteristic {
                service_uuid,
                uuid: Uuid::from_u16(CONTROL),
                handle: 0x20,
                properties: Properties::WRITE | Properties::WRITE_WITHOUT_RESPONSE,
                descriptors: Vec::new(),
            },
        ],
    }]
}

fn data() -> Characteristic {
    Characteristic::new(SERVICE, DATA)
}

fn control() -> Characteristic {
    Characteristic::new(SERVICE, CONTROL)
}

fn setup_with(behavior: MockBehavior, builder: PeripheralBuilder) -> (Arc<MockTransport>, Peripheral) {
    let _ = env_logger::builder().is_test(true).try_init();
    let transport = Arc::new(MockTransport::with_behavior(
        "AA:BB:CC:DD:EE:FF",
        discovered_services(),
        behavior,
    ));
    let peripheral = builder
        .disconnect_timeout(Duration::from_secs(1))
        .build(transport.clone())
        .unwrap();
    (transport, peripheral)
}

fn setup(behavior: MockBehavior) -> (Arc<MockTransport>, Peripheral) {
    setup_with(behavior, Peripheral::builder())
}

fn notification_requests(transport: &MockTransport, enabled: bool) -> usize {
    transport.count(|request| {
        matches!(
            request,
            MockRequest::SetNotification(characteristic, on)
                if characteristic.characteristic_uuid == Uuid::from_u16(DATA) && *on == enabled
        )
    })
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

async fn wait_for_subscribers(peripheral: &Peripheral, expected: usize) {
    for _ in 0..10_000 {
        if peripheral.inner.observers.subscriber_count(&data()).await == expected {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("subscriber count never reached {}", expected);
}

async fn wait_for_attempt_to_end(peripheral: &Peripheral) {
    for _ in 0..10_000 {
        if !peripheral.inner.connect_action.is_active().await {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("connection attempt never ended");
}

#[tokio::test]
async fn test_concurrent_connects_share_one_attempt() {
    let (transport, peripheral) = setup(MockBehavior::default());

    let (a, b) = tokio::join!(peripheral.connect(), peripheral.connect());
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a, b);
    assert_eq!(transport.connect_count(), 1);
    assert!(peripheral.state().borrow().is_connected());

    // Already connected: joins the existing attempt.
    assert_eq!(peripheral.connect().await.unwrap(), a);
    assert_eq!(transport.connect_count(), 1);
}

#[tokio::test]
async fn test_connect_states_are_monotonic() {
    let (_transport, peripheral) = setup(MockBehavior::default());

    let mut state = peripheral.state();
    let recorder = tokio::spawn(async move {
        let mut seen = vec![state.borrow_and_update().clone()];
        while state.changed().await.is_ok() {
            let current = state.borrow_and_update().clone();
            let connected = current.is_connected();
            seen.push(current);
            if connected {
                break;
            }
        }
        seen
    });

    peripheral.connect().await.unwrap();
    let seen = recorder.await.unwrap();

    assert!(seen.last().unwrap().is_connected());
    assert!(!seen.contains(&State::Disconnecting));
    for pair in seen.windows(2) {
        assert!(
            pair[1].is_at_least(&pair[0]) && pair[1] != pair[0],
            "{} followed by {}",
            pair[0],
            pair[1]
        );
    }
}

#[tokio::test]
async fn test_gatt_operations() {
    let (transport, peripheral) = setup(MockBehavior::default());
    assert!(matches!(
        peripheral.read(&data()).await,
        Err(Error::NotConnected(_))
    ));

    peripheral.connect().await.unwrap();
    transport.update_behavior(|b| b.value = vec![0x01, 0x02, 0x03]);

    assert_eq!(peripheral.read(&data()).await.unwrap(), vec![1, 2, 3]);
    assert_eq!(
        peripheral
            .read_descriptor(&data().descriptor(CCCD))
            .await
            .unwrap(),
        vec![1, 2, 3]
    );
    peripheral
        .write(&control(), &[0x09], WriteType::WithoutResponse)
        .await
        .unwrap();
    peripheral
        .write_descriptor(&data().descriptor(CCCD), &[0x01, 0x00])
        .await
        .unwrap();
    assert_eq!(peripheral.rssi().await.unwrap(), -60);

    let control_ref = Characteristic {
        handle: Some(0x20),
        ..control()
    };
    assert!(transport.requests().contains(&MockRequest::WriteCharacteristic(
        control_ref,
        vec![0x09],
        WriteType::WithoutResponse
    )));

    // DATA cannot be written.
    assert!(matches!(
        peripheral.write(&data(), &[0x00], WriteType::WithResponse).await,
        Err(Error::NoSuchElement(_))
    ));
    assert!(matches!(
        peripheral
            .read(&Characteristic::new(0x180Fu16, 0x2A19u16))
            .await,
        Err(Error::NoSuchElement(_))
    ));
}

#[tokio::test]
async fn test_read_requires_bond() {
    let (_transport, peripheral) = setup(MockBehavior {
        status: GattStatus(GATT_INSUFFICIENT_AUTHENTICATION),
        ..MockBehavior::default()
    });
    peripheral.connect().await.unwrap();

    assert_eq!(
        peripheral.read(&data()).await.unwrap_err(),
        Error::BondRequired {
            status: GattStatus(GATT_INSUFFICIENT_AUTHENTICATION)
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_with_unanswered_request() {
    let (transport, peripheral) = setup(MockBehavior::default());
    peripheral.connect().await.unwrap();
    let link = transport.link().unwrap();

    transport.update_behavior(|b| {
        b.respond = false;
        b.confirm_disconnect = false;
    });
    let reader = peripheral.clone();
    let pending = tokio::spawn(async move { reader.read(&data()).await });
    settle(|| link.pending() == 1).await;

    let started = tokio::time::Instant::now();
    peripheral.disconnect().await;
    assert!(started.elapsed() >= Duration::from_secs(1));

    assert_eq!(
        pending.await.unwrap().unwrap_err(),
        Error::NotConnected("Connection closed".into())
    );
    assert_eq!(*peripheral.state().borrow(), State::Disconnected(None));
    assert_eq!(link.close_count(), 1);
}

#[tokio::test]
async fn test_graceful_disconnect() {
    let (transport, peripheral) = setup(MockBehavior::default());
    let scope = peripheral.connect().await.unwrap();

    peripheral.disconnect().await;
    assert!(scope.is_cancelled());
    assert_eq!(
        *peripheral.state().borrow(),
        State::Disconnected(Some(DisconnectStatus::CentralDisconnected))
    );
    assert_eq!(transport.link().unwrap().close_count(), 1);

    // A fresh attempt opens a new link.
    peripheral.connect().await.unwrap();
    assert_eq!(transport.connect_count(), 2);
}

#[tokio::test]
async fn test_reconnect_rearms_observation() {
    let (transport, peripheral) = setup(MockBehavior::default());
    peripheral.connect().await.unwrap();

    let hook_calls = Arc::new(AtomicUsize::new(0));
    let calls = hook_calls.clone();
    let mut stream = peripheral.observe_with(
        data(),
        subscription_hook(move || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }),
    );
    let values = tokio::spawn(async move { stream.next().await });
    settle(|| hook_calls.load(Ordering::SeqCst) == 1).await;
    assert_eq!(notification_requests(&transport, true), 1);

    let stale = transport.link().unwrap();
    stale.drop_link(LINK_REASON_PEER_USER);
    assert_eq!(
        *peripheral.state().borrow(),
        State::Disconnected(Some(DisconnectStatus::PeripheralDisconnected))
    );
    wait_for_attempt_to_end(&peripheral).await;

    peripheral.connect().await.unwrap();
    assert_eq!(transport.connect_count(), 2);
    assert_eq!(notification_requests(&transport, true), 2);
    assert_eq!(hook_calls.load(Ordering::SeqCst), 2);

    // The old link no longer feeds observers.
    settle(|| !stale.callback().is_active()).await;
    stale.notify(&discovered_services()[0].characteristics[0], &[0x01]);

    let link = transport.link().unwrap();
    link.notify(&discovered_services()[0].characteristics[0], &[0x2A]);
    assert_eq!(values.await.unwrap().unwrap().unwrap(), vec![0x2A]);
}

#[tokio::test]
async fn test_slow_observer_receives_every_change() {
    let (transport, peripheral) = setup(MockBehavior::default());
    peripheral.connect().await.unwrap();

    let stream = peripheral.observe(data());
    let values = tokio::spawn(stream.take(300).collect::<Vec<_>>());
    wait_for_subscribers(&peripheral, 1).await;

    // Emitted back to back, before the observer gets a chance to poll.
    let link = transport.link().unwrap();
    let characteristic = &discovered_services()[0].characteristics[0];
    for i in 0..300u16 {
        link.notify(characteristic, &i.to_le_bytes());
    }

    let values: Vec<Vec<u8>> = values
        .await
        .unwrap()
        .into_iter()
        .map(|v| v.unwrap())
        .collect();
    assert_eq!(values.len(), 300);
    for (i, value) in values.iter().enumerate() {
        assert_eq!(value, &(i as u16).to_le_bytes().to_vec());
    }
}

#[tokio::test]
async fn test_last_unsubscribe_disables_notifications() {
    let (transport, peripheral) = setup(MockBehavior::default());
    peripheral.connect().await.unwrap();

    let first = peripheral.observe(data());
    let second = peripheral.observe(data());
    let first = tokio::spawn(first.collect::<Vec<_>>());
    let second = tokio::spawn(second.collect::<Vec<_>>());
    wait_for_subscribers(&peripheral, 2).await;
    assert_eq!(notification_requests(&transport, true), 1);

    first.abort();
    second.abort();
    settle(|| notification_requests(&transport, false) == 1).await;
    assert_eq!(notification_requests(&transport, true), 1);
}

#[tokio::test]
async fn test_bluetooth_off_fails_fast() {
    let (transport, peripheral) = setup(MockBehavior::default());
    transport.set_bluetooth_state(BluetoothState::Off);

    assert_eq!(
        peripheral.connect().await.unwrap_err(),
        Error::RequirementUnmet {
            reason: UnmetRequirementReason::BluetoothDisabled
        }
    );
    assert_eq!(transport.connect_count(), 0);
    assert!(peripheral.state().borrow().is_disconnected());
}

#[tokio::test]
async fn test_bluetooth_turning_off_closes_link() {
    let (transport, peripheral) = setup(MockBehavior::default());
    peripheral.connect().await.unwrap();

    transport.set_bluetooth_state(BluetoothState::TurningOff);
    wait_for_attempt_to_end(&peripheral).await;
    assert!(peripheral.state().borrow().is_disconnected());
    assert_eq!(transport.link().unwrap().close_count(), 1);

    assert!(peripheral.connect().await.unwrap_err().is_connection_loss());
}

#[tokio::test]
async fn test_rejected_connect() {
    let (transport, peripheral) = setup(MockBehavior {
        reject_connect: true,
        ..MockBehavior::default()
    });

    assert_eq!(
        peripheral.connect().await.unwrap_err(),
        Error::ConnectionRejected
    );
    assert_eq!(transport.connect_count(), 1);
    assert_eq!(*peripheral.state().borrow(), State::Disconnected(None));
}

#[tokio::test]
async fn test_link_failure_while_connecting() {
    let (transport, peripheral) = setup(MockBehavior {
        link_up: false,
        ..MockBehavior::default()
    });

    let connecting = peripheral.clone();
    let attempt = tokio::spawn(async move { connecting.connect().await });
    settle(|| transport.link().is_some()).await;
    transport
        .link()
        .unwrap()
        .drop_link(LINK_REASON_FAILED_ESTABLISHMENT);

    assert!(matches!(
        attempt.await.unwrap(),
        Err(Error::NotConnected(_))
    ));
    assert_eq!(
        *peripheral.state().borrow(),
        State::Disconnected(Some(DisconnectStatus::Failed))
    );
}

#[tokio::test]
async fn test_empty_discovery_is_not_an_error() {
    let (transport, peripheral) = setup(MockBehavior {
        empty_discoveries: usize::MAX,
        ..MockBehavior::default()
    });

    peripheral.connect().await.unwrap();
    assert_eq!(transport.discovery_count(), 5);
    assert_eq!(*peripheral.services().borrow(), Some(Vec::new()));
    assert!(matches!(
        peripheral.read(&data()).await,
        Err(Error::NoSuchElement(_))
    ));
}

#[tokio::test]
async fn test_services_discovered_hook() {
    let builder = Peripheral::builder().on_services_discovered(|peripheral| async move {
        assert_eq!(peripheral.services().len(), 1);
        peripheral.request_mtu(247).await.map(|_| ())
    });
    let (transport, peripheral) = setup_with(MockBehavior::default(), builder);

    peripheral.connect().await.unwrap();
    assert_eq!(*peripheral.mtu().borrow(), Some(185));
    assert_eq!(transport.count(|r| *r == MockRequest::RequestMtu(247)), 1);
}

#[tokio::test]
async fn test_failing_hook_fails_connect() {
    let builder = Peripheral::builder().on_services_discovered(|_peripheral| async {
        Err(Error::Internal("not our device".into()))
    });
    let (transport, peripheral) = setup_with(MockBehavior::default(), builder);

    assert_eq!(
        peripheral.connect().await.unwrap_err(),
        Error::Internal("not our device".into())
    );
    assert!(peripheral.state().borrow().is_disconnected());
    assert_eq!(transport.link().unwrap().close_count(), 1);
}

#[tokio::test]
async fn test_close_disposes_peripheral() {
    let (transport, peripheral) = setup(MockBehavior::default());
    peripheral.connect().await.unwrap();

    peripheral.close().await;
    assert!(peripheral.state().borrow().is_disconnected());
    assert_eq!(transport.link().unwrap().close_count(), 1);
    assert_eq!(
        peripheral.connect().await.unwrap_err(),
        Error::NotConnected("Peripheral closed".into())
    );
}

#[test]
fn test_build_rejects_invalid_config() {
    let transport = Arc::new(MockTransport::new("test", Vec::new()));
    assert!(Peripheral::builder()
        .disconnect_timeout(Duration::ZERO)
        .build(transport.clone())
        .is_err());
    assert!(Peripheral::builder()
        .disconnect_timeout(Duration::from_millis(1))
        .build(transport)
        .is_ok());
}
