//! Unit tests for GATT completions and the callback sink

use crate::gatt::constants::*;
use crate::gatt::{
    Callback, CallbackReceivers, CharacteristicRead, ExpectedResponse, GattStatus, LinkState,
    MtuChanged, ReadRemoteRssi, Response,
};
use crate::logs::LogConfig;
use crate::observation::{ChangeSender, ObservationEvent};
use crate::profile::Characteristic;
use crate::state::{Connecting, DisconnectStatus, State};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

struct Harness {
    callback: Callback,
    receivers: CallbackReceivers,
    state: watch::Receiver<State>,
    mtu: watch::Receiver<Option<u16>>,
    changes: mpsc::UnboundedReceiver<ObservationEvent>,
}

fn harness() -> Harness {
    let (state_tx, state) = watch::channel(State::Disconnected(None));
    let (mtu_tx, mtu) = watch::channel(None);
    let changes_tx = ChangeSender::new();
    let changes = changes_tx.subscribe();
    let (callback, receivers) = Callback::new(
        "test",
        Arc::new(state_tx),
        Arc::new(mtu_tx),
        changes_tx,
        LogConfig::default(),
    );
    Harness {
        callback,
        receivers,
        state,
        mtu,
        changes,
    }
}

fn read(status: u16) -> Response {
    Response::CharacteristicRead(CharacteristicRead {
        characteristic: Characteristic::new(0x180Fu16, 0x2A19u16),
        value: vec![0x64],
        status: GattStatus(status),
    })
}

#[test]
fn test_expected_response_matching() {
    let response = read(GATT_SUCCESS);
    assert_eq!(response.name(), "CharacteristicRead");
    assert!(response.status().is_success());

    let parsed = CharacteristicRead::from_response(response).unwrap();
    assert_eq!(parsed.value, vec![0x64]);

    let mismatch = ReadRemoteRssi::from_response(read(GATT_SUCCESS)).unwrap_err();
    assert_eq!(mismatch.name(), CharacteristicRead::NAME);
}

#[test]
fn test_status_display_and_bonding() {
    assert_eq!(
        GattStatus(GATT_INSUFFICIENT_AUTHENTICATION).to_string(),
        "GATT_INSUFFICIENT_AUTHENTICATION(5)"
    );
    assert_eq!(GattStatus(0x4242).to_string(), "GATT_UNKNOWN(16962)");
    assert!(GattStatus(GATT_INSUFFICIENT_ENCRYPTION).requires_bond());
    assert!(GattStatus(GATT_AUTH_FAIL).requires_bond());
    assert!(!GattStatus(GATT_READ_NOT_PERMITTED).requires_bond());
    assert!(GattStatus::SUCCESS.is_success());
}

#[tokio::test]
async fn test_link_up_moves_to_services() {
    let h = harness();
    h.callback
        .on_connection_state_change(LinkState::Connecting, LINK_REASON_SUCCESS);
    assert_eq!(*h.state.borrow(), State::Connecting(Connecting::Bluetooth));

    h.callback
        .on_connection_state_change(LinkState::Connected, LINK_REASON_SUCCESS);
    assert_eq!(*h.state.borrow(), State::Connecting(Connecting::Services));
}

#[tokio::test]
async fn test_disconnect_closes_queues() {
    let mut h = harness();
    h.callback.on_response(read(GATT_SUCCESS));
    h.callback
        .on_connection_state_change(LinkState::Disconnected, LINK_REASON_PEER_USER);

    // Buffered completion is still delivered, then the queue ends.
    assert!(h.receivers.responses.recv().await.is_some());
    assert!(h.receivers.responses.recv().await.is_none());
    assert!(h.receivers.mtu.recv().await.is_none());

    assert_eq!(
        *h.state.borrow(),
        State::Disconnected(Some(DisconnectStatus::PeripheralDisconnected))
    );
    assert!(matches!(
        h.changes.recv().await.unwrap(),
        ObservationEvent::Disconnected
    ));

    // Late completions are dropped.
    h.callback.on_response(read(GATT_SUCCESS));
    assert!(h.receivers.responses.try_recv().is_err());
}

#[tokio::test]
async fn test_existing_disconnect_cause_kept() {
    let h = harness();
    h.callback
        .on_connection_state_change(LinkState::Disconnected, LINK_REASON_TIMEOUT);
    h.callback.set_disconnected(None);
    assert_eq!(
        *h.state.borrow(),
        State::Disconnected(Some(DisconnectStatus::Timeout))
    );
}

#[tokio::test]
async fn test_disposed_callback_leaves_state_alone() {
    let h = harness();
    h.callback.dispose();
    assert!(!h.callback.is_active());
    h.callback
        .on_connection_state_change(LinkState::Connecting, LINK_REASON_SUCCESS);
    assert_eq!(*h.state.borrow(), State::Disconnected(None));
}

#[tokio::test]
async fn test_peer_mtu_change_not_queued() {
    let mut h = harness();
    for mtu in [64, 128, 247] {
        h.callback.on_mtu_changed(MtuChanged {
            mtu,
            status: GattStatus::SUCCESS,
        });
    }
    assert_eq!(*h.mtu.borrow(), Some(247));
    assert!(h.receivers.mtu.try_recv().is_err());
}

#[tokio::test]
async fn test_disposed_callback_drops_changes() {
    let mut h = harness();
    h.callback.dispose();
    h.callback
        .on_characteristic_changed(Characteristic::new(0x180Fu16, 0x2A19u16), vec![1]);
    assert!(h.changes.try_recv().is_err());
}

#[tokio::test]
async fn test_mtu_and_changes() {
    let mut h = harness();
    h.callback.expect_mtu();
    h.callback.on_mtu_changed(MtuChanged {
        mtu: 185,
        status: GattStatus::SUCCESS,
    });
    assert_eq!(*h.mtu.borrow(), Some(185));
    assert_eq!(h.receivers.mtu.recv().await.unwrap().mtu, 185);

    // Only the change answering the request is queued.
    h.callback.on_mtu_changed(MtuChanged {
        mtu: 100,
        status: GattStatus::SUCCESS,
    });
    assert!(h.receivers.mtu.try_recv().is_err());

    let battery = Characteristic::new(0x180Fu16, 0x2A19u16);
    h.callback.on_characteristic_changed(battery.clone(), vec![1, 2]);
    match h.changes.recv().await.unwrap() {
        ObservationEvent::CharacteristicChange {
            characteristic,
            data,
        } => {
            assert_eq!(characteristic, battery);
            assert_eq!(data, vec![1, 2]);
        }
        other => panic!("unexpected event {:?}", other),
    }
}
