//! In-process transport for tests
//!
//! [`MockTransport`] hands out [`MockLink`]s that record every submission and
//! complete it through the connection's [`Callback`], either immediately
//! (the default) or when the test says so. Requests across all links share
//! one log, so counts survive reconnects.

use crate::error::{Error, Result};
use crate::gatt::constants::*;
use crate::gatt::{
    Callback, CharacteristicRead, CharacteristicWrite, DescriptorRead, DescriptorWrite,
    GattStatus, LinkState, MtuChanged, NotificationStateChanged, ReadRemoteRssi, Response,
    ServicesDiscovered,
};
use crate::profile::{
    Characteristic, Descriptor, DiscoveredCharacteristic, DiscoveredDescriptor, DiscoveredService,
    WriteType,
};
use crate::transport::{BluetoothState, Link, Transport};
use async_trait::async_trait;
use log::debug;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

/// A submission recorded by a [`MockLink`]
#[derive(Debug, Clone, PartialEq)]
pub enum MockRequest {
    DiscoverServices,
    ReadCharacteristic(Characteristic),
    WriteCharacteristic(Characteristic, Vec<u8>, WriteType),
    ReadDescriptor(Descriptor),
    WriteDescriptor(Descriptor, Vec<u8>),
    SetNotification(Characteristic, bool),
    RequestMtu(u16),
    ReadRssi,
}

/// How links created by a [`MockTransport`] behave
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Refuse `connect` by returning no link
    pub reject_connect: bool,
    /// Report the link as connected right after `connect`
    pub link_up: bool,
    /// Complete requests as soon as they are submitted
    pub respond: bool,
    /// Report `Disconnected` when a disconnect is requested
    pub confirm_disconnect: bool,
    /// Number of initial discoveries that report no services
    pub empty_discoveries: usize,
    /// Status reported for characteristic and descriptor reads and writes
    pub status: GattStatus,
    /// Value returned by reads
    pub value: Vec<u8>,
    /// MTU reported for MTU requests
    pub mtu: u16,
    pub rssi: i32,
}

impl Default for MockBehavior {
    fn default() -> Self {
        MockBehavior {
            reject_connect: false,
            link_up: true,
            respond: true,
            confirm_disconnect: true,
            empty_discoveries: 0,
            status: GattStatus::SUCCESS,
            value: Vec::new(),
            mtu: 185,
            rssi: -60,
        }
    }
}

struct Shared {
    behavior: Mutex<MockBehavior>,
    services: Vec<DiscoveredService>,
    requests: Mutex<Vec<MockRequest>>,
    discoveries: AtomicUsize,
    outstanding: AtomicUsize,
    max_outstanding: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub struct MockTransport {
    identifier: String,
    shared: Arc<Shared>,
    bluetooth: watch::Sender<BluetoothState>,
    connects: AtomicUsize,
    link: Mutex<Option<Arc<MockLink>>>,
}

impl MockTransport {
    pub fn new(identifier: &str, services: Vec<DiscoveredService>) -> Self {
        Self::with_behavior(identifier, services, MockBehavior::default())
    }

    pub fn with_behavior(
        identifier: &str,
        services: Vec<DiscoveredService>,
        behavior: MockBehavior,
    ) -> Self {
        let (bluetooth, _) = watch::channel(BluetoothState::On);
        MockTransport {
            identifier: identifier.to_string(),
            shared: Arc::new(Shared {
                behavior: Mutex::new(behavior),
                services,
                requests: Mutex::new(Vec::new()),
                discoveries: AtomicUsize::new(0),
                outstanding: AtomicUsize::new(0),
                max_outstanding: AtomicUsize::new(0),
            }),
            bluetooth,
            connects: AtomicUsize::new(0),
            link: Mutex::new(None),
        }
    }

    /// Adjusts behavior for subsequent submissions on every link.
    pub fn update_behavior(&self, update: impl FnOnce(&mut MockBehavior)) {
        update(&mut lock(&self.shared.behavior));
    }

    pub fn set_bluetooth_state(&self, state: BluetoothState) {
        self.bluetooth.send_replace(state);
    }

    /// Number of `connect` calls so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// The most recently created link.
    pub fn link(&self) -> Option<Arc<MockLink>> {
        lock(&self.link).clone()
    }

    pub fn requests(&self) -> Vec<MockRequest> {
        lock(&self.shared.requests).clone()
    }

    pub fn count(&self, predicate: impl Fn(&MockRequest) -> bool) -> usize {
        lock(&self.shared.requests)
            .iter()
            .filter(|r| predicate(r))
            .count()
    }

    pub fn discovery_count(&self) -> usize {
        self.shared.discoveries.load(Ordering::SeqCst)
    }

    /// Highest number of requests that were awaiting completion at once.
    pub fn max_outstanding(&self) -> usize {
        self.shared.max_outstanding.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn identifier(&self) -> String {
        self.identifier.clone()
    }

    fn bluetooth_state(&self) -> watch::Receiver<BluetoothState> {
        self.bluetooth.subscribe()
    }

    async fn connect(&self, callback: Callback) -> Result<Option<Arc<dyn Link>>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let behavior = lock(&self.shared.behavior).clone();
        if behavior.reject_connect {
            return Ok(None);
        }
        let link = Arc::new(MockLink::new(callback, self.shared.clone()));
        *lock(&self.link) = Some(link.clone());
        link.callback()
            .on_connection_state_change(LinkState::Connecting, LINK_REASON_SUCCESS);
        if behavior.link_up {
            link.link_up();
        }
        Ok(Some(link as Arc<dyn Link>))
    }
}

/// A link whose completions are scripted by the test
pub struct MockLink {
    callback: Callback,
    shared: Arc<Shared>,
    pending: Mutex<VecDeque<MockRequest>>,
    closed: AtomicUsize,
}

impl MockLink {
    fn new(callback: Callback, shared: Arc<Shared>) -> Self {
        MockLink {
            callback,
            shared,
            pending: Mutex::new(VecDeque::new()),
            closed: AtomicUsize::new(0),
        }
    }

    /// A standalone link reporting `services`, for driving a connection
    /// without a transport.
    pub fn standalone(
        callback: Callback,
        services: Vec<DiscoveredService>,
        behavior: MockBehavior,
    ) -> Self {
        let transport = MockTransport::with_behavior("standalone", services, behavior);
        MockLink::new(callback, transport.shared)
    }

    pub fn callback(&self) -> &Callback {
        &self.callback
    }

    pub fn link_up(&self) {
        self.callback
            .on_connection_state_change(LinkState::Connected, LINK_REASON_SUCCESS);
    }

    /// Simulates the link dropping with `reason`.
    pub fn drop_link(&self, reason: u16) {
        self.callback
            .on_connection_state_change(LinkState::Disconnected, reason);
    }

    pub fn notify(&self, characteristic: &DiscoveredCharacteristic, value: &[u8]) {
        self.callback
            .on_characteristic_changed(characteristic.to_ref(), value.to_vec());
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn pending(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn requests(&self) -> Vec<MockRequest> {
        lock(&self.shared.requests).clone()
    }

    pub fn discovery_count(&self) -> usize {
        self.shared.discoveries.load(Ordering::SeqCst)
    }

    pub fn max_outstanding(&self) -> usize {
        self.shared.max_outstanding.load(Ordering::SeqCst)
    }

    /// Completes the oldest pending request with `status`.
    pub fn respond(&self, status: GattStatus) -> bool {
        let request = lock(&self.pending).pop_front();
        match request {
            Some(request) => {
                self.complete(request, status);
                true
            }
            None => false,
        }
    }

    /// Delivers a completion that no request asked for.
    pub fn deliver(&self, response: Response) {
        self.callback.on_response(response);
    }

    fn behavior(&self) -> MockBehavior {
        lock(&self.shared.behavior).clone()
    }

    fn submit(&self, request: MockRequest) -> Result<()> {
        if self.close_count() > 0 {
            return Err(Error::RequestRejected("link closed".into()));
        }
        debug!("Mock submission {:?}", request);
        lock(&self.shared.requests).push(request.clone());
        if let MockRequest::DiscoverServices = request {
            self.shared.discoveries.fetch_add(1, Ordering::SeqCst);
        }

        let outstanding = self.shared.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared
            .max_outstanding
            .fetch_max(outstanding, Ordering::SeqCst);

        let behavior = self.behavior();
        if behavior.respond {
            let status = match request {
                MockRequest::DiscoverServices
                | MockRequest::SetNotification(..)
                | MockRequest::RequestMtu(_)
                | MockRequest::ReadRssi => GattStatus::SUCCESS,
                _ => behavior.status,
            };
            self.complete(request, status);
        } else {
            lock(&self.pending).push_back(request);
        }
        Ok(())
    }

    fn complete(&self, request: MockRequest, status: GattStatus) {
        self.shared.outstanding.fetch_sub(1, Ordering::SeqCst);
        let behavior = self.behavior();
        let response = match request {
            MockRequest::DiscoverServices => {
                ServicesDiscovered { status }.into()
            }
            MockRequest::ReadCharacteristic(characteristic) => CharacteristicRead {
                characteristic,
                value: behavior.value,
                status,
            }
            .into(),
            MockRequest::WriteCharacteristic(characteristic, _, _) => CharacteristicWrite {
                characteristic,
                status,
            }
            .into(),
            MockRequest::ReadDescriptor(descriptor) => DescriptorRead {
                descriptor,
                value: behavior.value,
                status,
            }
            .into(),
            MockRequest::WriteDescriptor(descriptor, _) => DescriptorWrite { descriptor, status }.into(),
            MockRequest::SetNotification(characteristic, enabled) => NotificationStateChanged {
                characteristic,
                enabled,
                status,
            }
            .into(),
            MockRequest::ReadRssi => ReadRemoteRssi {
                rssi: behavior.rssi,
                status,
            }
            .into(),
            MockRequest::RequestMtu(_) => {
                self.callback.on_mtu_changed(MtuChanged {
                    mtu: behavior.mtu,
                    status,
                });
                return;
            }
        };
        self.callback.on_response(response);
    }
}

impl Link for MockLink {
    fn discover_services(&self) -> Result<()> {
        self.submit(MockRequest::DiscoverServices)
    }

    fn services(&self) -> Vec<DiscoveredService> {
        let empty = self.behavior().empty_discoveries;
        if self.shared.discoveries.load(Ordering::SeqCst) <= empty {
            Vec::new()
        } else {
            self.shared.services.clone()
        }
    }

    fn read_characteristic(&self, characteristic: &DiscoveredCharacteristic) -> Result<()> {
        self.submit(MockRequest::ReadCharacteristic(characteristic.to_ref()))
    }

    fn write_characteristic(
        &self,
        characteristic: &DiscoveredCharacteristic,
        data: &[u8],
        write_type: WriteType,
    ) -> Result<()> {
        self.submit(MockRequest::WriteCharacteristic(
            characteristic.to_ref(),
            data.to_vec(),
            write_type,
        ))
    }

    fn read_descriptor(&self, descriptor: &DiscoveredDescriptor) -> Result<()> {
        self.submit(MockRequest::ReadDescriptor(descriptor.to_ref()))
    }

    fn write_descriptor(&self, descriptor: &DiscoveredDescriptor, data: &[u8]) -> Result<()> {
        self.submit(MockRequest::WriteDescriptor(
            descriptor.to_ref(),
            data.to_vec(),
        ))
    }

    fn set_notification(
        &self,
        characteristic: &DiscoveredCharacteristic,
        enabled: bool,
    ) -> Result<()> {
        self.submit(MockRequest::SetNotification(
            characteristic.to_ref(),
            enabled,
        ))
    }

    fn request_mtu(&self, mtu: u16) -> Result<()> {
        self.submit(MockRequest::RequestMtu(mtu))
    }

    fn read_rssi(&self) -> Result<()> {
        self.submit(MockRequest::ReadRssi)
    }

    fn disconnect(&self) {
        if self.behavior().confirm_disconnect {
            self.callback
                .on_connection_state_change(LinkState::Disconnected, LINK_REASON_LOCAL_HOST);
        }
    }

    fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}
