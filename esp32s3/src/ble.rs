use core::sync::atomic::{AtomicBool, Ordering};

use bt_hci::controller::ExternalController;
use embassy_futures::join::join;
use embassy_futures::select::select;
use embassy_sync::{
    blocking_mutex::raw::CriticalSectionRawMutex,
    channel::{Channel, Receiver, Sender},
};
use embassy_time::{Duration, Timer};
use esp_radio::{Controller, ble::controller::BleConnector};
use log::{debug, error, info, warn};
use mountaincat::peripherals::{Ble, LinkError};
use mountaincat::protocol::{MAX_PAYLOAD_LEN, Payload};
use trouble_host::prelude::*;
use trouble_host::{
    Address,
    gatt::{GattConnection, GattConnectionEvent, GattEvent},
    prelude::{AdStructure, gatt_service},
};

const CONNECTIONS_MAX: usize = 1;
const L2CAP_CHANNELS_MAX: usize = 1;
const DEVICE_NAME: &str = "MountainCat";

/// Frames waiting in either direction between the GATT server and the relay.
pub const BLE_QUEUE_DEPTH: usize = 4;

pub type BleChannel = Channel<CriticalSectionRawMutex, Payload, BLE_QUEUE_DEPTH>;
pub type Writes = Sender<'static, CriticalSectionRawMutex, Payload, BLE_QUEUE_DEPTH>;
pub type Notifications = Receiver<'static, CriticalSectionRawMutex, Payload, BLE_QUEUE_DEPTH>;

static CONNECTED: AtomicBool = AtomicBool::new(false);

/// [`Ble`] handle for the relay. Notifications are queued for [`ble_task`].
pub struct BleLink {
    notifications: Sender<'static, CriticalSectionRawMutex, Payload, BLE_QUEUE_DEPTH>,
}

impl BleLink {
    pub fn new(
        notifications: Sender<'static, CriticalSectionRawMutex, Payload, BLE_QUEUE_DEPTH>,
    ) -> Self {
        Self { notifications }
    }
}

impl Ble for BleLink {
    fn is_connected(&self) -> bool {
        CONNECTED.load(Ordering::Relaxed)
    }

    fn send(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::Disconnected);
        }
        let frame = Payload::from_slice(payload).map_err(|_| LinkError::TooLarge)?;
        self.notifications
            .try_send(frame)
            .map_err(|_| LinkError::Busy)
    }
}

#[embassy_executor::task]
/// BLE task that handles stack initialization, advertising and GATT event
/// processing. Phone writes to the RX characteristic go to `writes`;
/// frames from `notifications` are notified on the TX characteristic.
pub async fn ble_task(
    radio: &'static Controller<'static>,
    bt_peripheral: esp_hal::peripherals::BT<'static>,
    writes: Writes,
    notifications: Notifications,
) {
    info!("BLE task starting...");

    let transport = match BleConnector::new(radio, bt_peripheral, Default::default()) {
        Ok(t) => t,
        Err(e) => {
            error!("Failed to create BLE connector: {:?}", e);
            return;
        }
    };
    let controller = ExternalController::<_, 20>::new(transport);
    let address: Address = Address::random([0xff, 0x8f, 0x1a, 0x05, 0xe4, 0xff]);
    let mut resources: HostResources<DefaultPacketPool, CONNECTIONS_MAX, L2CAP_CHANNELS_MAX> =
        HostResources::new();
    let stack = trouble_host::new(controller, &mut resources).set_random_address(address);
    let Host {
        mut peripheral,
        runner,
        ..
    } = stack.build();

    let server = match Server::new_with_config(GapConfig::Peripheral(PeripheralConfig {
        name: DEVICE_NAME,
        appearance: &appearance::sensor::GENERIC_SENSOR,
    })) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create GATT server: {:?}", e);
            return;
        }
    };
    info!("GATT server created with tracker service");

    let mut adv_data = [0; 31];
    let adv_data_len = match AdStructure::encode_slice(
        &[
            AdStructure::Flags(LE_GENERAL_DISCOVERABLE | BR_EDR_NOT_SUPPORTED),
            AdStructure::ServiceUuids16(&[[0x34, 0x12]]),
            AdStructure::CompleteLocalName(DEVICE_NAME.as_bytes()),
        ],
        &mut adv_data[..],
    ) {
        Ok(len) => len,
        Err(e) => {
            error!("Failed to encode advertising data: {:?}", e);
            return;
        }
    };

    let mut scan_data = [0; 31];
    let scan_data_len = match AdStructure::encode_slice(
        &[AdStructure::CompleteLocalName(DEVICE_NAME.as_bytes())],
        &mut scan_data[..],
    ) {
        Ok(len) => len,
        Err(e) => {
            error!("Failed to encode scan data: {:?}", e);
            return;
        }
    };

    join(ble_runner(runner), async {
        loop {
            info!("Advertising as {}", DEVICE_NAME);
            let acceptor = match peripheral
                .advertise(
                    &Default::default(),
                    Advertisement::ConnectableScannableUndirected {
                        adv_data: &adv_data[..adv_data_len],
                        scan_data: &scan_data[..scan_data_len],
                    },
                )
                .await
            {
                Ok(a) => a,
                Err(e) => {
                    error!("Failed to start BLE advertising: {:?}", e);
                    Timer::after(Duration::from_secs(1)).await;
                    continue;
                }
            };
            let conn = match acceptor.accept().await {
                Ok(c) => c,
                Err(e) => {
                    error!("Failed to accept BLE connection: {:?}", e);
                    continue;
                }
            };
            let conn = match conn.with_attribute_server(&server) {
                Ok(c) => c,
                Err(e) => {
                    error!("Failed to attach GATT server to connection: {:?}", e);
                    continue;
                }
            };

            info!("Phone connected");
            CONNECTED.store(true, Ordering::Relaxed);
            select(
                gatt_events_task(&server, &conn, &writes),
                notify_task(&server, &conn, &notifications),
            )
            .await;
            CONNECTED.store(false, Ordering::Relaxed);
            warn!("BLE connection closed, restarting advertising");
        }
    })
    .await;
}

/// Background task that runs the BLE stack's event loop.
/// This must run continuously alongside other BLE tasks.
async fn ble_runner(
    runner: Runner<'_, ExternalController<BleConnector<'static>, 20>, DefaultPacketPool>,
) {
    let mut runner = runner;
    loop {
        if let Err(e) = runner.run().await {
            error!("BLE runner stopped: {:?}, restarting", e);
            Timer::after(Duration::from_secs(1)).await;
        }
    }
}

/// Forwards writes on the RX characteristic until the phone disconnects.
async fn gatt_events_task(
    server: &Server<'_>,
    conn: &GattConnection<'_, '_, DefaultPacketPool>,
    writes: &Writes,
) {
    loop {
        match conn.next().await {
            GattConnectionEvent::Disconnected { reason } => {
                info!("Phone disconnected: {:?}", reason);
                break;
            }
            GattConnectionEvent::Gatt { event } => {
                if let GattEvent::Write(write_event) = &event {
                    if write_event.handle() == server.tracker_service.rx.handle {
                        let data = write_event.data();
                        debug!("BLE write on RX characteristic, {} bytes", data.len());
                        match Payload::from_slice(data) {
                            Ok(frame) => {
                                if writes.try_send(frame).is_err() {
                                    warn!("BLE write buffer full - write dropped");
                                }
                            }
                            Err(_) => warn!("BLE write of {} bytes dropped", data.len()),
                        }
                    }
                }
                match event.accept() {
                    Ok(reply) => reply.send().await,
                    Err(e) => warn!("Failed to reply to GATT event: {:?}", e),
                }
            }
            _ => {}
        }
    }
}

/// Sends queued frames as notifications on the TX characteristic. The
/// characteristic is fixed length, so frames are NUL-padded.
async fn notify_task(
    server: &Server<'_>,
    conn: &GattConnection<'_, '_, DefaultPacketPool>,
    notifications: &Notifications,
) {
    loop {
        let frame = notifications.receive().await;
        let mut data = [0u8; MAX_PAYLOAD_LEN];
        data[..frame.len()].copy_from_slice(&frame);
        match server.tracker_service.tx.notify(conn, &data).await {
            Ok(_) => debug!("Notified {} bytes", frame.len()),
            Err(e) => error!("Failed to send BLE notification: {:?}", e),
        }
    }
}

/// GATT server exposing the tracker service.
#[gatt_server]
struct Server {
    tracker_service: TrackerService,
}

/// Tracker service (UUID 0x1234). Frames are keyed JSON, NUL-padded to
/// the characteristic length.
#[gatt_service(uuid = "1234")]
struct TrackerService {
    /// Notifies the phone of relayed harness messages.
    #[characteristic(uuid = "5678", read, notify, value = [0u8; 200])]
    tx: [u8; 200],
    /// Written by the phone with commands for the harness.
    #[characteristic(uuid = "5679", read, write, value = [0u8; 200])]
    rx: [u8; 200],
}
