//! MountainCat receiver firmware
//!
//! Handheld unit: bridges the harness's LoRa link to the phone over BLE.
//! Harness packets are relayed as notifications with RSSI and SNR attached;
//! commands the phone writes are transmitted to the harness.

#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]

use embassy_executor::Spawner;
use embassy_futures::select::{Either3, select3};
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Ticker};
use esp_backtrace as _;
use esp_hal::clock::CpuClock;
use esp_hal::timer::timg::TimerGroup;
use log::{debug, info};
use mountaincat::Session;
use mountaincat::peripherals::RadioPacket;
use mountaincat::protocol::Payload;
use mountaincat::receiver::{BATTERY_SAMPLE_INTERVAL_MS, Relay};
use mountaincat_esp32s3::ble::{BleChannel, BleLink, ble_task};
use mountaincat_esp32s3::board::AdcBattery;
use mountaincat_esp32s3::lora::{LoraChannel, LoraGpios, LoraLink, lora_task};
use static_cell::StaticCell;

extern crate alloc;

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

static SESSION: Session = Session::new();

static LORA_OUT: LoraChannel<Payload> = Channel::new();
static LORA_IN: LoraChannel<RadioPacket> = Channel::new();
static BLE_WRITES: BleChannel = Channel::new();
static BLE_NOTIFY: BleChannel = Channel::new();

#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    esp_println::logger::init_logger_from_env();

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(#[unsafe(link_section = ".dram2_uninit")] size: 73744);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    info!("MountainCat receiver starting");

    let radio_init = esp_radio::init().expect("Failed to initialize Wi-Fi/BLE controller");
    static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();
    let radio = RADIO.init(radio_init);

    spawner
        .spawn(ble_task(
            radio,
            peripherals.BT,
            BLE_WRITES.sender(),
            BLE_NOTIFY.receiver(),
        ))
        .expect("spawn ble_task");

    let lora_gpios = LoraGpios {
        cs: peripherals.GPIO10.into(),
        reset: peripherals.GPIO9.into(),
        dio0: peripherals.GPIO14.into(),
        sck: peripherals.GPIO12.into(),
        miso: peripherals.GPIO13.into(),
        mosi: peripherals.GPIO11.into(),
    };
    spawner
        .spawn(lora_task(
            peripherals.SPI2,
            lora_gpios,
            LORA_OUT.receiver(),
            LORA_IN.sender(),
        ))
        .expect("spawn lora_task");

    let relay = Relay::new(&SESSION);
    let mut ble = BleLink::new(BLE_NOTIFY.sender());
    let mut lora = LoraLink::new(LORA_OUT.sender());
    let mut battery = AdcBattery::new(peripherals.ADC1, peripherals.GPIO1);
    let mut battery_tick =
        Ticker::every(Duration::from_millis(BATTERY_SAMPLE_INTERVAL_MS as u64));

    relay.sample_battery(&mut battery);
    loop {
        match select3(
            LORA_IN.receive(),
            BLE_WRITES.receive(),
            battery_tick.next(),
        )
        .await
        {
            // Codec and link failures are logged inside the relay.
            Either3::First(packet) => {
                match relay.on_radio_packet(&mut ble, &packet.payload, packet.link) {
                    Ok(relayed) => debug!("LoRa packet: {:?}", relayed),
                    Err(e) => debug!("LoRa packet dropped: {}", e),
                }
            }
            Either3::Second(write) => match relay.on_ble_write(&mut lora, &write) {
                Ok(relayed) => debug!("BLE write: {:?}", relayed),
                Err(e) => debug!("BLE write dropped: {}", e),
            },
            Either3::Third(()) => {
                let percent = relay.sample_battery(&mut battery);
                info!("Receiver battery {}%", percent);
            }
        }
    }
}
