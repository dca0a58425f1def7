//! MountainCat harness firmware
//!
//! Collar unit: GNSS receiver, SX1276 LoRa radio, RGB LED, buzzer and a
//! battery divider. Wakes on its timer or on a received command, reports
//! position over LoRa and carries out the commands the phone sends through
//! the receiver.

#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]

use embassy_executor::Spawner;
use embassy_sync::channel::Channel;
use embassy_time::Delay;
use esp_backtrace as _;
use esp_hal::clock::CpuClock;
use esp_hal::timer::timg::TimerGroup;
use log::{debug, info};
use mountaincat::peripherals::RadioPacket;
use mountaincat::protocol::Payload;
use mountaincat::tracker::Peripherals;
use mountaincat::{CommandQueue, Context, Session, TrackerLoop, WakeScheduler};
use mountaincat_esp32s3::board::{AdcBattery, GpioBuzzer, GpioRgbLed};
use mountaincat_esp32s3::config::tracker_config;
use mountaincat_esp32s3::gps::{self, UartGps, gps_task};
use mountaincat_esp32s3::lora::{LoraChannel, LoraGpios, LoraLink, lora_task};

extern crate alloc;

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

static SESSION: Session = Session::new();
static COMMANDS: CommandQueue = CommandQueue::new();
static WAKE: WakeScheduler = WakeScheduler::new();
static CTX: Context<'static> = Context::new(&SESSION, &COMMANDS, &WAKE);

static LORA_OUT: LoraChannel<Payload> = Channel::new();
static LORA_IN: LoraChannel<RadioPacket> = Channel::new();

type HarnessLoop = TrackerLoop<
    'static,
    UartGps,
    AdcBattery,
    LoraLink,
    GpioRgbLed,
    GpioBuzzer,
    Delay,
>;

#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    esp_println::logger::init_logger_from_env();

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(#[unsafe(link_section = ".dram2_uninit")] size: 32768);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    info!("MountainCat harness starting");

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

    let uart = gps::open_uart(
        peripherals.UART1,
        peripherals.GPIO18.into(),
        peripherals.GPIO17.into(),
    );
    spawner.spawn(gps_task(uart)).expect("spawn gps_task");
    spawner.spawn(wake_timer_task()).expect("spawn wake_timer_task");
    spawner.spawn(radio_rx_task()).expect("spawn radio_rx_task");

    let hardware = Peripherals {
        gps: UartGps::new(peripherals.GPIO8.into()),
        battery: AdcBattery::new(peripherals.ADC1, peripherals.GPIO1),
        radio: LoraLink::new(LORA_OUT.sender()),
        led: GpioRgbLed::new(
            peripherals.GPIO4.into(),
            peripherals.GPIO5.into(),
            peripherals.GPIO6.into(),
        ),
        buzzer: GpioBuzzer::new(peripherals.GPIO7.into()),
    };
    let mut tracker: HarnessLoop =
        TrackerLoop::new(CTX, hardware, Delay, tracker_config());
    tracker.run().await
}

#[embassy_executor::task]
/// Runs the one-shot wake timer the tracker loop arms.
async fn wake_timer_task() -> ! {
    WAKE.run(&mut Delay).await
}

#[embassy_executor::task]
/// Hands received packets to the tracker core, which records them and
/// raises the radio wake.
async fn radio_rx_task() -> ! {
    loop {
        let packet = LORA_IN.receive().await;
        // Decode failures are already logged by the core; the packet is dropped.
        match CTX.on_radio_receive(&packet.payload, packet.link.rssi, packet.link.snr) {
            Ok(kind) => debug!("{:?} recorded, wake raised", kind),
            Err(e) => debug!("LoRa packet dropped: {}", e),
        }
    }
}
