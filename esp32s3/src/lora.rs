use embassy_embedded_hal::shared_bus::asynch::spi::SpiDevice;
use embassy_futures::select::{Either, select};
use embassy_sync::{
    blocking_mutex::raw::CriticalSectionRawMutex,
    channel::{Channel, Receiver, Sender},
    mutex::Mutex,
};
use embassy_time::{Delay, Duration, Timer};
use esp_hal::{
    Async,
    gpio::{AnyPin, Input, InputConfig, Output, OutputConfig},
    time::Rate,
};
use log::{debug, error, info, warn};
use lora_phy::mod_params::*;
use lora_phy::{
    LoRa, RxMode,
    iv::GenericSx127xInterfaceVariant,
    sx127x::{Config, Sx127x, Sx1276},
};
use mountaincat::peripherals::{LinkError, Radio, RadioPacket};
use mountaincat::protocol::{MAX_PAYLOAD_LEN, Payload};
use mountaincat::session::LinkQuality;
use static_cell::StaticCell;

use crate::config;

/// Frames waiting for the radio in either direction.
pub const LORA_QUEUE_DEPTH: usize = 4;
const RETRY_DELAY: Duration = Duration::from_secs(1);

pub type LoraChannel<T> = Channel<CriticalSectionRawMutex, T, LORA_QUEUE_DEPTH>;
pub type Outbound = Receiver<'static, CriticalSectionRawMutex, Payload, LORA_QUEUE_DEPTH>;
pub type Inbound = Sender<'static, CriticalSectionRawMutex, RadioPacket, LORA_QUEUE_DEPTH>;

/// LoRa GPIO pins configuration
pub struct LoraGpios<'a> {
    pub cs: AnyPin<'a>,
    pub reset: AnyPin<'a>,
    pub dio0: AnyPin<'a>,
    pub sck: AnyPin<'a>,
    pub miso: AnyPin<'a>,
    pub mosi: AnyPin<'a>,
}

/// Modulation and packet parameters the link runs with.
struct LinkParams {
    modulation: ModulationParams,
    tx: PacketParams,
    rx: PacketParams,
}

/// [`Radio`] handle for the tracker core. Frames are queued for
/// [`lora_task`], which owns the SX1276.
pub struct LoraLink {
    tx: Sender<'static, CriticalSectionRawMutex, Payload, LORA_QUEUE_DEPTH>,
}

impl LoraLink {
    pub fn new(tx: Sender<'static, CriticalSectionRawMutex, Payload, LORA_QUEUE_DEPTH>) -> Self {
        Self { tx }
    }
}

impl Radio for LoraLink {
    fn send(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        let frame = Payload::from_slice(payload).map_err(|_| LinkError::TooLarge)?;
        self.tx.try_send(frame).map_err(|_| LinkError::Busy)
    }
}

#[embassy_executor::task]
/// Owns the SX1276: transmits queued frames and hands every received
/// packet, with its RSSI and SNR, to `inbound`. The radio returns to
/// continuous receive after each transmission.
pub async fn lora_task(
    spi_peripheral: esp_hal::peripherals::SPI2<'static>,
    gpios: LoraGpios<'static>,
    outbound: Outbound,
    inbound: Inbound,
) {
    info!("LoRa task starting...");

    let spi = match esp_hal::spi::master::Spi::new(
        spi_peripheral,
        esp_hal::spi::master::Config::default().with_frequency(Rate::from_mhz(1)),
    ) {
        Ok(spi) => spi,
        Err(e) => {
            error!("Failed to configure SPI for LoRa: {:?}", e);
            return reboot().await;
        }
    }
    .with_sck(gpios.sck)
    .with_mosi(gpios.mosi)
    .with_miso(gpios.miso)
    .into_async();

    let spi_bus = SPI_BUS.init(Mutex::new(spi));

    let cs = Output::new(
        gpios.cs,
        esp_hal::gpio::Level::High,
        OutputConfig::default(),
    );
    let spi_device = SpiDevice::new(spi_bus, cs);

    let chip_config = Config {
        chip: Sx1276,
        tcxo_used: false,
        tx_boost: false,
        rx_boost: false,
    };

    let reset = Output::new(
        gpios.reset,
        esp_hal::gpio::Level::High,
        OutputConfig::default(),
    );
    let dio0 = Input::new(gpios.dio0, InputConfig::default());

    let iv = match GenericSx127xInterfaceVariant::new(reset, dio0, None, None) {
        Ok(i) => i,
        Err(e) => {
            error!("Failed to create LoRa interface: {:?}", e);
            return reboot().await;
        }
    };

    // The driver owns the pins once constructed, so a failed construction can
    // only be retried from a clean boot.
    let radio = Sx127x::new(spi_device, iv, chip_config);
    let mut lora: LoraRadio = match LoRa::new(radio, true, Delay).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to create LoRa radio: {:?}", e);
            return reboot().await;
        }
    };

    let output_power = config::lora_tx_power_dbm();
    let frequency = config::lora_frequency_hz();

    let mut params = loop {
        match bring_up(&mut lora, frequency).await {
            Ok(p) => break p,
            Err(e) => {
                error!(
                    "LoRa radio did not initialize: {:?}, retrying in {} ms",
                    e,
                    RETRY_DELAY.as_millis()
                );
                Timer::after(RETRY_DELAY).await;
            }
        }
    };
    info!("LoRa radio ready for RX/TX operations");

    let mut rx_buffer = [0u8; 255];

    loop {
        let next_frame = outbound.receive();
        let lora_recv = lora.rx(&params.rx, &mut rx_buffer);

        match select(next_frame, lora_recv).await {
            Either::First(frame) => {
                debug!("Transmitting {} bytes over LoRa", frame.len());
                match lora
                    .prepare_for_tx(&params.modulation, &mut params.tx, output_power, &frame)
                    .await
                {
                    Ok(_) => match lora.tx().await {
                        Ok(_) => info!("LoRa TX successful ({} bytes)", frame.len()),
                        Err(e) => error!("LoRa TX failed: {:?}", e),
                    },
                    Err(e) => error!("LoRa prepare_for_tx failed: {:?}", e),
                }
                listen(&mut lora, &params).await;
            }
            Either::Second(Ok((len, status))) => {
                let len = len as usize;
                info!("LoRa RX: received {} bytes, RSSI: {}", len, status.rssi);
                if len > MAX_PAYLOAD_LEN {
                    warn!("LoRa packet of {} bytes exceeds one frame, dropped", len);
                    continue;
                }
                let Ok(payload) = Payload::from_slice(&rx_buffer[..len]) else {
                    continue;
                };
                let link = LinkQuality {
                    rssi: status.rssi,
                    snr: status.snr.clamp(i8::MIN as i16, i8::MAX as i16) as i8,
                };
                if inbound.try_send(RadioPacket { payload, link }).is_err() {
                    warn!("LoRa inbound buffer full - packet dropped");
                }
            }
            Either::Second(Err(e)) => {
                warn!("LoRa RX error: {:?}", e);
                listen(&mut lora, &params).await;
            }
        }
    }
}

/// SF10 at 125 kHz with 4/5 coding, explicit header and CRC on.
async fn bring_up(lora: &mut LoraRadio, frequency: u32) -> Result<LinkParams, RadioError> {
    lora.init().await?;
    let modulation = lora.create_modulation_params(
        SpreadingFactor::_10,
        Bandwidth::_125KHz,
        CodingRate::_4_5,
        frequency,
    )?;
    let tx = lora.create_tx_packet_params(8, false, true, false, &modulation)?;
    let rx = lora.create_rx_packet_params(8, false, 255, true, false, &modulation)?;
    lora.prepare_for_rx(RxMode::Continuous, &modulation, &rx)
        .await?;
    Ok(LinkParams { modulation, tx, rx })
}

/// Back to continuous receive after a transmission or a failed receive.
async fn listen(lora: &mut LoraRadio, params: &LinkParams) {
    if let Err(e) = lora
        .prepare_for_rx(RxMode::Continuous, &params.modulation, &params.rx)
        .await
    {
        error!("Failed to return to RX mode: {:?}", e);
    }
}

async fn reboot() {
    Timer::after(RETRY_DELAY).await;
    warn!("Restarting to retry LoRa bring-up");
    esp_hal::system::software_reset();
}

pub type LoraRadio = LoRa<
    Sx127x<
        SpiDevice<
            'static,
            CriticalSectionRawMutex,
            esp_hal::spi::master::Spi<'static, Async>,
            Output<'static>,
        >,
        GenericSx127xInterfaceVariant<Output<'static>, Input<'static>>,
        Sx1276,
    >,
    Delay,
>;

static SPI_BUS: StaticCell<
    Mutex<CriticalSectionRawMutex, esp_hal::spi::master::Spi<'static, Async>>,
> = StaticCell::new();
