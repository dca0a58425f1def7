use esp_hal::{
    Async,
    gpio::{AnyPin, Level, Output, OutputConfig},
    uart::{Config as UartConfig, Uart},
};
use log::{debug, error, info};
use mountaincat::nmea::{MAX_SENTENCE_LEN, NmeaFix, SharedFix};
use mountaincat::peripherals::Gps;

/// GNSS modules ship at 9600 baud.
const GPS_BAUD: u32 = 9600;

/// Latest solution assembled by [`gps_task`].
static LATEST_FIX: SharedFix = SharedFix::new();

pub type GpsUart = Uart<'static, Async>;

/// Opens the receiver's UART. Panics only on an invalid baud setting.
pub fn open_uart(
    uart: esp_hal::peripherals::UART1<'static>,
    rx: AnyPin<'static>,
    tx: AnyPin<'static>,
) -> GpsUart {
    Uart::new(uart, UartConfig::default().with_baudrate(GPS_BAUD))
        .expect("GPS UART config")
        .with_rx(rx)
        .with_tx(tx)
        .into_async()
}

#[embassy_executor::task]
/// Reads NMEA lines off the UART and folds them into the shared fix.
pub async fn gps_task(mut uart: GpsUart) -> ! {
    info!("GPS UART initialized at {} baud", GPS_BAUD);

    let mut line = [0u8; MAX_SENTENCE_LEN];
    let mut pos = 0;
    let mut chunk = [0u8; 64];

    loop {
        let n = match uart.read_async(&mut chunk).await {
            Ok(n) => n,
            Err(e) => {
                error!("GPS UART read failed: {:?}", e);
                pos = 0;
                continue;
            }
        };
        for &b in &chunk[..n] {
            match b {
                b'\r' | b'\n' => {
                    if pos == 0 {
                        continue;
                    }
                    if let Err(e) = LATEST_FIX.feed(&line[..pos]) {
                        debug!("Skipping NMEA sentence: {}", e);
                    }
                    pos = 0;
                }
                b'$' => {
                    line[0] = b;
                    pos = 1;
                }
                _ if pos > 0 && pos < line.len() => {
                    line[pos] = b;
                    pos += 1;
                }
                // Overlong or no sentence start yet.
                _ => pos = 0,
            }
        }
    }
}

/// [`Gps`] over the UART receiver. Power is switched through the
/// module's enable pin; fixes come from [`gps_task`].
pub struct UartGps {
    enable: Output<'static>,
    fix: NmeaFix,
}

impl UartGps {
    pub fn new(enable: AnyPin<'static>) -> Self {
        Self {
            enable: Output::new(enable, Level::Low, OutputConfig::default()),
            fix: NmeaFix::NONE,
        }
    }
}

impl Gps for UartGps {
    fn begin(&mut self) -> bool {
        self.enable.set_high();
        LATEST_FIX.sentences() > 0
    }

    fn update(&mut self) {
        self.fix = LATEST_FIX.latest();
    }

    fn has_fix(&self) -> bool {
        self.fix.valid
    }

    fn latitude(&self) -> f64 {
        self.fix.latitude
    }

    fn longitude(&self) -> f64 {
        self.fix.longitude
    }

    fn altitude(&self) -> f64 {
        self.fix.altitude_ft
    }

    fn hour(&self) -> u8 {
        self.fix.time.hour
    }

    fn minute(&self) -> u8 {
        self.fix.time.minute
    }

    fn second(&self) -> u8 {
        self.fix.time.second
    }

    fn satellites_in_view(&self) -> u8 {
        self.fix.satellites
    }

    fn horizontal_dilution(&self) -> u16 {
        self.fix.hdop_x100
    }

    fn power_off(&mut self) {
        self.enable.set_low();
        self.fix.valid = false;
        LATEST_FIX.invalidate();
    }
}
