//! GPIO and ADC collaborators: battery monitor, RGB LED and buzzer.

use esp_hal::{
    Blocking,
    analog::adc::{Adc, AdcConfig, AdcPin, Attenuation},
    gpio::{AnyPin, Level, Output, OutputConfig},
    peripherals::{ADC1, GPIO1},
};
use log::debug;
use mountaincat::peripherals::{BatteryMonitor, Buzzer, RgbLed};
use mountaincat::session::Rgb;

/// Full-scale input at 11 dB attenuation.
const ADC_FULL_SCALE_MV: f32 = 3100.0;
const ADC_MAX_RAW: f32 = 4095.0;
/// The cell is sampled through a 1:1 resistor divider.
const DIVIDER_RATIO: f32 = 2.0;

/// Cell voltage on GPIO1 through the divider.
pub struct AdcBattery {
    adc: Adc<'static, ADC1<'static>, Blocking>,
    pin: AdcPin<GPIO1<'static>, ADC1<'static>>,
}

impl AdcBattery {
    pub fn new(adc1: ADC1<'static>, gpio1: GPIO1<'static>) -> Self {
        let mut config = AdcConfig::new();
        let pin = config.enable_pin(gpio1, Attenuation::_11dB);
        Self {
            adc: Adc::new(adc1, config),
            pin,
        }
    }
}

impl BatteryMonitor for AdcBattery {
    fn read_millivolts(&mut self) -> f32 {
        let raw: u16 = nb::block!(self.adc.read_oneshot(&mut self.pin)).unwrap_or(0);
        let millivolts = raw as f32 / ADC_MAX_RAW * ADC_FULL_SCALE_MV * DIVIDER_RATIO;
        debug!("Battery raw {} -> {} mV", raw, millivolts);
        millivolts
    }
}

/// Common-cathode RGB LED on three plain GPIOs. Without PWM a channel is
/// lit when its commanded value is at least half scale.
pub struct GpioRgbLed {
    red: Output<'static>,
    green: Output<'static>,
    blue: Output<'static>,
}

impl GpioRgbLed {
    pub fn new(red: AnyPin<'static>, green: AnyPin<'static>, blue: AnyPin<'static>) -> Self {
        Self {
            red: Output::new(red, Level::Low, OutputConfig::default()),
            green: Output::new(green, Level::Low, OutputConfig::default()),
            blue: Output::new(blue, Level::Low, OutputConfig::default()),
        }
    }

    fn show(&mut self, rgb: Rgb) {
        self.red.set_level(level(rgb.r));
        self.green.set_level(level(rgb.g));
        self.blue.set_level(level(rgb.b));
    }
}

fn level(value: u8) -> Level {
    if value >= 128 { Level::High } else { Level::Low }
}

impl RgbLed for GpioRgbLed {
    fn set_color(&mut self, rgb: Rgb) {
        self.show(rgb);
    }

    fn off(&mut self) {
        self.show(Rgb::OFF);
    }

    /// All channels on approximates the colour cycle.
    fn set_rainbow(&mut self, enabled: bool) {
        if enabled {
            self.show(Rgb::new(255, 255, 255));
        } else {
            self.off();
        }
    }
}

/// Active buzzer driven directly from a GPIO.
pub struct GpioBuzzer {
    pin: Output<'static>,
}

impl GpioBuzzer {
    pub fn new(pin: AnyPin<'static>) -> Self {
        Self {
            pin: Output::new(pin, Level::Low, OutputConfig::default()),
        }
    }
}

impl Buzzer for GpioBuzzer {
    fn on(&mut self) {
        self.pin.set_high();
    }

    fn off(&mut self) {
        self.pin.set_low();
    }
}
