use log::{info, warn};
use mountaincat::TrackerConfig;

const DEFAULT_TX_POWER_DBM: i32 = 14;
const DEFAULT_FREQUENCY_HZ: u32 = 915_300_000;

/// TX power in dBm. SX1276 supports -4 dBm to +20 dBm on the PA_BOOST pin.
pub fn lora_tx_power_dbm() -> i32 {
    let Some(power_str) = option_env!("LORA_TX_POWER_DBM") else {
        info!(
            "TX power not configured, using default {} dBm",
            DEFAULT_TX_POWER_DBM
        );
        return DEFAULT_TX_POWER_DBM;
    };
    match power_str.parse::<i32>() {
        Ok(v) if (-4..=20).contains(&v) => {
            info!("Using TX power from config: {} dBm", v);
            v
        }
        Ok(v) => {
            warn!(
                "TX power {} dBm out of range (-4 to 20), using default {} dBm",
                v, DEFAULT_TX_POWER_DBM
            );
            DEFAULT_TX_POWER_DBM
        }
        Err(_) => {
            warn!(
                "Invalid TX power value '{}', using default {} dBm",
                power_str, DEFAULT_TX_POWER_DBM
            );
            DEFAULT_TX_POWER_DBM
        }
    }
}

/// Carrier frequency in Hz, restricted to the common ISM bands:
/// 433.05-434.79 MHz (worldwide), 863-870 MHz (EU), 902-928 MHz (US).
pub fn lora_frequency_hz() -> u32 {
    let Some(freq_str) = option_env!("LORA_TX_FREQUENCY") else {
        info!("Frequency not configured, using default 915.3 MHz");
        return DEFAULT_FREQUENCY_HZ;
    };
    match freq_str.parse::<u32>() {
        Ok(v)
            if (433_050_000..=434_790_000).contains(&v)
                || (863_000_000..=870_000_000).contains(&v)
                || (902_000_000..=928_000_000).contains(&v) =>
        {
            info!(
                "Using frequency from config: {} Hz ({:.2} MHz)",
                v,
                v as f32 / 1_000_000.0
            );
            v
        }
        Ok(v) => {
            warn!(
                "Frequency {} Hz ({:.2} MHz) outside common ISM bands, using default 915.3 MHz",
                v,
                v as f32 / 1_000_000.0
            );
            DEFAULT_FREQUENCY_HZ
        }
        Err(_) => {
            warn!(
                "Invalid frequency value '{}', using default 915.3 MHz",
                freq_str
            );
            DEFAULT_FREQUENCY_HZ
        }
    }
}

/// Tracker loop settings. `TRACKER_MAX_FIX_POLLS` bounds the fix wait;
/// unset or empty keeps the unbounded wait.
pub fn tracker_config() -> TrackerConfig {
    let max_fix_polls = match option_env!("TRACKER_MAX_FIX_POLLS") {
        None | Some("") => None,
        Some(polls_str) => match polls_str.parse::<u32>() {
            Ok(0) | Err(_) => {
                warn!(
                    "Invalid TRACKER_MAX_FIX_POLLS '{}', waiting for a fix indefinitely",
                    polls_str
                );
                None
            }
            Ok(v) => {
                info!("Fix wait bounded to {} polls", v);
                Some(v)
            }
        },
    };
    TrackerConfig::DEFAULT.with_max_fix_polls(max_fix_polls)
}
