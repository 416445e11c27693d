//! Build time settings, compiled in from the `[scales]` table of `cfg.toml`.

use std::collections::HashSet;
use std::time::Duration;

use hx711::{Gain, MAX_CHIPS};
use thiserror::Error;

#[toml_cfg::toml_config]
pub struct Config {
    #[default(5)]
    clock_pin: u8,

    #[default("6")]
    data_pins: &'static str,

    #[default(128)]
    gain: u8,

    #[default("1.0")]
    scale: &'static str,

    #[default(10)]
    tare_samples: u8,

    #[default(3)]
    samples: u8,

    #[default(500)]
    interval_ms: u64,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("data_pins is empty")]
    NoDataPins,
    #[error("data_pins lists {0} pins, at most {max} supported", max = MAX_CHIPS)]
    TooManyDataPins(usize),
    #[error("data_pins has an invalid pin number: {0:?}")]
    InvalidPin(String),
    #[error("pin {0} is used more than once")]
    DuplicatePin(u8),
    #[error("gain must be 128, 64 or 32, got {0}")]
    InvalidGain(u8),
    #[error("scale must be a non-zero number, got {0:?}")]
    InvalidScale(String),
    #[error("{0} must be at least 1")]
    NoSamples(&'static str),
}

/// Validated settings.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub clock_pin: u8,
    pub data_pins: Vec<u8>,
    pub gain: Gain,
    pub scale: f32,
    pub tare_samples: u8,
    pub samples: u8,
    pub interval: Duration,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config = CONFIG;

        Ok(AppConfig {
            clock_pin: config.clock_pin,
            data_pins: parse_data_pins(config.data_pins, config.clock_pin)?,
            gain: parse_gain(config.gain)?,
            scale: parse_scale(config.scale)?,
            tare_samples: check_samples("tare_samples", config.tare_samples)?,
            samples: check_samples("samples", config.samples)?,
            interval: Duration::from_millis(config.interval_ms),
        })
    }
}

/// Comma separated BCM pin numbers, none of them the clock pin.
pub fn parse_data_pins(value: &str, clock_pin: u8) -> Result<Vec<u8>, ConfigError> {
    let pins = value
        .split(',')
        .map(str::trim)
        .filter(|pin| !pin.is_empty())
        .map(|pin| {
            pin.parse::<u8>()
                .map_err(|_| ConfigError::InvalidPin(pin.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if pins.is_empty() {
        return Err(ConfigError::NoDataPins);
    }

    if pins.len() > MAX_CHIPS {
        return Err(ConfigError::TooManyDataPins(pins.len()));
    }

    let mut seen = HashSet::from([clock_pin]);

    for &pin in &pins {
        if !seen.insert(pin) {
            return Err(ConfigError::DuplicatePin(pin));
        }
    }

    Ok(pins)
}

pub fn parse_gain(code: u8) -> Result<Gain, ConfigError> {
    Gain::from_code(code).ok_or(ConfigError::InvalidGain(code))
}

pub fn parse_scale(value: &str) -> Result<f32, ConfigError> {
    match value.trim().parse::<f32>() {
        Ok(scale) if scale.is_finite() && scale != 0.0 => Ok(scale),
        _ => Err(ConfigError::InvalidScale(value.to_string())),
    }
}

pub fn check_samples(name: &'static str, samples: u8) -> Result<u8, ConfigError> {
    if samples == 0 {
        Err(ConfigError::NoSamples(name))
    } else {
        Ok(samples)
    }
}
