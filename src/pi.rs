//! Weigh on HX711 load cell amplifiers wired to a Raspberry Pi's GPIO header.
//!
//! Pins, gain and calibration are compiled in from `cfg.toml`.

mod config;

use anyhow::Context;
use hx711::Hx711;
use log::{error, info};
use rppal::gpio::Gpio;
use rppal::hal::Delay;

use config::AppConfig;

fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::load().context("invalid cfg.toml")?;

    let gpio = Gpio::new()?;

    let clock = gpio.get(config.clock_pin)?.into_output_low();

    let data = config
        .data_pins
        .iter()
        .map(|&pin| Ok(gpio.get(pin)?.into_input()))
        .collect::<Result<Vec<_>, rppal::gpio::Error>>()?;

    info!(
        "HX711 on clock pin {}, data pins {:?}, gain {}",
        config.clock_pin,
        config.data_pins,
        config.gain.code()
    );

    // Blocks until every chip answers; there is no timeout.
    let mut scale = Hx711::begin(clock, data, Delay::new(), config.gain.code())
        .context("HX711 did not start")?;

    scale.tare(config.tare_samples).context("tare failed")?;
    scale.set_scale(config.scale);

    info!("tared, offset {} on channel 0", scale.get_offset());

    loop {
        match scale.get_all_units(config.samples) {
            Ok(units) => {
                for (channel, value) in units.iter().enumerate() {
                    info!("channel {channel}: {value:.2}");
                }
            }
            Err(err) => error!("weighing failed: {err}"),
        }

        std::thread::sleep(config.interval);
    }
}
