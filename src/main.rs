//! Weigh things on simulated load cells: the HX711 driver against `hx711::sim` chips.

mod config;

use anyhow::Context;
use embedded_hal::delay::DelayNs;
use hx711::sim::{SimBus, SimChip};
use hx711::Hx711;
use log::info;

use config::AppConfig;

/// Weighings before the chips are powered down.
const ROUNDS: u32 = 10;

/// Conversion time at the chip's 10 samples per second.
const CONVERSION_US: u64 = 100_000;

/// Load added per round, in units.
const STEP: f32 = 25.0;

fn baseline(chip: usize) -> i32 {
    8_000 + 1_500 * chip as i32
}

/// Noisy readings queued per chip and round. Further reads repeat the last one.
const NOISY: u8 = 8;

/// Raw readings of `chip` carrying `load` units, with a little deterministic noise.
fn readings(chip: usize, load: f32, scale: f32, samples: u8) -> Vec<i32> {
    (0..i32::from(samples.min(NOISY)))
        .map(|sample| {
            let noise = (sample * 7 + chip as i32 * 3) % 5 - 2;
            baseline(chip) + (load * scale) as i32 + noise
        })
        .collect()
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::load().context("invalid cfg.toml")?;
    let chips = config.data_pins.len();

    info!(
        "simulating {chips} HX711 on clock pin {}, data pins {:?}",
        config.clock_pin, config.data_pins
    );

    let bus = SimBus::new((0..chips).map(|chip| {
        SimChip::new()
            .with_conversion_us(CONVERSION_US)
            .with_steady(baseline(chip))
    }));

    let mut scale = Hx711::begin(bus.clock(), bus.data_pins(), bus.delay(), config.gain.code())
        .context("HX711 did not start")?;

    scale.tare(config.tare_samples).context("tare failed")?;
    scale.set_scale(config.scale);

    info!("tared, offset {} on channel 0", scale.get_offset());

    for round in 1..=ROUNDS {
        for chip in 0..chips {
            let load = STEP * round as f32 * (chip + 1) as f32;
            bus.push_values(chip, &readings(chip, load, config.scale, config.samples));
        }

        let units = scale
            .get_all_units(config.samples)
            .context("weighing failed")?;

        for (channel, value) in units.iter().enumerate() {
            info!("round {round:2} channel {channel}: {value:8.2}");
        }

        std::thread::sleep(config.interval);
    }

    scale.power_down()?;
    bus.delay().delay_ms(1);
    info!("powered down: {}", bus.is_asleep());

    scale.power_up()?;

    // The first reading after wake up is taken at channel A, gain 128.
    let raw = scale.read_all()?;
    info!("first reading after power up: {:?}", raw.as_slice());

    Ok(())
}
