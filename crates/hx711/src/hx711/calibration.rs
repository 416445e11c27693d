//! Averaging, tare and scale on top of raw readings.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use log::debug;

use super::Hx711;
use crate::{Error, Readings, MAX_CHIPS};

impl<CLK, DATA, DELAY, E> Hx711<CLK, DATA, DELAY>
where
    CLK: OutputPin<Error = E>,
    DATA: InputPin<Error = E>,
    DELAY: DelayNs,
{
    /// Mean of `times` reads of one chip, truncated toward zero.
    pub fn read_average(&mut self, times: u8, channel: usize) -> Result<i32, Error<E>> {
        if times == 0 {
            return Err(Error::NoSamples);
        }

        let mut sum = 0i64;

        for _ in 0..times {
            sum += i64::from(self.read(channel)?);
            self.pause();
        }

        Ok(mean(sum, times))
    }

    /// Per chip means of `times` parallel reads, truncated toward zero.
    pub fn read_averages(&mut self, times: u8) -> Result<Readings, Error<E>> {
        if times == 0 {
            return Err(Error::NoSamples);
        }

        let mut sums: heapless::Vec<i64, MAX_CHIPS> = self.data.iter().map(|_| 0).collect();

        for _ in 0..times {
            let values = self.read_all()?;

            for (sum, value) in sums.iter_mut().zip(values) {
                *sum += i64::from(value);
            }

            self.pause();
        }

        Ok(sums.into_iter().map(|sum| mean(sum, times)).collect())
    }

    /// Zero every channel: the mean of `times` parallel reads becomes its offset.
    pub fn tare(&mut self, times: u8) -> Result<(), Error<E>> {
        self.offsets = self.read_averages(times)?;

        debug!("HX711 tare offsets: {:?}", self.offsets);

        Ok(())
    }

    /// Mean of `times` reads of one chip, minus its tare offset.
    pub fn get_value(&mut self, times: u8, channel: usize) -> Result<i32, Error<E>> {
        let offset = self.offset(channel).ok_or(Error::UnknownChannel(channel))?;

        Ok(self.read_average(times, channel)? - offset)
    }

    /// [`Hx711::get_value`] divided by the scale, ie. in the calibrated unit.
    pub fn get_units(&mut self, times: u8, channel: usize) -> Result<f32, Error<E>> {
        Ok(self.get_value(times, channel)? as f32 / self.scale)
    }

    /// Per chip means of `times` parallel reads, minus each chip's tare offset.
    pub fn get_values(&mut self, times: u8) -> Result<Readings, Error<E>> {
        let means = self.read_averages(times)?;

        Ok(means
            .iter()
            .zip(self.offsets.iter())
            .map(|(mean, offset)| mean - offset)
            .collect())
    }

    /// [`Hx711::get_values`] divided by the scale.
    pub fn get_all_units(&mut self, times: u8) -> Result<heapless::Vec<f32, MAX_CHIPS>, Error<E>> {
        let scale = self.scale;

        Ok(self
            .get_values(times)?
            .into_iter()
            .map(|value| value as f32 / scale)
            .collect())
    }

    /// Set the divisor shared by every channel.
    pub fn set_scale(&mut self, scale: f32) {
        self.scale = scale;
    }

    pub fn get_scale(&self) -> f32 {
        self.scale
    }

    /// Does nothing. Offsets are only ever set by [`Hx711::tare`].
    pub fn set_offset(&mut self, offset: i32) {
        debug!("HX711 set_offset({offset}) ignored, use tare");
    }

    /// Tare offset of the first chip.
    pub fn get_offset(&self) -> i32 {
        self.offsets.first().copied().unwrap_or_default()
    }

    /// Tare offset of any chip.
    pub fn offset(&self, channel: usize) -> Option<i32> {
        self.offsets.get(channel).copied()
    }
}

fn mean(sum: i64, times: u8) -> i32 {
    // Integer division truncates toward zero; a mean of 24 bit values fits.
    (sum / i64::from(times)) as i32
}
