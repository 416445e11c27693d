use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use log::{debug, trace};

use crate::{decode, Error, Gain, Readings, MAX_CHIPS, POLL_US, PULSE_US};

mod calibration;

/// HX711 driver for one chip, or up to [`MAX_CHIPS`] chips sharing a clock line.
pub struct Hx711<CLK, DATA, DELAY> {
    clock: CLK,
    data: heapless::Vec<DATA, MAX_CHIPS>,
    delay: DELAY,
    gain: Gain,
    offsets: Readings,
    scale: f32,
}

impl<CLK, DATA, DELAY, E> Hx711<CLK, DATA, DELAY>
where
    CLK: OutputPin<Error = E>,
    DATA: InputPin<Error = E>,
    DELAY: DelayNs,
{
    /// Takes ownership of the shared clock pin and one data pin per chip, then pushes `gain`
    /// (128, 64 or 32) to the chips with one discarded read.
    ///
    /// Blocks until every chip is ready. Fails if no data pins, or more than [`MAX_CHIPS`],
    /// are given.
    pub fn begin(
        clock: CLK,
        data: impl IntoIterator<Item = DATA>,
        delay: DELAY,
        gain: u8,
    ) -> Result<Self, Error<E>> {
        let mut pins = heapless::Vec::new();
        let mut count = 0;

        for pin in data {
            count += 1;
            // Keep counting past capacity so the error reports the real number.
            let _ = pins.push(pin);
        }

        if count == 0 {
            return Err(Error::NoChips);
        }

        if count > MAX_CHIPS {
            return Err(Error::TooManyChips(count));
        }

        let mut hx711 = Self {
            offsets: pins.iter().map(|_| 0).collect(),
            clock,
            data: pins,
            delay,
            gain: Gain::default(),
            scale: 1.0,
        };

        debug!("HX711 begin: {count} chip(s), gain code {gain}");

        hx711.set_gain(gain)?;

        Ok(hx711)
    }

    /// Single chip shorthand for [`Hx711::begin`].
    pub fn single(clock: CLK, data: DATA, delay: DELAY, gain: u8) -> Result<Self, Error<E>> {
        Self::begin(clock, core::iter::once(data), delay, gain)
    }

    /// Hands the pins and delay back.
    pub fn release(self) -> (CLK, heapless::Vec<DATA, MAX_CHIPS>, DELAY) {
        (self.clock, self.data, self.delay)
    }

    /// Number of chips driven.
    pub fn chips(&self) -> usize {
        self.data.len()
    }

    /// Current channel and gain selection.
    pub fn gain(&self) -> Gain {
        self.gain
    }

    /// `true` once every chip has pulled its data line low, ie. finished a conversion.
    pub fn is_ready(&mut self) -> Result<bool, Error<E>> {
        let mut ready = true;

        // Poll every line, even after a busy one.
        for pin in self.data.iter_mut() {
            ready &= pin.is_low().map_err(Error::Pin)?;
        }

        Ok(ready)
    }

    /// Select channel and gain by code (128, 64 or 32) and push it to the chips with one
    /// discarded read. Unknown codes keep the current selection.
    ///
    /// The discarded read still returns a conversion made with the previous selection; the
    /// next read is the first one to use the new selection.
    pub fn set_gain(&mut self, code: u8) -> Result<(), Error<E>> {
        match Gain::from_code(code) {
            Some(gain) => {
                debug!("HX711 gain {} -> {}", self.gain.code(), gain.code());
                self.gain = gain;
            }
            None => debug!("HX711 ignoring gain code {code}, keeping {}", self.gain.code()),
        }

        self.clock.set_low().map_err(Error::Pin)?;
        self.read(0)?;

        Ok(())
    }

    /// Read one chip, blocking until every chip is ready.
    pub fn read(&mut self, channel: usize) -> Result<i32, Error<E>> {
        self.block(|hx711| hx711.try_read(channel))
    }

    /// Read one chip if every chip is ready, without waiting.
    pub fn try_read(&mut self, channel: usize) -> nb::Result<i32, Error<E>> {
        if channel >= self.data.len() {
            return Err(Error::UnknownChannel(channel).into());
        }

        if !self.is_ready()? {
            return Err(nb::Error::WouldBlock);
        }

        let mut data = [0u8; 3];

        for byte in data.iter_mut() {
            for _ in 0..8 {
                self.clock_high()?;
                let bit = self.data[channel].is_high().map_err(Error::Pin)?;
                self.clock_low()?;

                *byte = (*byte << 1) | u8::from(bit);
            }
        }

        self.select_next()?;

        let value = decode(data);

        trace!("HX711 channel {channel}: {value}");

        Ok(value)
    }

    /// Read every chip on the same clock edges, blocking until all are ready.
    pub fn read_all(&mut self) -> Result<Readings, Error<E>> {
        self.block(Self::try_read_all)
    }

    /// Read every chip if all are ready, without waiting.
    pub fn try_read_all(&mut self) -> nb::Result<Readings, Error<E>> {
        if !self.is_ready()? {
            return Err(nb::Error::WouldBlock);
        }

        let mut values: Readings = self.data.iter().map(|_| 0).collect();

        for bit in 0..24 {
            self.clock_high()?;

            // Every chip is sampled before the clock moves on.
            for (value, pin) in values.iter_mut().zip(self.data.iter_mut()) {
                let high = pin.is_high().map_err(Error::Pin)?;

                if bit == 0 && high {
                    // Negative: start from all ones so the result comes out sign-extended.
                    *value = -1;
                } else {
                    *value = (*value << 1) | i32::from(high);
                }
            }

            self.clock_low()?;
        }

        self.select_next()?;

        trace!("HX711 all channels: {values:?}");

        Ok(values)
    }

    /// Clock low then high. Chips sleep once the clock has been high for 60µs.
    pub fn power_down(&mut self) -> Result<(), Error<E>> {
        debug!("HX711 power down");

        self.clock.set_low().map_err(Error::Pin)?;
        self.clock.set_high().map_err(Error::Pin)?;

        Ok(())
    }

    /// Clock low. Chips wake up reset to channel A, gain 128, until the trailing pulses of the
    /// next read select [`Hx711::gain`] again. Allow the chips to settle before reading.
    pub fn power_up(&mut self) -> Result<(), Error<E>> {
        debug!("HX711 power up");

        self.clock.set_low().map_err(Error::Pin)
    }

    /// Poll `op` until it stops returning [`nb::Error::WouldBlock`], pausing in between.
    fn block<T>(
        &mut self,
        mut op: impl FnMut(&mut Self) -> nb::Result<T, Error<E>>,
    ) -> Result<T, Error<E>> {
        loop {
            match op(self) {
                Ok(value) => return Ok(value),
                Err(nb::Error::Other(err)) => return Err(err),
                Err(nb::Error::WouldBlock) => self.pause(),
            }
        }
    }

    /// Give the rest of the system a turn.
    fn pause(&mut self) {
        self.delay.delay_us(POLL_US);
    }

    /// Extra pulses after the data bits select channel and gain for the next conversion.
    fn select_next(&mut self) -> Result<(), Error<E>> {
        for _ in 0..self.gain.pulses() {
            self.clock_high()?;
            self.clock_low()?;
        }

        Ok(())
    }

    fn clock_high(&mut self) -> Result<(), Error<E>> {
        self.clock.set_high().map_err(Error::Pin)?;
        self.delay.delay_us(PULSE_US);

        Ok(())
    }

    fn clock_low(&mut self) -> Result<(), Error<E>> {
        self.clock.set_low().map_err(Error::Pin)?;
        self.delay.delay_us(PULSE_US);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimBus, SimChip, SimClock, SimData, SimDelay};

    type SimHx711<'a> = Hx711<SimClock<'a>, SimData<'a>, SimDelay<'a>>;

    fn driver(bus: &SimBus, gain: u8) -> SimHx711<'_> {
        Hx711::begin(bus.clock(), bus.data_pins(), bus.delay(), gain).unwrap()
    }

    #[test]
    fn single_read_decodes_full_range() {
        let bus = SimBus::new([SimChip::new()]);
        let mut hx711 = Hx711::single(bus.clock(), bus.data(0), bus.delay(), 128).unwrap();

        let boundaries = [-(1 << 23), -(1 << 23) + 1, -1, 0, 1, (1 << 23) - 2, (1 << 23) - 1];
        let sweep = (-(1 << 23)..(1 << 23)).step_by(99_991);

        for value in boundaries.into_iter().chain(sweep) {
            bus.push_values(0, &[value]);
            assert_eq!(hx711.read(0), Ok(value));
        }
    }

    #[test]
    fn parallel_read_keeps_chips_apart() {
        let bus = SimBus::new([SimChip::new(), SimChip::new(), SimChip::new()]);
        let mut hx711 = driver(&bus, 128);

        bus.push_values(0, &[100, -(1 << 23)]);
        bus.push_values(1, &[-50, (1 << 23) - 1]);
        bus.push_values(2, &[0, -1]);

        assert_eq!(hx711.read_all().unwrap().as_slice(), &[100, -50, 0]);
        assert_eq!(
            hx711.read_all().unwrap().as_slice(),
            &[-(1 << 23), (1 << 23) - 1, -1]
        );
    }

    #[test]
    fn single_read_picks_its_channel() {
        let bus = SimBus::new([SimChip::new(), SimChip::new()]);
        let mut hx711 = driver(&bus, 128);

        bus.push_values(0, &[11]);
        bus.push_values(1, &[22]);

        assert_eq!(hx711.read(1), Ok(22));
        assert_eq!(hx711.read(0), Ok(11));
        assert_eq!(hx711.read(2), Err(Error::UnknownChannel(2)));
    }

    #[test]
    fn pin_count_is_bounded() {
        let bus = SimBus::new([SimChip::new()]);

        let none = Hx711::begin(bus.clock(), core::iter::empty::<SimData>(), bus.delay(), 128);
        assert!(matches!(none, Err(Error::NoChips)));

        let nine = (0..9).map(|_| bus.data(0));
        let too_many = Hx711::begin(bus.clock(), nine, bus.delay(), 128);
        assert!(matches!(too_many, Err(Error::TooManyChips(9))));

        let eight = (0..8).map(|_| bus.data(0));
        let hx711 = Hx711::begin(bus.clock(), eight, bus.delay(), 128).unwrap();
        assert_eq!(hx711.chips(), 8);
    }

    #[test]
    fn ready_only_when_every_chip_is() {
        let bus = SimBus::new([
            SimChip::new(),
            SimChip::new(),
            SimChip::new().with_conversion_us(1_000),
        ]);
        let mut hx711 = driver(&bus, 128);

        assert_eq!(hx711.is_ready(), Ok(false));
        assert!(matches!(hx711.try_read_all(), Err(nb::Error::WouldBlock)));
        assert!(matches!(hx711.try_read(0), Err(nb::Error::WouldBlock)));

        bus.delay().delay_us(1_000);

        assert_eq!(hx711.is_ready(), Ok(true));
        assert!(hx711.try_read_all().is_ok());
    }

    #[test]
    fn read_waits_for_slow_chip() {
        let bus = SimBus::new([SimChip::new().with_conversion_us(12_500)]);
        let mut hx711 = driver(&bus, 128);

        let before = bus.now_ns();
        bus.push_values(0, &[7]);

        assert_eq!(hx711.read(0), Ok(7));
        assert!(bus.now_ns() - before >= 12_500_000);
    }

    #[test]
    fn gain_codes_select_pulse_counts() {
        let bus = SimBus::new([SimChip::new()]);
        let mut hx711 = driver(&bus, 64);

        assert_eq!(hx711.gain(), Gain::A64);
        assert_eq!(hx711.is_ready(), Ok(true));
        assert_eq!(bus.selected(0), Gain::A64);

        hx711.set_gain(32).unwrap();
        assert_eq!(hx711.gain(), Gain::B32);
        assert_eq!(hx711.is_ready(), Ok(true));
        assert_eq!(bus.selected(0), Gain::B32);

        hx711.set_gain(16).unwrap();
        assert_eq!(hx711.gain(), Gain::B32);
        assert_eq!(hx711.is_ready(), Ok(true));
        assert_eq!(bus.selected(0), Gain::B32);

        hx711.set_gain(128).unwrap();
        assert_eq!(hx711.gain(), Gain::A128);
        assert_eq!(hx711.is_ready(), Ok(true));
        assert_eq!(bus.selected(0), Gain::A128);
    }

    #[test]
    fn gain_change_lags_one_reading() {
        let bus = SimBus::new([SimChip::new().with_channel_b(&[-5])]);
        let mut hx711 = driver(&bus, 128);

        bus.push_values(0, &[1, 2]);

        hx711.set_gain(32).unwrap();

        // The discarded read inside set_gain was still converted from channel A.
        assert_eq!(bus.last_conversion(0), Some((Gain::A128, 1)));

        assert_eq!(hx711.read(0), Ok(-5));
        assert_eq!(bus.last_conversion(0), Some((Gain::B32, -5)));

        hx711.set_gain(128).unwrap();
        assert_eq!(bus.last_conversion(0), Some((Gain::B32, -5)));
        assert_eq!(hx711.read(0), Ok(2));
    }

    #[test]
    fn power_cycle_toggles_clock_only() {
        let bus = SimBus::new([SimChip::new()]);
        let mut hx711 = driver(&bus, 64);

        bus.clear_trace();

        hx711.power_down().unwrap();
        bus.delay().delay_us(100);
        assert!(bus.is_asleep());

        hx711.power_up().unwrap();
        assert!(!bus.is_asleep());
        assert_eq!(bus.trace().as_slice(), &[false, true, false]);

        // Woken chips start over on channel A at gain 128.
        assert_eq!(bus.selected(0), Gain::A128);

        bus.push_values(0, &[42]);
        assert_eq!(hx711.read(0), Ok(42));
        assert_eq!(bus.last_conversion(0), Some((Gain::A128, 42)));
        assert_eq!(hx711.is_ready(), Ok(true));
        assert_eq!(bus.selected(0), Gain::A64);
    }

    #[derive(Debug, PartialEq)]
    struct MockError;

    impl embedded_hal::digital::Error for MockError {
        fn kind(&self) -> embedded_hal::digital::ErrorKind {
            embedded_hal::digital::ErrorKind::Other
        }
    }

    /// Pin that works for `left` operations, then fails. Reads as low.
    struct MockPin {
        left: usize,
    }

    impl MockPin {
        fn step(&mut self) -> Result<(), MockError> {
            if self.left == 0 {
                return Err(MockError);
            }

            self.left -= 1;
            Ok(())
        }
    }

    impl embedded_hal::digital::ErrorType for MockPin {
        type Error = MockError;
    }

    impl OutputPin for MockPin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.step()
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.step()
        }
    }

    impl InputPin for MockPin {
        fn is_high(&mut self) -> Result<bool, Self::Error> {
            self.step().map(|_| false)
        }

        fn is_low(&mut self) -> Result<bool, Self::Error> {
            self.step().map(|_| true)
        }
    }

    struct NoDelay;

    impl DelayNs for NoDelay {
        fn delay_ns(&mut self, _ns: u32) {}
    }

    const WORKING: usize = usize::MAX;

    /// Data line operations `begin` spends on channel 0: one readiness poll and 24 bits.
    const BEGIN_READS: usize = 25;

    /// Clock operations `begin` spends: one low, 24 bit pulses and one gain pulse.
    const BEGIN_EDGES: usize = 51;

    fn pin(left: usize) -> MockPin {
        MockPin { left }
    }

    #[test]
    fn pin_errors_propagate() {
        let dead = Hx711::single(pin(WORKING), pin(0), NoDelay, 128);
        assert!(matches!(dead, Err(Error::Pin(MockError))));

        let dead = Hx711::single(pin(0), pin(WORKING), NoDelay, 128);
        assert!(matches!(dead, Err(Error::Pin(MockError))));

        // Passes the readiness poll, fails on the first data bit.
        let mut hx711 = Hx711::single(pin(WORKING), pin(BEGIN_READS + 1), NoDelay, 128).unwrap();
        assert!(matches!(
            hx711.try_read(0),
            Err(nb::Error::Other(Error::Pin(MockError)))
        ));
        assert!(matches!(
            hx711.try_read_all(),
            Err(nb::Error::Other(Error::Pin(MockError)))
        ));
        assert_eq!(hx711.is_ready(), Err(Error::Pin(MockError)));
        assert_eq!(hx711.read(0), Err(Error::Pin(MockError)));

        // Second chip only sees readiness polls during begin, then fails on its first bit.
        let mut hx711 = Hx711::begin(pin(WORKING), [pin(WORKING), pin(2)], NoDelay, 128).unwrap();
        assert!(matches!(hx711.read_all(), Err(Error::Pin(MockError))));
        assert!(matches!(hx711.read_averages(2), Err(Error::Pin(MockError))));

        // Clock goes low, then fails to rise.
        let mut hx711 = Hx711::single(pin(BEGIN_EDGES + 1), pin(WORKING), NoDelay, 128).unwrap();
        assert_eq!(hx711.power_down(), Err(Error::Pin(MockError)));
    }

    #[test]
    fn release_returns_pins() {
        let bus = SimBus::new([SimChip::new(), SimChip::new()]);
        let hx711 = driver(&bus, 128);

        let (_clock, data, _delay) = hx711.release();
        assert_eq!(data.len(), 2);
    }
}
