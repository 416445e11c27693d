//! Simulated HX711 chips on a shared clock line, for running the driver without hardware.
//!
//! [`SimBus`] holds the chips and a virtual clock in nanoseconds. It hands out pins
//! implementing the `embedded-hal` traits: [`SimClock`] drives the shared clock line,
//! [`SimData`] reads one chip's data line and [`SimDelay`] advances virtual time instead of
//! sleeping. Each chip behaves like the real part:
//!
//! - `DOUT` stays high while a conversion is running and goes low when one is ready.
//! - Each rising clock edge shifts out the next of 24 bits, most significant first.
//! - The number of pulses past the 24th selects channel and gain for the next conversion.
//! - Holding the clock high for 60µs powers the chip down; the falling edge wakes it up,
//!   reset to channel A, gain 128.
//!
//! Values are truncated to 24 bits when shifted out.

use core::cell::RefCell;
use core::convert::Infallible;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType, InputPin, OutputPin};
use heapless::{Deque, Vec};

use crate::{Gain, MAX_CHIPS};

/// Clock high time after which chips power down, in nanoseconds.
pub const POWER_DOWN_NS: u64 = 60_000;

const QUEUE: usize = 64;
const HISTORY: usize = 32;
const TRACE: usize = 128;

/// Values waiting on one analog input. Once drained, the last value is repeated.
#[derive(Debug, Default)]
struct Input {
    queue: Deque<i32, QUEUE>,
    steady: i32,
}

impl Input {
    fn peek(&self) -> i32 {
        self.queue.front().copied().unwrap_or(self.steady)
    }

    fn advance(&mut self) {
        if let Some(value) = self.queue.pop_front() {
            self.steady = value;
        }
    }

    fn extend(&mut self, values: &[i32]) {
        for &value in values {
            if self.queue.push_back(value).is_err() {
                panic!("simulated input holds at most {QUEUE} queued values");
            }
        }
    }
}

/// One simulated chip.
#[derive(Debug, Default)]
pub struct SimChip {
    a: Input,
    b: Input,
    conversion_ns: u64,
    selected: Gain,
    pulses: u8,
    shifting: i32,
    ready_at: u64,
    history: Deque<(Gain, i32), HISTORY>,
}

impl SimChip {
    /// A chip reading 0 on both channels, converting instantly.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue values on channel A.
    pub fn with_values(mut self, values: &[i32]) -> Self {
        self.a.extend(values);
        self
    }

    /// Queue values on channel B.
    pub fn with_channel_b(mut self, values: &[i32]) -> Self {
        self.b.extend(values);
        self
    }

    /// Value repeated on channel A once its queue is empty.
    pub fn with_steady(mut self, value: i32) -> Self {
        self.a.steady = value;
        self
    }

    /// Time from the end of one reading, or from power up, until the next conversion is ready.
    pub fn with_conversion_us(mut self, us: u64) -> Self {
        self.conversion_ns = us * 1_000;
        self.ready_at = self.conversion_ns;
        self
    }

    fn input(&mut self) -> &mut Input {
        if self.selected.is_channel_b() {
            &mut self.b
        } else {
            &mut self.a
        }
    }

    fn rising_edge(&mut self, now: u64) {
        if self.pulses == 0 {
            if now < self.ready_at {
                // Nothing to shift out yet.
                return;
            }

            self.shifting = self.input().peek();
        }

        self.pulses = self.pulses.saturating_add(1);

        if self.pulses == 24 {
            let input = self.input();
            input.advance();

            if self.history.is_full() {
                self.history.pop_front();
            }
            let _ = self.history.push_back((self.selected, self.shifting));
        }
    }

    /// Level of `DOUT`, `true` for high.
    fn dout(&mut self, clock_high: bool, now: u64) -> bool {
        match self.pulses {
            0 => now < self.ready_at,
            pulse @ 1..=24 => (self.shifting >> (24 - pulse)) & 1 == 1,
            _ if clock_high => true,
            extra => {
                // The clock is low after the trailing pulses, so the reading is over.
                if let Some(gain) = Gain::from_pulses(extra - 24) {
                    self.selected = gain;
                }

                self.pulses = 0;
                self.ready_at = now + self.conversion_ns;

                now < self.ready_at
            }
        }
    }

    fn wake(&mut self, now: u64) {
        self.selected = Gain::A128;
        self.pulses = 0;
        self.ready_at = now + self.conversion_ns;
    }
}

#[derive(Debug, Default)]
struct BusState {
    chips: Vec<SimChip, MAX_CHIPS>,
    clock: bool,
    high_since: u64,
    now: u64,
    trace: Deque<bool, TRACE>,
}

impl BusState {
    fn asleep(&self) -> bool {
        self.clock && self.now - self.high_since >= POWER_DOWN_NS
    }

    fn set_clock(&mut self, high: bool) {
        if self.trace.is_full() {
            self.trace.pop_front();
        }
        let _ = self.trace.push_back(high);

        if high == self.clock {
            return;
        }

        let now = self.now;

        if high {
            self.high_since = now;
            self.chips.iter_mut().for_each(|chip| chip.rising_edge(now));
        } else if self.asleep() {
            self.chips.iter_mut().for_each(|chip| chip.wake(now));
        }

        self.clock = high;
    }

    fn data(&mut self, index: usize) -> bool {
        if self.asleep() {
            return true;
        }

        let (clock, now) = (self.clock, self.now);
        self.chips[index].dout(clock, now)
    }
}

/// Simulated chips sharing one clock line.
#[derive(Debug, Default)]
pub struct SimBus {
    state: RefCell<BusState>,
}

impl SimBus {
    /// Panics with more than [`MAX_CHIPS`] chips.
    pub fn new(chips: impl IntoIterator<Item = SimChip>) -> Self {
        let mut state = BusState::default();

        for chip in chips {
            if state.chips.push(chip).is_err() {
                panic!("at most {MAX_CHIPS} simulated chips");
            }
        }

        Self {
            state: RefCell::new(state),
        }
    }

    pub fn clock(&self) -> SimClock<'_> {
        SimClock { bus: self }
    }

    /// Data line of chip `index`. Reading it panics if there is no such chip.
    pub fn data(&self, index: usize) -> SimData<'_> {
        SimData { bus: self, index }
    }

    /// One data line per chip, in order.
    pub fn data_pins(&self) -> impl Iterator<Item = SimData<'_>> {
        (0..self.chips()).map(|index| self.data(index))
    }

    pub fn delay(&self) -> SimDelay<'_> {
        SimDelay { bus: self }
    }

    pub fn chips(&self) -> usize {
        self.state.borrow().chips.len()
    }

    /// Virtual time in nanoseconds.
    pub fn now_ns(&self) -> u64 {
        self.state.borrow().now
    }

    /// Queue more values on channel A of chip `index`.
    pub fn push_values(&self, index: usize, values: &[i32]) {
        self.state.borrow_mut().chips[index].a.extend(values);
    }

    /// Replace the repeated channel A value of chip `index`.
    pub fn set_steady(&self, index: usize, value: i32) {
        self.state.borrow_mut().chips[index].a.steady = value;
    }

    /// Selection the chip will use for its next conversion.
    pub fn selected(&self, index: usize) -> Gain {
        self.state.borrow().chips[index].selected
    }

    /// Selection and value of the latest completely shifted out reading.
    pub fn last_conversion(&self, index: usize) -> Option<(Gain, i32)> {
        self.state.borrow().chips[index].history.back().copied()
    }

    /// Recent shifted out readings of chip `index`, oldest first.
    pub fn history(&self, index: usize) -> Vec<(Gain, i32), HISTORY> {
        self.state.borrow().chips[index].history.iter().copied().collect()
    }

    /// Every level written to the clock line since the last [`SimBus::clear_trace`],
    /// keeping the most recent ones.
    pub fn trace(&self) -> Vec<bool, TRACE> {
        self.state.borrow().trace.iter().copied().collect()
    }

    pub fn clear_trace(&self) {
        self.state.borrow_mut().trace.clear();
    }

    /// `true` while the clock has been held high long enough to power the chips down.
    pub fn is_asleep(&self) -> bool {
        self.state.borrow().asleep()
    }
}

/// Shared clock line of a [`SimBus`].
#[derive(Debug)]
pub struct SimClock<'a> {
    bus: &'a SimBus,
}

impl ErrorType for SimClock<'_> {
    type Error = Infallible;
}

impl OutputPin for SimClock<'_> {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.bus.state.borrow_mut().set_clock(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.bus.state.borrow_mut().set_clock(true);
        Ok(())
    }
}

/// Data line of one chip on a [`SimBus`].
#[derive(Debug)]
pub struct SimData<'a> {
    bus: &'a SimBus,
    index: usize,
}

impl ErrorType for SimData<'_> {
    type Error = Infallible;
}

impl InputPin for SimData<'_> {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.bus.state.borrow_mut().data(self.index))
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.is_high().map(|high| !high)
    }
}

/// Delay that moves the virtual time of a [`SimBus`] forward.
#[derive(Debug)]
pub struct SimDelay<'a> {
    bus: &'a SimBus,
}

impl DelayNs for SimDelay<'_> {
    fn delay_ns(&mut self, ns: u32) {
        self.bus.state.borrow_mut().now += u64::from(ns);
    }
}
