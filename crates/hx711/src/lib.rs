//! Provides a driver for the Avia Semiconductor HX711 load cell ADC via the `embedded-hal` ecosystem.
//!
//! The HX711 has no bus peripheral: the host bit-bangs a clock line (`PD_SCK`) and samples one
//! data line (`DOUT`) per chip. Several chips may share one clock line and are then read in
//! parallel, bit by bit, on the same clock edges.
//!
//! Reads block until every configured chip signals a finished conversion. There is no timeout;
//! use [`Hx711::try_read`] or [`Hx711::try_read_all`] to poll on your own schedule instead.

#![no_std]
#![forbid(unsafe_code)]

mod gain;
mod hx711;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use gain::Gain;
pub use hx711::Hx711;

/// Maximum number of chips sharing one clock line.
pub const MAX_CHIPS: usize = 8;

/// Clock high and low phase duration in microseconds.
/// The chip needs at least 0.2µs per phase and powers down after 60µs high.
pub const PULSE_US: u32 = 1;

/// Pause between readiness polls, and between the reads of an average, in microseconds.
pub const POLL_US: u32 = 100;

/// One reading per configured chip, in data pin order.
pub type Readings = heapless::Vec<i32, MAX_CHIPS>;

/// Driver errors. `E` is the pin error type.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error<E> {
    /// A clock or data pin operation failed.
    #[error("pin error: {0:?}")]
    Pin(E),
    /// No data pins were given.
    #[error("no data pins configured")]
    NoChips,
    /// More data pins were given than one clock line can drive.
    #[error("{0} data pins configured, at most {max} supported", max = MAX_CHIPS)]
    TooManyChips(usize),
    /// Channel index has no chip behind it.
    #[error("no chip on channel {0}")]
    UnknownChannel(usize),
    /// An average over zero readings was requested.
    #[error("cannot average zero readings")]
    NoSamples,
}

/// Compose the three bytes shifted out by the chip, most significant first, into an [`i32`].
/// Bit 23 is replicated into a filler byte to sign-extend the 24 bit two's-complement value.
pub(crate) fn decode(data: [u8; 3]) -> i32 {
    let filler = if data[0] & 0x80 != 0 { 0xFF } else { 0x00 };

    i32::from_be_bytes([filler, data[0], data[1], data[2]])
}
