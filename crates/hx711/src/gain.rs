/// Channel and gain selection for the *next* conversion.
///
/// The chip has no register for this. After the 24 data bits it counts the extra
/// clock pulses it receives, and that count picks the input for the following
/// conversion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum Gain {
    /// Channel A, gain factor 128.
    #[default]
    A128 = 1,
    /// Channel B, gain factor 32.
    B32 = 2,
    /// Channel A, gain factor 64.
    A64 = 3,
}

impl Gain {
    /// Map a public gain code (128, 64 or 32) to a setting.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            128 => Some(Self::A128),
            64 => Some(Self::A64),
            32 => Some(Self::B32),
            _ => None,
        }
    }

    /// Map a trailing pulse count back to a setting, as the chip does.
    pub fn from_pulses(pulses: u8) -> Option<Self> {
        match pulses {
            1 => Some(Self::A128),
            2 => Some(Self::B32),
            3 => Some(Self::A64),
            _ => None,
        }
    }

    /// Public gain code.
    pub fn code(self) -> u8 {
        match self {
            Self::A128 => 128,
            Self::A64 => 64,
            Self::B32 => 32,
        }
    }

    /// Number of clock pulses to send after the 24 data bits.
    pub fn pulses(self) -> u8 {
        self as u8
    }

    /// Whether this setting samples input channel B.
    pub fn is_channel_b(self) -> bool {
        self == Self::B32
    }
}
