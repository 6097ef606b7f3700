/// Baud rate of a serial MIDI link, fixed by the MIDI 1.0 electrical specification.
pub const MIDI_BAUD_RATE: u32 = 31_250;

/// Number of data bits per character.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataBits {
    /// Seven data bits.
    Seven = 7,
    /// Eight data bits.
    #[default]
    Eight = 8,
    /// Nine data bits.
    Nine = 9,
}

/// Number of stop bits per character.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StopBits {
    /// One stop bit.
    #[default]
    One = 1,
    /// Two stop bits.
    Two = 2,
}

/// Parity checking.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Parity {
    /// No parity bit.
    #[default]
    None,
    /// Even parity.
    Even,
    /// Odd parity.
    Odd,
}

/// Framing for the UART behind a serial MIDI port. The default is what every MIDI device speaks: 31,250 baud,
/// 8 data bits, no parity, 1 stop bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UartConfig {
    /// Bits per second.
    pub baud_rate: u32,
    /// Data bits per character.
    pub data_bits: DataBits,
    /// Stop bits per character.
    pub stop_bits: StopBits,
    /// Parity checking.
    pub parity: Parity,
}

impl Default for UartConfig {
    fn default() -> Self {
        Self::MIDI
    }
}

impl UartConfig {
    /// Standard MIDI framing.
    pub const MIDI: Self = Self {
        baud_rate: MIDI_BAUD_RATE,
        data_bits: DataBits::Eight,
        stop_bits: StopBits::One,
        parity: Parity::None,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_midi_framing() {
        let config = UartConfig::default();
        assert_eq!(31_250, config.baud_rate, "Expected left but got right");
        assert_eq!(DataBits::Eight, config.data_bits, "Expected left but got right");
        assert_eq!(StopBits::One, config.stop_bits, "Expected left but got right");
        assert_eq!(Parity::None, config.parity, "Expected left but got right");
    }
}
