//! Chip family identification (spec.md §3, §6).

use strum::Display;

/// The chip-magic register all supported families expose.
pub const CHIP_MAGIC_REGISTER: u32 = 0x4000_1000;

/// A recognized Espressif chip family.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Display)]
#[non_exhaustive]
pub enum Chip {
    Esp32,
    #[strum(serialize = "ESP32-S2")]
    Esp32S2,
    #[strum(serialize = "ESP32-S3")]
    Esp32S3,
    #[strum(serialize = "ESP32-C3")]
    Esp32C3,
    #[strum(serialize = "ESP32-C6")]
    Esp32C6,
    #[strum(serialize = "ESP32-H2")]
    Esp32H2,
    Esp8266,
}

impl Chip {
    /// Resolve the value read back from [`CHIP_MAGIC_REGISTER`] to a chip
    /// family, or `None` if it matches none of the known values.
    pub fn from_magic(magic: u32) -> Option<Self> {
        match magic {
            0x00F0_1D83 => Some(Chip::Esp32),
            0x0000_07C6 => Some(Chip::Esp32S2),
            0x0000_0009 => Some(Chip::Esp32S3),
            0x6921_506F => Some(Chip::Esp32C3),
            0x2CE0_806F => Some(Chip::Esp32C6),
            0xCA02_C06F => Some(Chip::Esp32H2),
            0xFFF0_C101 => Some(Chip::Esp8266),
            _ => None,
        }
    }

    /// The magic value this chip reports on [`CHIP_MAGIC_REGISTER`].
    pub fn magic(self) -> u32 {
        match self {
            Chip::Esp32 => 0x00F0_1D83,
            Chip::Esp32S2 => 0x0000_07C6,
            Chip::Esp32S3 => 0x0000_0009,
            Chip::Esp32C3 => 0x6921_506F,
            Chip::Esp32C6 => 0x2CE0_806F,
            Chip::Esp32H2 => 0xCA02_C06F,
            Chip::Esp8266 => 0xFFF0_C101,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s4_chip_detection() {
        assert_eq!(Chip::from_magic(0x00F0_1D83), Some(Chip::Esp32));
        assert_eq!(Chip::from_magic(0xDEAD_BEEF), None);
    }

    #[test]
    fn magic_round_trips_through_from_magic() {
        for chip in [
            Chip::Esp32,
            Chip::Esp32S2,
            Chip::Esp32S3,
            Chip::Esp32C3,
            Chip::Esp32C6,
            Chip::Esp32H2,
            Chip::Esp8266,
        ] {
            assert_eq!(Chip::from_magic(chip.magic()), Some(chip));
        }
    }
}
