// SPDX-License-Identifier: AGPL-3.0-only

//! Identification register decode.
//!
//! ```text
//!  31      24 23      16 15       8 7        0
//! ┌──────────┬──────────┬──────────┬──────────┐
//! │  major   │  minor   │ reserved │  magic   │
//! └──────────┴──────────┴──────────┴──────────┘
//! ```
//!
//! A QEMU edu device reads `0x010000ed`.

/// Magic constant in bits [7:0].
pub const MAGIC: u8 = 0xed;

/// Major version this model describes.
pub const SUPPORTED_MAJOR: u8 = 1;

const MASK_MAJOR: u32 = 0xff00_0000;
const MASK_MINOR: u32 = 0x00ff_0000;
const MASK_MAGIC: u32 = 0x0000_00ff;
const SHIFT_MAJOR: u32 = 24;
const SHIFT_MINOR: u32 = 16;

/// Decoded identification register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identification {
    /// Major version; must match the driver.
    pub major: u8,
    /// Minor version; informational.
    pub minor: u8,
    /// Magic byte; must equal [`MAGIC`].
    pub magic: u8,
}

/// Reason an identification word was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentMismatch {
    /// Magic byte is not [`MAGIC`].
    Magic(u8),
    /// Magic is right but the major version is not the supported one.
    Version {
        /// Major version found.
        major: u8,
        /// Minor version found.
        minor: u8,
    },
}

impl Identification {
    /// Split a raw register value into its fields.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn decode(raw: u32) -> Self {
        Self {
            major: ((raw & MASK_MAJOR) >> SHIFT_MAJOR) as u8,
            minor: ((raw & MASK_MINOR) >> SHIFT_MINOR) as u8,
            magic: (raw & MASK_MAGIC) as u8,
        }
    }

    /// Re-assemble the register value (reserved bits zero).
    #[must_use]
    pub const fn encode(&self) -> u32 {
        ((self.major as u32) << SHIFT_MAJOR)
            | ((self.minor as u32) << SHIFT_MINOR)
            | self.magic as u32
    }

    /// Check magic first, then the major version.
    ///
    /// # Errors
    ///
    /// Returns the first field that does not match.
    pub const fn check(&self, supported_major: u8) -> Result<(), IdentMismatch> {
        if self.magic != MAGIC {
            return Err(IdentMismatch::Magic(self.magic));
        }
        if self.major != supported_major {
            return Err(IdentMismatch::Version {
                major: self.major,
                minor: self.minor,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_qemu_identification() {
        let id = Identification::decode(0x0100_00ed);
        assert_eq!(id.major, 1);
        assert_eq!(id.minor, 0);
        assert_eq!(id.magic, MAGIC);
        assert_eq!(id.check(SUPPORTED_MAJOR), Ok(()));
        assert_eq!(id.encode(), 0x0100_00ed);
    }

    #[test]
    fn magic_checked_before_version() {
        let id = Identification::decode(0x0200_00ee);
        assert_eq!(id.check(SUPPORTED_MAJOR), Err(IdentMismatch::Magic(0xee)));
    }

    #[test]
    fn wrong_major_rejected_any_minor_accepted() {
        let id = Identification::decode(0x0203_00ed);
        assert_eq!(
            id.check(SUPPORTED_MAJOR),
            Err(IdentMismatch::Version { major: 2, minor: 3 })
        );

        for minor in [0u32, 1, 0x7f, 0xff] {
            let raw = 0x0100_00ed | (minor << 16);
            assert_eq!(Identification::decode(raw).check(SUPPORTED_MAJOR), Ok(()));
        }
    }

    #[test]
    fn reserved_bits_ignored() {
        let id = Identification::decode(0x0100_abed);
        assert_eq!(id.check(SUPPORTED_MAJOR), Ok(()));
    }
}
