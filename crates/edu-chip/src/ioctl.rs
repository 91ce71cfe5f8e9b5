// SPDX-License-Identifier: AGPL-3.0-only

//! Control-command numbers.
//!
//! Numbers follow the Linux `_IOC` layout so a character-device front end can
//! pass them straight through:
//!
//! ```text
//!  31 30 29            16 15        8 7         0
//! ┌─────┬────────────────┬───────────┬───────────┐
//! │ dir │      size      │   group   │  number   │
//! └─────┴────────────────┴───────────┴───────────┘
//! ```
//!
//! The size field carries the size of a *pointer* to the request, matching
//! the C header. Callers built against that header agree with these values
//! on the same architecture.

/// Command group (`EDU_MAJOR` in the C header).
pub const GROUP: u8 = 0xD0;

const NR_BITS: u32 = 8;
const TYPE_BITS: u32 = 8;
const SIZE_BITS: u32 = 14;

const NR_SHIFT: u32 = 0;
const TYPE_SHIFT: u32 = NR_SHIFT + NR_BITS;
const SIZE_SHIFT: u32 = TYPE_SHIFT + TYPE_BITS;
const DIR_SHIFT: u32 = SIZE_SHIFT + SIZE_BITS;

/// Caller writes the argument.
pub const DIR_WRITE: u32 = 1;
/// Caller reads the argument back.
pub const DIR_READ: u32 = 2;

/// Build a command number: `_IOC(dir, ty, nr, size)`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn ioc(dir: u32, ty: u8, nr: u8, size: usize) -> u32 {
    (dir << DIR_SHIFT)
        | ((size as u32) << SIZE_SHIFT)
        | ((ty as u32) << TYPE_SHIFT)
        | ((nr as u32) << NR_SHIFT)
}

const ARG_SIZE: usize = core::mem::size_of::<usize>();

/// `_IOWR(GROUP, 0, struct edu_xor_cmd *)`
pub const XOR: u32 = ioc(DIR_READ | DIR_WRITE, GROUP, 0, ARG_SIZE);
/// `_IOWR(GROUP, 1, struct edu_factorial_cmd *)`
pub const FACTORIAL: u32 = ioc(DIR_READ | DIR_WRITE, GROUP, 1, ARG_SIZE);
/// `_IOW(GROUP, 2, struct edu_intr_cmd *)`
pub const INTERRUPT: u32 = ioc(DIR_WRITE, GROUP, 2, ARG_SIZE);

/// Control command selected by a command number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// XOR liveness transform.
    Xor,
    /// Arm a factorial computation.
    Factorial,
    /// Force a software interrupt.
    Interrupt,
}

impl Command {
    /// Look up a command number. Unknown numbers yield `None`.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            XOR => Some(Self::Xor),
            FACTORIAL => Some(Self::Factorial),
            INTERRUPT => Some(Self::Interrupt),
            _ => None,
        }
    }

    /// Command number.
    #[must_use]
    pub const fn raw(self) -> u32 {
        match self {
            Self::Xor => XOR,
            Self::Factorial => FACTORIAL,
            Self::Interrupt => INTERRUPT,
        }
    }

    /// Size in bytes of the request structure this command exchanges.
    #[must_use]
    pub const fn request_len(self) -> usize {
        match self {
            Self::Xor | Self::Factorial => 8,
            Self::Interrupt => 4,
        }
    }
}
