// SPDX-License-Identifier: AGPL-3.0-only

//! BAR0 register map for the edu device.
//!
//! All registers are 32 bits wide and accessed at their natural alignment.
//! The DMA descriptor registers are 64-bit slots; the driver never issues a
//! transfer, they are listed so the whole register surface is named.
//!
//! ```text
//! 0x00  IDENT       RO  0xMMmm00ed  major, minor, magic
//! 0x04  XOR         RW  value inversion (liveness check)
//! 0x08  FACTORIAL   RW  write arms, read returns the result
//! 0x20  STATUS      RW  bit0 computing, bit7 irq on completion
//! 0x24  INTR_STATUS RO  pending interrupt causes
//! 0x60  INTR_RAISE  WO  OR value into INTR_STATUS, raise irq
//! 0x64  INTR_ACK    WO  clear value from INTR_STATUS, lower irq
//! 0x80  DMA_SRC     RW
//! 0x88  DMA_DEST    RW
//! 0x90  DMA_CNT     RW
//! 0x98  DMA_CMD     RW
//! ```

// ── Identity ─────────────────────────────────────────────────────────────────

/// Identification register (major, minor, magic).
pub const IDENT: usize = 0x00;

// ── Compute ──────────────────────────────────────────────────────────────────

/// XOR register. Reading returns the bitwise inverse of the last write.
pub const XOR: usize = 0x04;
/// Factorial register. Writing arms a computation.
pub const FACTORIAL: usize = 0x08;

// ── Status ───────────────────────────────────────────────────────────────────

/// Device status register.
pub const STATUS: usize = 0x20;

// ── Interrupts ───────────────────────────────────────────────────────────────

/// Interrupt status register; non-zero while a condition is unacknowledged.
pub const INTR_STATUS: usize = 0x24;
/// Interrupt raise register.
pub const INTR_RAISE: usize = 0x60;
/// Interrupt acknowledge register.
pub const INTR_ACK: usize = 0x64;

// ── DMA descriptor ───────────────────────────────────────────────────────────

/// DMA source address.
pub const DMA_SRC: usize = 0x80;
/// DMA destination address.
pub const DMA_DEST: usize = 0x88;
/// DMA transfer count in bytes.
pub const DMA_CNT: usize = 0x90;
/// DMA command register.
pub const DMA_CMD: usize = 0x98;

/// Status register bit definitions.
pub mod status {
    /// Factorial computation in progress.
    pub const COMPUTING: u32 = 1 << 0;
    /// Raise an interrupt when the factorial completes.
    pub const RAISE_IRQ: u32 = 1 << 7;
}

/// Interrupt cause bits reported in `INTR_STATUS` by the device itself.
pub mod intr {
    /// Factorial computation finished.
    pub const FACTORIAL_DONE: u32 = 0x0000_0001;
    /// DMA transfer finished.
    pub const DMA_DONE: u32 = 0x0000_0100;
}

/// DMA command register bit definitions.
pub mod dma {
    /// Start the transfer.
    pub const START: u32 = 1 << 0;
    /// Direction: device to host RAM. Clear means host RAM to device.
    pub const DIR_TO_RAM: u32 = 1 << 1;
    /// Raise an interrupt when the transfer completes.
    pub const RAISE_IRQ: u32 = 1 << 2;
}

/// Transfer direction encoded in the DMA command register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaDirection {
    /// Host memory into the device buffer.
    ToDevice,
    /// Device buffer into host memory.
    ToRam,
}

/// DMA command word.
///
/// Only the encoding lives here; nothing in the driver starts a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaCommand {
    /// Transfer direction.
    pub direction: DmaDirection,
    /// Raise an interrupt on completion.
    pub raise_irq: bool,
}

impl DmaCommand {
    /// Encode as the value written to [`DMA_CMD`], including the start bit.
    #[must_use]
    pub const fn encode(&self) -> u32 {
        let mut value = dma::START;
        if matches!(self.direction, DmaDirection::ToRam) {
            value |= dma::DIR_TO_RAM;
        }
        if self.raise_irq {
            value |= dma::RAISE_IRQ;
        }
        value
    }

    /// Decode a command register value. Returns `None` if the start bit is clear.
    #[must_use]
    pub const fn decode(value: u32) -> Option<Self> {
        if value & dma::START == 0 {
            return None;
        }
        let direction = if value & dma::DIR_TO_RAM != 0 {
            DmaDirection::ToRam
        } else {
            DmaDirection::ToDevice
        };
        Some(Self {
            direction,
            raise_irq: value & dma::RAISE_IRQ != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_offsets_non_overlapping() {
        let all = [
            IDENT, XOR, FACTORIAL, STATUS, INTR_STATUS, INTR_RAISE, INTR_ACK, DMA_SRC, DMA_DEST,
            DMA_CNT, DMA_CMD,
        ];
        for (i, a) in all.iter().enumerate() {
            assert_eq!(a % 4, 0, "offset {a:#x} not word aligned");
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn dma_command_bits() {
        let cmd = DmaCommand {
            direction: DmaDirection::ToRam,
            raise_irq: true,
        };
        assert_eq!(cmd.encode(), 0x7);
        assert_eq!(DmaCommand::decode(0x7), Some(cmd));

        let to_dev = DmaCommand {
            direction: DmaDirection::ToDevice,
            raise_irq: false,
        };
        assert_eq!(to_dev.encode(), dma::START);
        assert_eq!(DmaCommand::decode(0x6), None);
    }
}
