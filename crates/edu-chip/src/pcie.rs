// SPDX-License-Identifier: AGPL-3.0-only

//! PCI identifiers and BAR layout.
//!
//! ```text
//! BAR  Size    Type                  Purpose
//! ──── ─────── ───────────────────── ─────────────────────────────
//!  0   1 MB    32-bit non-prefetch   Register space (MMIO)
//! ```

/// QEMU vendor ID.
pub const QEMU_VENDOR_ID: u16 = 0x1234;

/// edu device ID (`lspci: 1234:11e8`).
pub const EDU_DEVICE_ID: u16 = 0x11e8;

/// `(vendor, device)` pairs the driver binds to.
pub const ID_TABLE: &[(u16, u16)] = &[(QEMU_VENDOR_ID, EDU_DEVICE_ID)];

/// BAR holding the register window.
pub const REGS_BAR: u32 = 0;

/// Size of BAR0 in bytes.
pub const REGS_BAR_SIZE: usize = 1024 * 1024;

/// Region name used when claiming BAR0.
pub const REGION_NAME: &str = "edu-bar0";

/// Name used when requesting the interrupt line.
pub const IRQ_NAME: &str = "edu-irq";

/// Whether `(vendor, device)` appears in [`ID_TABLE`].
#[must_use]
pub fn matches(vendor: u16, device: u16) -> bool {
    ID_TABLE.iter().any(|&(v, d)| v == vendor && d == device)
}

/// Format a `vendor:device` string for use with `lspci -d`.
#[must_use]
pub fn lspci_filter() -> String {
    format!("{QEMU_VENDOR_ID:04x}:{EDU_DEVICE_ID:04x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_table_matches_edu_only() {
        assert!(matches(0x1234, 0x11e8));
        assert!(!matches(0x1234, 0x1111));
        assert!(!matches(0x1e7c, 0x11e8));
        assert_eq!(lspci_filter(), "1234:11e8");
    }
}
