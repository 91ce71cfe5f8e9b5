// SPDX-License-Identifier: AGPL-3.0-only

//! Platform services the driver binds against
//!
//! The driver never enumerates buses, maps memory or routes interrupts on its
//! own. A [`PciFunction`] hands it one device's resources as paired
//! acquire/release calls; the lifecycle manager wraps each pair in a guard so
//! every successful acquire is released exactly once.
//!
//! Two implementations ship with the crate:
//! - [`crate::sim::SimFunction`]: in-process edu device model, fault injection
//! - [`crate::vfio::VfioFunction`]: Linux VFIO, real hardware or a QEMU guest

use crate::error::{EduError, Result};
use crate::mmio::RegisterWindow;
use std::fmt::{self, Debug, Display};
use std::str::FromStr;
use std::sync::Arc;

/// PCI vendor/device pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PciId {
    /// Vendor id
    pub vendor: u16,
    /// Device id
    pub device: u16,
}

impl PciId {
    /// The QEMU edu device
    pub const EDU: Self = Self {
        vendor: edu_chip::pcie::QEMU_VENDOR_ID,
        device: edu_chip::pcie::EDU_DEVICE_ID,
    };
}

impl Display for PciId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor, self.device)
    }
}

/// Interrupt delivery mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqMode {
    /// Message-signalled, exclusive to the device
    Msi,
    /// Legacy INTx line, possibly shared with other devices
    Legacy,
}

impl IrqMode {
    /// Whether the line may be shared, so handlers must report `NotMine`.
    pub const fn is_shared(self) -> bool {
        matches!(self, Self::Legacy)
    }
}

impl Display for IrqMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Msi => write!(f, "msi"),
            Self::Legacy => write!(f, "legacy"),
        }
    }
}

impl FromStr for IrqMode {
    type Err = EduError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "msi" => Ok(Self::Msi),
            "legacy" | "intx" => Ok(Self::Legacy),
            other => Err(EduError::invalid_argument(format!(
                "unknown interrupt mode '{other}' (expected msi or legacy)"
            ))),
        }
    }
}

/// Handler verdict, as a kernel's `irqreturn_t`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    /// The interrupt was not raised by this device
    None,
    /// The interrupt was serviced
    Handled,
}

/// Callback installed on an interrupt line
///
/// Runs in interrupt context: it must not block or wait on caller-context locks.
pub trait InterruptHandler: Send + Sync {
    /// Service one assertion of the line.
    fn handle(&self) -> IrqReturn;
}

/// One PCI function offered to the driver
///
/// Acquire calls return `Err` without side effects on failure. Release calls
/// are infallible from the driver's point of view; implementations log their
/// own failures.
pub trait PciFunction: Debug + Send + Sync {
    /// Bus address used in log lines (`0000:00:04.0`)
    fn name(&self) -> &str;

    /// Vendor/device identifiers
    fn id(&self) -> PciId;

    /// Power up and enable decoding.
    ///
    /// # Errors
    ///
    /// `DeviceError` if the function cannot be enabled.
    fn enable(&self) -> Result<()>;

    /// Reverse of [`enable`](Self::enable).
    fn disable(&self);

    /// Allow the function to master the bus.
    fn set_master(&self);

    /// Claim exclusive ownership of BAR `bar`.
    ///
    /// # Errors
    ///
    /// `ResourceUnavailable` if the region is missing or already claimed.
    fn request_region(&self, bar: u32, name: &str) -> Result<()>;

    /// Reverse of [`request_region`](Self::request_region).
    fn release_region(&self, bar: u32);

    /// Map BAR `bar`. The mapping is released when the last handle drops.
    ///
    /// # Errors
    ///
    /// `ResourceUnavailable` if the region cannot be mapped.
    fn map_bar(&self, bar: u32) -> Result<Arc<dyn RegisterWindow>>;

    /// Allocate one interrupt vector; returns its number.
    ///
    /// # Errors
    ///
    /// `ResourceUnavailable` if no vector of this mode is available.
    fn alloc_irq_vectors(&self, mode: IrqMode) -> Result<u32>;

    /// Reverse of [`alloc_irq_vectors`](Self::alloc_irq_vectors).
    fn free_irq_vectors(&self);

    /// Install `handler` on `vector`.
    ///
    /// # Errors
    ///
    /// `ResourceUnavailable` if the line cannot be requested.
    fn request_irq(
        &self,
        vector: u32,
        name: &str,
        shared: bool,
        handler: Arc<dyn InterruptHandler>,
    ) -> Result<()>;

    /// Remove the handler from `vector`. Returns once no invocation is running.
    fn free_irq(&self, vector: u32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn irq_mode_parses() {
        assert_eq!("MSI".parse::<IrqMode>().unwrap(), IrqMode::Msi);
        assert_eq!(" intx ".parse::<IrqMode>().unwrap(), IrqMode::Legacy);
        assert!("msix".parse::<IrqMode>().is_err());
        assert!(IrqMode::Legacy.is_shared());
        assert!(!IrqMode::Msi.is_shared());
    }

    #[test]
    fn pci_id_display() {
        assert_eq!(PciId::EDU.to_string(), "1234:11e8");
    }
}
