// SPDX-License-Identifier: AGPL-3.0-only

//! Runtime device discovery
//!
//! Scans PCI sysfs for functions whose vendor/device ids appear in the edu id
//! table. Nothing is bound here; discovery only reports what a platform could
//! hand to [`crate::EduDriver::probe`].

use crate::error::{EduError, Result};
use crate::platform::PciId;
use std::path::{Path, PathBuf};

/// Default sysfs directory listing PCI functions
pub const SYSFS_PCI_DEVICES: &str = "/sys/bus/pci/devices";

/// A matching PCI function found in sysfs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PciDeviceInfo {
    /// Bus address (`0000:00:04.0`)
    pub address: String,
    /// Vendor/device ids
    pub id: PciId,
    /// Kernel driver currently bound, if any (`vfio-pci`, ...)
    pub driver: Option<String>,
    /// IOMMU group, if the platform has an IOMMU
    pub iommu_group: Option<u32>,
    /// sysfs directory of the function
    pub sysfs_path: PathBuf,
}

impl PciDeviceInfo {
    /// Whether the function is ready to be opened through VFIO
    pub fn is_vfio_bound(&self) -> bool {
        self.driver.as_deref() == Some("vfio-pci")
    }
}

/// Discover edu functions under [`SYSFS_PCI_DEVICES`].
///
/// # Errors
///
/// Returns `Io` if the sysfs directory cannot be read.
pub fn discover() -> Result<Vec<PciDeviceInfo>> {
    scan(Path::new(SYSFS_PCI_DEVICES))
}

/// Discover edu functions under `root`, sorted by bus address.
///
/// Entries with unreadable or malformed id files are skipped.
///
/// # Errors
///
/// Returns `Io` if `root` cannot be read.
pub fn scan(root: &Path) -> Result<Vec<PciDeviceInfo>> {
    tracing::debug!("Scanning {} for edu devices", root.display());

    let mut found = Vec::new();
    for entry in std::fs::read_dir(root)?.flatten() {
        let path = entry.path();

        let (Ok(vendor), Ok(device)) = (
            read_hex_sysfs(&path.join("vendor")),
            read_hex_sysfs(&path.join("device")),
        ) else {
            continue;
        };

        if !edu_chip::pcie::matches(vendor, device) {
            continue;
        }

        let address = entry.file_name().to_string_lossy().to_string();
        let driver = link_name(&path.join("driver"));
        let iommu_group = link_name(&path.join("iommu_group")).and_then(|g| g.parse().ok());

        tracing::info!(
            "Found edu device {address} (driver: {}, iommu group: {})",
            driver.as_deref().unwrap_or("none"),
            iommu_group.map_or_else(|| "none".to_string(), |g: u32| g.to_string())
        );

        found.push(PciDeviceInfo {
            address,
            id: PciId { vendor, device },
            driver,
            iommu_group,
            sysfs_path: path,
        });
    }

    found.sort_by(|a, b| a.address.cmp(&b.address));
    Ok(found)
}

/// IOMMU group number of the function at `address`.
///
/// # Errors
///
/// Returns `DeviceNotFound` if the function does not exist, `DeviceError` if
/// it has no IOMMU group.
pub fn iommu_group(root: &Path, address: &str) -> Result<u32> {
    let device_path = root.join(address);
    if !device_path.exists() {
        return Err(EduError::DeviceNotFound {
            name: address.to_string(),
        });
    }

    link_name(&device_path.join("iommu_group"))
        .and_then(|group| group.parse().ok())
        .ok_or_else(|| {
            EduError::device_error(format!(
                "{address} has no IOMMU group (is the IOMMU enabled?)"
            ))
        })
}

/// Final component of the symlink at `path`.
fn link_name(path: &Path) -> Option<String> {
    let target = std::fs::read_link(path).ok()?;
    target
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
}

/// Read a hexadecimal value from sysfs
fn read_hex_sysfs(path: &Path) -> Result<u16> {
    let content = std::fs::read_to_string(path)?;
    let trimmed = content.trim().trim_start_matches("0x");

    u16::from_str_radix(trimmed, 16).map_err(|e| {
        EduError::invalid_argument(format!("{}: invalid hex value: {e}", path.display()))
    })
}
