// SPDX-License-Identifier: AGPL-3.0-only

//! Driver configuration
//!
//! Defaults describe a QEMU edu device with MSI. Environment variables
//! override them at bind time:
//!
//! | Variable | Values | Default |
//! |----------|--------|---------|
//! | `EDU_IRQ_MODE` | `msi`, `legacy` | `msi` |
//! | `EDU_SUPPORTED_MAJOR` | `0`-`255` | `1` |

use crate::error::{EduError, Result};
use crate::platform::IrqMode;

/// Lifecycle manager configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Interrupt delivery mode requested from the platform
    pub irq_mode: IrqMode,
    /// Major version accepted in the identification register
    pub supported_major: u8,
    /// BAR holding the register window
    pub bar: u32,
    /// Prefix of control endpoint names (`edu` gives `edu0`, `edu1`, ...)
    pub endpoint_prefix: String,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            irq_mode: IrqMode::Msi,
            supported_major: edu_chip::ident::SUPPORTED_MAJOR,
            bar: edu_chip::pcie::REGS_BAR,
            endpoint_prefix: "edu".to_string(),
        }
    }
}

impl DriverConfig {
    /// Defaults overridden from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if a variable is set to an unparsable value.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden through an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if a value cannot be parsed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(mode) = lookup("EDU_IRQ_MODE") {
            config.irq_mode = mode.parse()?;
        }

        if let Some(major) = lookup("EDU_SUPPORTED_MAJOR") {
            config.supported_major = major.trim().parse().map_err(|e| {
                EduError::invalid_argument(format!("EDU_SUPPORTED_MAJOR={major}: {e}"))
            })?;
        }

        tracing::debug!("Driver config: {config:?}");
        Ok(config)
    }

    /// Use `mode` for interrupt delivery.
    #[must_use]
    pub fn with_irq_mode(mut self, mode: IrqMode) -> Self {
        self.irq_mode = mode;
        self
    }

    /// Endpoint name for device `index`.
    pub fn endpoint_name(&self, index: u32) -> String {
        format!("{}{index}", self.endpoint_prefix)
    }
}
