// SPDX-License-Identifier: AGPL-3.0-only

//! Userspace driver for the QEMU `edu` PCI device.
//!
//! Binds a device, validates its identification, publishes a control
//! endpoint (`edu0`, `edu1`, ...) and bridges the device interrupt to
//! asynchronous factorial completion.
//!
//! # Platforms
//!
//! ```text
//! SimFunction   : in-process register model, fault injection (tests, CI)
//! VfioFunction  : Linux VFIO: a QEMU guest's edu device from user space
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use edu_driver::sim::{Latency, SimDevice, SimFunction};
//! use edu_driver::EduDriver;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let device = SimDevice::with_latency(Latency::Threaded(Duration::from_millis(1)));
//! let driver = EduDriver::default();
//! let binding = driver.probe(Arc::new(SimFunction::new("0000:00:04.0", device)))?;
//!
//! let session = driver.open(binding.name())?;
//! assert_eq!(session.xor(0)?, u32::MAX);
//! assert_eq!(session.factorial(5)?.wait()?, 120);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod completion;
pub mod config;
mod device;
pub mod discovery;
mod dispatch;
mod error;
mod irq;
mod lifecycle;
pub mod mmio;
pub mod platform;
pub mod sim;
pub mod vfio;

/// Register map and identifiers (re-exported from edu-chip).
pub mod chip {
    pub use edu_chip::ident::{Identification, MAGIC, SUPPORTED_MAJOR};
    pub use edu_chip::ioctl::{Command, FACTORIAL, INTERRUPT, XOR};
    pub use edu_chip::pcie::{lspci_filter, EDU_DEVICE_ID, QEMU_VENDOR_ID};
    pub use edu_chip::regs;
}

pub use completion::FactorialHandle;
pub use config::DriverConfig;
pub use device::{BindState, EduDevice, Session};
pub use dispatch::{FactorialCmd, IntrCmd, XorCmd};
pub use error::{EduError, Result};
pub use irq::IrqOutcome;
pub use lifecycle::{BindReport, Binding, EduDriver};
pub use platform::{InterruptHandler, IrqMode, IrqReturn, PciFunction, PciId};
pub use vfio::VfioFunction;

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        Binding, DriverConfig, EduDevice, EduDriver, EduError, FactorialHandle, IrqMode,
        PciFunction, Result, Session,
    };
}
