// SPDX-License-Identifier: AGPL-3.0-only

//! Silicon model for the QEMU `edu` educational PCI device.
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! pure model of the device: register offsets, bit fields, the identification
//! word, PCI identifiers, and the control-command numbers shared between the
//! driver and its callers.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`pcie`] | Vendor/device IDs, BAR index and size |
//! | [`regs`] | BAR0 register map, status and interrupt bits, DMA command encoding |
//! | [`ident`] | Identification register decode (major/minor/magic) |
//! | [`ioctl`] | Control-command numbers and their request layouts |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod ident;
pub mod ioctl;
pub mod pcie;
pub mod regs;
