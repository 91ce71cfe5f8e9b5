// SPDX-License-Identifier: AGPL-3.0-only

//! edu device instance and exclusive sessions
//!
//! An [`EduDevice`] is created by the lifecycle manager once BAR0 is mapped
//! and lives until the last [`Session`] referring to it is gone. Its register
//! window, however, is only valid between bind and unbind: afterwards every
//! operation fails with `NotReady`.
//!
//! At most one [`Session`] exists per device. Dropping (or closing) it
//! releases exclusivity.

use crate::completion::FactorialSlot;
use crate::error::{EduError, Result};
use crate::mmio::RegisterWindow;
use edu_chip::ident::Identification;
use edu_chip::regs;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

/// Lifecycle state of a device binding
///
/// Forward transitions each acquire one resource; teardown walks back to
/// [`BindState::Unbound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum BindState {
    /// No resources held
    Unbound = 0,
    /// Function enabled and bus mastering on
    Enabled = 1,
    /// BAR0 claimed
    RegionClaimed = 2,
    /// BAR0 mapped
    Mapped = 3,
    /// Identification accepted
    VersionChecked = 4,
    /// Interrupt vector allocated and handler installed
    InterruptArmed = 5,
    /// Control endpoint published; operations accepted
    Ready = 6,
    /// Unbind in progress
    TearingDown = 7,
}

impl BindState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Enabled,
            2 => Self::RegionClaimed,
            3 => Self::Mapped,
            4 => Self::VersionChecked,
            5 => Self::InterruptArmed,
            6 => Self::Ready,
            7 => Self::TearingDown,
            _ => Self::Unbound,
        }
    }
}

impl fmt::Display for BindState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Counters for interrupts the bridge did not attribute to a factorial
#[derive(Debug, Default)]
pub(crate) struct RaisedStats {
    pub(crate) count: AtomicU64,
    pub(crate) last_status: AtomicU32,
}

/// Bound edu device
pub struct EduDevice {
    pci_name: String,
    index: OnceLock<u32>,
    state: AtomicU8,
    window: RwLock<Option<Arc<dyn RegisterWindow>>>,
    open_count: Mutex<u32>,
    pub(crate) factorial: FactorialSlot,
    pub(crate) raised: RaisedStats,
}

impl fmt::Debug for EduDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EduDevice")
            .field("pci_name", &self.pci_name)
            .field("index", &self.index.get())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl EduDevice {
    /// Device with no resources yet; register access is `NotReady` until
    /// [`EduDevice::map`].
    pub(crate) fn new(pci_name: &str) -> Self {
        Self {
            pci_name: pci_name.to_string(),
            index: OnceLock::new(),
            state: AtomicU8::new(BindState::Unbound as u8),
            window: RwLock::new(None),
            open_count: Mutex::new(0),
            factorial: FactorialSlot::default(),
            raised: RaisedStats::default(),
        }
    }

    /// PCI bus address of the underlying function
    pub fn pci_name(&self) -> &str {
        &self.pci_name
    }

    /// Endpoint index, assigned when the device became visible to callers
    pub fn index(&self) -> Option<u32> {
        self.index.get().copied()
    }

    pub(crate) fn set_index(&self, index: u32) {
        if self.index.set(index).is_err() {
            tracing::warn!("{}: endpoint index already assigned", self.pci_name);
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> BindState {
        BindState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: BindState) {
        let previous = BindState::from_u8(self.state.swap(state as u8, Ordering::AcqRel));
        tracing::debug!("{}: {previous} -> {state}", self.pci_name);
    }

    /// Whether a session currently holds the device open
    pub fn is_open(&self) -> bool {
        *self.open_count.lock().unwrap_or_else(PoisonError::into_inner) != 0
    }

    /// Run `f` against the register window.
    ///
    /// # Errors
    ///
    /// `NotReady` once the window has been unmapped.
    pub(crate) fn with_window<R>(&self, f: impl FnOnce(&dyn RegisterWindow) -> R) -> Result<R> {
        let window = self.window.read().unwrap_or_else(PoisonError::into_inner);
        match window.as_ref() {
            Some(window) => Ok(f(window.as_ref())),
            None => Err(EduError::NotReady),
        }
    }

    /// Install the mapped BAR and enter [`BindState::Mapped`].
    pub(crate) fn map(&self, window: Arc<dyn RegisterWindow>) {
        *self.window.write().unwrap_or_else(PoisonError::into_inner) = Some(window);
        self.set_state(BindState::Mapped);
    }

    /// Drop the register window. Called once, on teardown.
    pub(crate) fn unmap(&self) {
        let window = self
            .window
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if window.is_some() {
            tracing::debug!("{}: register window released", self.pci_name);
        }
    }

    /// Read and validate the identification register.
    ///
    /// # Errors
    ///
    /// `InvalidDevice` on a magic mismatch, `UnsupportedVersion` on a major
    /// version other than `supported_major`.
    pub(crate) fn check_identity(&self, supported_major: u8) -> Result<Identification> {
        let raw = self.with_window(|w| w.read32(regs::IDENT))?;
        let ident = Identification::decode(raw);

        match ident.check(supported_major) {
            Ok(()) => {
                tracing::info!("{}: major {} minor {}", self.pci_name, ident.major, ident.minor);
                Ok(ident)
            }
            Err(edu_chip::ident::IdentMismatch::Magic(magic)) => {
                tracing::error!("{}: magic ({magic:#x}) is wrong, aborting", self.pci_name);
                Err(EduError::InvalidDevice { magic })
            }
            Err(edu_chip::ident::IdentMismatch::Version { major, minor }) => {
                tracing::error!(
                    "{}: only major version {supported_major} is supported ({major}), aborting",
                    self.pci_name
                );
                Err(EduError::UnsupportedVersion { major, minor })
            }
        }
    }

    /// Open an exclusive session.
    ///
    /// # Errors
    ///
    /// `NotReady` unless the device is `Ready`; `Busy` if a session is already open.
    pub fn open(self: &Arc<Self>) -> Result<Session> {
        if self.state() != BindState::Ready {
            return Err(EduError::NotReady);
        }

        let mut open_count = self.open_count.lock().unwrap_or_else(PoisonError::into_inner);
        if *open_count != 0 {
            return Err(EduError::busy(format!("{} already open", self.pci_name)));
        }
        *open_count = 1;
        drop(open_count);

        tracing::debug!("{}: opened", self.pci_name);
        Ok(Session {
            device: Arc::clone(self),
        })
    }

    fn release(&self) {
        *self.open_count.lock().unwrap_or_else(PoisonError::into_inner) = 0;
        tracing::debug!("{}: closed", self.pci_name);
    }

    /// Fail with `NotReady` unless the device accepts operations.
    pub(crate) fn ensure_ready(&self) -> Result<()> {
        if self.state() == BindState::Ready {
            Ok(())
        } else {
            Err(EduError::NotReady)
        }
    }
}

/// Exclusive caller session on one device
///
/// Obtained from [`EduDevice::open`] or [`crate::EduDriver::open`]; the
/// control operations live in the dispatcher (`xor`, `factorial`,
/// `raise_interrupt`, `ioctl`).
#[derive(Debug)]
pub struct Session {
    pub(crate) device: Arc<EduDevice>,
}

impl Session {
    /// Device this session is bound to
    pub fn device(&self) -> &Arc<EduDevice> {
        &self.device
    }

    /// Release exclusivity. Equivalent to dropping the session.
    pub fn close(self) {
        drop(self);
    }

    /// Number of interrupts not attributed to a factorial, and the last raw
    /// interrupt status seen for one.
    pub fn raised_interrupts(&self) -> (u64, u32) {
        (
            self.device.raised.count.load(Ordering::Acquire),
            self.device.raised.last_status.load(Ordering::Acquire),
        )
    }

    /// Most recent factorial result delivered by the interrupt bridge.
    pub fn last_factorial(&self) -> Option<u32> {
        self.device.factorial.last_result()
    }

    /// Whether a factorial is armed and not yet completed.
    pub fn factorial_in_flight(&self) -> bool {
        self.device.factorial.in_flight()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.device.release();
    }
}
