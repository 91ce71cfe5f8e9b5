// SPDX-License-Identifier: AGPL-3.0-only

//! VFIO platform: drive a real edu function from user space
//!
//! [`VfioFunction`] implements [`PciFunction`] over Linux VFIO so the same
//! lifecycle manager that binds the simulated device binds a QEMU guest's
//! edu device.
//!
// FFI/ioctl casts are intentional - VFIO API requires specific types
#![allow(clippy::cast_possible_truncation)]
//! # Requirements
//!
//! 1. IOMMU enabled (`intel_iommu=on`, or QEMU with `-device intel-iommu`);
//!    `vfio.enable_unsafe_noiommu_mode=1` also works inside a guest
//! 2. Function bound to `vfio-pci` (see [`bind_to_vfio`])
//! 3. Read/write access to `/dev/vfio/$IOMMU_GROUP`
//!
//! # Interrupts
//!
//! ```text
//! device ──▶ vfio-pci ──▶ eventfd ──▶ dispatcher thread ──▶ InterruptHandler
//!                                            │
//!                                  (INTx) unmask line
//! ```
//!
//! VFIO masks an INTx line each time it fires; the dispatcher unmasks it
//! after the handler returns. MSI needs no unmask.

use crate::error::{EduError, Result};
use crate::mmio::{MappedRegion, RegisterWindow};
use crate::platform::{InterruptHandler, IrqMode, IrqReturn, PciFunction, PciId};
use rustix::event::{eventfd, poll, EventfdFlags, PollFd, PollFlags};
use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

/// VFIO ioctl numbers (from Linux kernel headers)
///
/// These are calculated as: _IO(';', base + offset)
/// where _IO is: ((type as u64) << 8) | nr
mod ioctls {
    use std::os::raw::c_ulong;

    /// Helper to create ioctl number: _IO(type, nr) = (type << 8) | nr
    const fn io(ty: u8, nr: u8) -> c_ulong {
        ((ty as c_ulong) << 8) | (nr as c_ulong)
    }

    pub const VFIO_TYPE: u8 = b';';
    pub const VFIO_BASE: u8 = 100;

    // Container
    pub const VFIO_GET_API_VERSION: c_ulong = io(VFIO_TYPE, VFIO_BASE);
    pub const VFIO_CHECK_EXTENSION: c_ulong = io(VFIO_TYPE, VFIO_BASE + 1);
    pub const VFIO_SET_IOMMU: c_ulong = io(VFIO_TYPE, VFIO_BASE + 2);

    // Group
    pub const VFIO_GROUP_GET_STATUS: c_ulong = io(VFIO_TYPE, VFIO_BASE + 3);
    pub const VFIO_GROUP_SET_CONTAINER: c_ulong = io(VFIO_TYPE, VFIO_BASE + 4);
    pub const VFIO_GROUP_GET_DEVICE_FD: c_ulong = io(VFIO_TYPE, VFIO_BASE + 6);

    // Device
    pub const VFIO_DEVICE_GET_INFO: c_ulong = io(VFIO_TYPE, VFIO_BASE + 7);
    pub const VFIO_DEVICE_GET_REGION_INFO: c_ulong = io(VFIO_TYPE, VFIO_BASE + 8);
    pub const VFIO_DEVICE_GET_IRQ_INFO: c_ulong = io(VFIO_TYPE, VFIO_BASE + 9);
    pub const VFIO_DEVICE_SET_IRQS: c_ulong = io(VFIO_TYPE, VFIO_BASE + 10);

    pub const VFIO_API_VERSION: i32 = 0;
    pub const VFIO_TYPE1V2_IOMMU: u32 = 3;
    pub const VFIO_NOIOMMU_IOMMU: u32 = 8;

    pub const VFIO_GROUP_FLAGS_VIABLE: u32 = 1 << 0;

    pub const VFIO_REGION_INFO_FLAG_MMAP: u32 = 1 << 2;

    pub const VFIO_IRQ_SET_DATA_NONE: u32 = 1 << 0;
    pub const VFIO_IRQ_SET_DATA_EVENTFD: u32 = 1 << 2;
    pub const VFIO_IRQ_SET_ACTION_UNMASK: u32 = 1 << 4;
    pub const VFIO_IRQ_SET_ACTION_TRIGGER: u32 = 1 << 5;

    pub const VFIO_PCI_INTX_IRQ_INDEX: u32 = 0;
    pub const VFIO_PCI_MSI_IRQ_INDEX: u32 = 1;
    pub const VFIO_PCI_CONFIG_REGION_INDEX: u32 = 7;
}

/// PCI command register and its bits
mod command {
    pub const OFFSET: u64 = 0x04;
    pub const MEMORY: u16 = 1 << 1;
    pub const MASTER: u16 = 1 << 2;
}

#[repr(C)]
#[derive(Debug, Default)]
struct VfioGroupStatus {
    argsz: u32,
    flags: u32,
}

#[repr(C)]
#[derive(Debug, Default)]
struct VfioDeviceInfo {
    argsz: u32,
    flags: u32,
    num_regions: u32,
    num_irqs: u32,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct VfioRegionInfo {
    argsz: u32,
    flags: u32,
    index: u32,
    cap_offset: u32,
    size: u64,
    offset: u64,
}

#[repr(C)]
#[derive(Debug, Default)]
struct VfioIrqInfo {
    argsz: u32,
    flags: u32,
    index: u32,
    count: u32,
}

/// `vfio_irq_set` carrying at most one eventfd
#[repr(C)]
#[derive(Debug, Default)]
struct VfioIrqSet {
    argsz: u32,
    flags: u32,
    index: u32,
    start: u32,
    count: u32,
    fd: i32,
}

impl VfioIrqSet {
    const HEADER: u32 = 5 * 4;

    const fn trigger(index: u32, fd: i32) -> Self {
        Self {
            argsz: std::mem::size_of::<Self>() as u32,
            flags: ioctls::VFIO_IRQ_SET_DATA_EVENTFD | ioctls::VFIO_IRQ_SET_ACTION_TRIGGER,
            index,
            start: 0,
            count: 1,
            fd,
        }
    }

    const fn disable(index: u32) -> Self {
        Self {
            argsz: Self::HEADER,
            flags: ioctls::VFIO_IRQ_SET_DATA_NONE | ioctls::VFIO_IRQ_SET_ACTION_TRIGGER,
            index,
            start: 0,
            count: 0,
            fd: -1,
        }
    }

    const fn unmask(index: u32) -> Self {
        Self {
            argsz: Self::HEADER,
            flags: ioctls::VFIO_IRQ_SET_DATA_NONE | ioctls::VFIO_IRQ_SET_ACTION_UNMASK,
            index,
            start: 0,
            count: 1,
            fd: -1,
        }
    }
}

fn last_os_error(what: &str) -> EduError {
    EduError::device_error(format!("{what}: {}", std::io::Error::last_os_error()))
}

fn set_irqs(device: &File, set: &VfioIrqSet) -> Result<()> {
    // SAFETY: VFIO_DEVICE_SET_IRQS reads `argsz` bytes from `set`. Invariants:
    // (1) device fd valid for the lifetime of `device`; (2) argsz never exceeds
    // size_of::<VfioIrqSet>(); (3) layout matches struct vfio_irq_set plus one s32.
    let ret = unsafe {
        libc::ioctl(
            device.as_raw_fd(),
            ioctls::VFIO_DEVICE_SET_IRQS as _,
            std::ptr::from_ref(set),
        )
    };
    if ret < 0 {
        return Err(last_os_error("VFIO_DEVICE_SET_IRQS"));
    }
    Ok(())
}

/// Interrupt vector allocated but not yet wired to a handler
#[derive(Debug)]
struct Vector {
    index: u32,
    mode: IrqMode,
    eventfd: Arc<OwnedFd>,
}

/// Thread forwarding eventfd wake-ups to the installed handler
#[derive(Debug)]
struct Dispatcher {
    index: u32,
    stop: Arc<AtomicBool>,
    eventfd: Arc<OwnedFd>,
    thread: JoinHandle<()>,
}

const DISPATCH_POLL_MS: i32 = 100;

fn dispatch(
    name: &str,
    device: &File,
    eventfd: &OwnedFd,
    stop: &AtomicBool,
    handler: &dyn InterruptHandler,
    unmask: Option<u32>,
) {
    let mut counter = [0u8; 8];
    loop {
        // Bounded wait so a lost wake-up still lets `free_irq` join.
        let mut fds = [PollFd::new(eventfd, PollFlags::IN)];
        match poll(&mut fds, DISPATCH_POLL_MS) {
            Ok(0) => {
                if stop.load(Ordering::Acquire) {
                    return;
                }
                continue;
            }
            Ok(_) => {}
            Err(rustix::io::Errno::INTR) => continue,
            Err(e) => {
                tracing::error!("{name}: eventfd poll failed: {e}");
                return;
            }
        }

        if let Err(e) = rustix::io::read(eventfd, &mut counter) {
            if e == rustix::io::Errno::INTR {
                continue;
            }
            tracing::error!("{name}: eventfd read failed: {e}");
            return;
        }
        if stop.load(Ordering::Acquire) {
            return;
        }

        if handler.handle() == IrqReturn::None {
            tracing::trace!("{name}: spurious interrupt");
        }

        if let Some(index) = unmask {
            if let Err(e) = set_irqs(device, &VfioIrqSet::unmask(index)) {
                tracing::warn!("{name}: unmask failed: {e}");
            }
        }
    }
}

/// PCI function opened through VFIO
#[derive(Debug)]
pub struct VfioFunction {
    address: String,
    id: PciId,
    // Field order is close order: device, then group, then container.
    device: Arc<File>,
    #[allow(dead_code)] // Needed for VFIO lifetime
    group: File,
    #[allow(dead_code)] // Needed for VFIO lifetime
    container: File,
    num_regions: u32,
    region_claimed: AtomicBool,
    vector: Mutex<Option<Vector>>,
    dispatcher: Mutex<Option<Dispatcher>>,
}

impl VfioFunction {
    /// Open the function at `address` (`0000:00:04.0`).
    ///
    /// # Errors
    ///
    /// `DeviceNotFound` if the function has no sysfs entry, `DeviceError` if
    /// any VFIO step fails (usually: not bound to `vfio-pci`, or permissions).
    pub fn open(address: &str) -> Result<Self> {
        tracing::info!("Opening {address} through VFIO");

        let iommu_group = crate::discovery::iommu_group(
            Path::new(crate::discovery::SYSFS_PCI_DEVICES),
            address,
        )?;
        tracing::debug!("IOMMU group: {iommu_group}");

        let container = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/vfio/vfio")
            .map_err(|e| EduError::device_error(format!("Cannot open /dev/vfio/vfio: {e}")))?;

        // SAFETY: VFIO_GET_API_VERSION takes no argument and returns an int.
        // Invariants: (1) container fd valid from open. Caller guarantees: /dev/vfio/vfio.
        let api_version =
            unsafe { libc::ioctl(container.as_raw_fd(), ioctls::VFIO_GET_API_VERSION as _) };
        if api_version != ioctls::VFIO_API_VERSION {
            return Err(EduError::device_error(format!(
                "Unsupported VFIO API version: {api_version}"
            )));
        }

        // Group paths: /dev/vfio/N with an IOMMU, /dev/vfio/noiommu-N without.
        let (group_path, iommu_type) = if Path::new(&format!("/dev/vfio/{iommu_group}")).exists() {
            (format!("/dev/vfio/{iommu_group}"), ioctls::VFIO_TYPE1V2_IOMMU)
        } else {
            (
                format!("/dev/vfio/noiommu-{iommu_group}"),
                ioctls::VFIO_NOIOMMU_IOMMU,
            )
        };

        // SAFETY: VFIO_CHECK_EXTENSION takes the extension id by value and returns
        // 1 if supported. Invariants: (1) container fd valid.
        let supported = unsafe {
            libc::ioctl(
                container.as_raw_fd(),
                ioctls::VFIO_CHECK_EXTENSION as _,
                iommu_type,
            )
        };
        if supported != 1 {
            return Err(EduError::device_error(format!(
                "VFIO IOMMU type {iommu_type} not supported"
            )));
        }

        let group = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&group_path)
            .map_err(|e| EduError::device_error(format!("Cannot open {group_path}: {e}")))?;

        let mut group_status = VfioGroupStatus {
            argsz: std::mem::size_of::<VfioGroupStatus>() as u32,
            flags: 0,
        };
        // SAFETY: VFIO_GROUP_GET_STATUS fills group_status. Invariants: (1) group fd
        // valid; (2) argsz set; (3) layout matches struct vfio_group_status.
        let ret = unsafe {
            libc::ioctl(
                group.as_raw_fd(),
                ioctls::VFIO_GROUP_GET_STATUS as _,
                &raw mut group_status,
            )
        };
        if ret < 0 || (group_status.flags & ioctls::VFIO_GROUP_FLAGS_VIABLE) == 0 {
            return Err(EduError::device_error(
                "VFIO group not viable (all devices must be bound to vfio-pci)",
            ));
        }

        // SAFETY: VFIO_GROUP_SET_CONTAINER reads a pointer to the container fd.
        // Invariants: (1) group fd valid; (2) pointer refers to a live int.
        let ret = unsafe {
            libc::ioctl(
                group.as_raw_fd(),
                ioctls::VFIO_GROUP_SET_CONTAINER as _,
                std::ptr::from_ref(&container.as_raw_fd()),
            )
        };
        if ret < 0 {
            return Err(last_os_error("Failed to set container"));
        }

        // SAFETY: VFIO_SET_IOMMU takes the IOMMU type by value. Invariants:
        // (1) container fd valid; (2) a group is attached (above).
        let ret = unsafe {
            libc::ioctl(container.as_raw_fd(), ioctls::VFIO_SET_IOMMU as _, iommu_type)
        };
        if ret < 0 {
            return Err(last_os_error("Failed to set IOMMU"));
        }

        let address_cstr = std::ffi::CString::new(address)
            .map_err(|e| EduError::invalid_argument(format!("Invalid PCI address: {e}")))?;

        // SAFETY: VFIO_GROUP_GET_DEVICE_FD reads a NUL-terminated name and returns a
        // new fd. Invariants: (1) group fd valid; (2) address_cstr outlives the call.
        let device_fd = unsafe {
            libc::ioctl(
                group.as_raw_fd(),
                ioctls::VFIO_GROUP_GET_DEVICE_FD as _,
                address_cstr.as_ptr(),
            )
        };
        if device_fd < 0 {
            return Err(last_os_error("Failed to get device fd"));
        }

        // SAFETY: device_fd is a fresh fd returned by the kernel (checked >= 0) and
        // owned by nothing else; File takes ownership and closes it.
        let device = unsafe { File::from_raw_fd(device_fd) };

        let mut device_info = VfioDeviceInfo {
            argsz: std::mem::size_of::<VfioDeviceInfo>() as u32,
            ..Default::default()
        };
        // SAFETY: VFIO_DEVICE_GET_INFO fills device_info. Invariants: (1) device fd
        // valid; (2) argsz set; (3) layout matches struct vfio_device_info.
        let ret = unsafe {
            libc::ioctl(
                device.as_raw_fd(),
                ioctls::VFIO_DEVICE_GET_INFO as _,
                &raw mut device_info,
            )
        };
        if ret < 0 {
            return Err(last_os_error("Failed to get device info"));
        }

        tracing::info!(
            "VFIO device {address}: {} regions, {} IRQs",
            device_info.num_regions,
            device_info.num_irqs
        );

        let mut function = Self {
            address: address.to_string(),
            id: PciId {
                vendor: 0,
                device: 0,
            },
            device: Arc::new(device),
            group,
            container,
            num_regions: device_info.num_regions,
            region_claimed: AtomicBool::new(false),
            vector: Mutex::new(None),
            dispatcher: Mutex::new(None),
        };

        let ids = function.config_read(0, 4)?;
        function.id = PciId {
            vendor: u16::from_le_bytes([ids[0], ids[1]]),
            device: u16::from_le_bytes([ids[2], ids[3]]),
        };
        tracing::debug!("{address}: id {}", function.id);

        Ok(function)
    }

    fn region_info(&self, index: u32) -> Result<VfioRegionInfo> {
        if index >= self.num_regions {
            return Err(EduError::resource_unavailable(format!(
                "{}: region {index} does not exist",
                self.address
            )));
        }

        let mut info = VfioRegionInfo {
            argsz: std::mem::size_of::<VfioRegionInfo>() as u32,
            index,
            ..Default::default()
        };
        // SAFETY: VFIO_DEVICE_GET_REGION_INFO fills info for `index`. Invariants:
        // (1) device fd valid; (2) argsz set; (3) layout matches struct vfio_region_info.
        let ret = unsafe {
            libc::ioctl(
                self.device.as_raw_fd(),
                ioctls::VFIO_DEVICE_GET_REGION_INFO as _,
                &raw mut info,
            )
        };
        if ret < 0 {
            return Err(EduError::resource_unavailable(format!(
                "{}: region {index}: {}",
                self.address,
                std::io::Error::last_os_error()
            )));
        }
        Ok(info)
    }

    fn config_read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let config = self.region_info(ioctls::VFIO_PCI_CONFIG_REGION_INDEX)?;
        let mut buf = vec![0u8; len];
        self.device.read_exact_at(&mut buf, config.offset + offset)?;
        Ok(buf)
    }

    fn update_command(&self, set: u16, clear: u16) -> Result<()> {
        let config = self.region_info(ioctls::VFIO_PCI_CONFIG_REGION_INDEX)?;
        let mut raw = [0u8; 2];
        self.device
            .read_exact_at(&mut raw, config.offset + command::OFFSET)?;
        let value = (u16::from_le_bytes(raw) | set) & !clear;
        self.device
            .write_all_at(&value.to_le_bytes(), config.offset + command::OFFSET)?;
        tracing::debug!("{}: command register = {value:#06x}", self.address);
        Ok(())
    }

    fn irq_count(&self, index: u32) -> Result<u32> {
        let mut info = VfioIrqInfo {
            argsz: std::mem::size_of::<VfioIrqInfo>() as u32,
            index,
            ..Default::default()
        };
        // SAFETY: VFIO_DEVICE_GET_IRQ_INFO fills info for `index`. Invariants:
        // (1) device fd valid; (2) argsz set; (3) layout matches struct vfio_irq_info.
        let ret = unsafe {
            libc::ioctl(
                self.device.as_raw_fd(),
                ioctls::VFIO_DEVICE_GET_IRQ_INFO as _,
                &raw mut info,
            )
        };
        if ret < 0 {
            return Err(last_os_error("VFIO_DEVICE_GET_IRQ_INFO"));
        }
        Ok(info.count)
    }
}

impl PciFunction for VfioFunction {
    fn name(&self) -> &str {
        &self.address
    }

    fn id(&self) -> PciId {
        self.id
    }

    fn enable(&self) -> Result<()> {
        self.update_command(command::MEMORY, 0)
    }

    fn disable(&self) {
        if let Err(e) = self.update_command(0, command::MEMORY | command::MASTER) {
            tracing::warn!("{}: disable failed: {e}", self.address);
        }
    }

    fn set_master(&self) {
        if let Err(e) = self.update_command(command::MASTER, 0) {
            tracing::warn!("{}: set_master failed: {e}", self.address);
        }
    }

    fn request_region(&self, bar: u32, name: &str) -> Result<()> {
        let info = self.region_info(bar)?;
        if info.size == 0 || info.flags & ioctls::VFIO_REGION_INFO_FLAG_MMAP == 0 {
            return Err(EduError::resource_unavailable(format!(
                "{}: BAR{bar} ({name}) is not mappable",
                self.address
            )));
        }
        if self
            .region_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(EduError::resource_unavailable(format!(
                "{}: BAR{bar} ({name}) already claimed",
                self.address
            )));
        }
        Ok(())
    }

    fn release_region(&self, _bar: u32) {
        self.region_claimed.store(false, Ordering::Release);
    }

    fn map_bar(&self, bar: u32) -> Result<Arc<dyn RegisterWindow>> {
        let info = self.region_info(bar)?;
        let size = usize::try_from(info.size).map_err(|_| {
            EduError::resource_unavailable(format!("BAR{bar} size {:#x} too large", info.size))
        })?;
        let region = MappedRegion::map(&*self.device, bar, info.offset, size)?;
        tracing::info!("{}: mapped BAR{bar} ({size} bytes)", self.address);
        Ok(Arc::new(region))
    }

    fn alloc_irq_vectors(&self, mode: IrqMode) -> Result<u32> {
        let index = match mode {
            IrqMode::Msi => ioctls::VFIO_PCI_MSI_IRQ_INDEX,
            IrqMode::Legacy => ioctls::VFIO_PCI_INTX_IRQ_INDEX,
        };
        if self.irq_count(index)? == 0 {
            return Err(EduError::resource_unavailable(format!(
                "{}: no {mode} interrupt",
                self.address
            )));
        }

        let fd = eventfd(0, EventfdFlags::CLOEXEC)
            .map_err(|e| EduError::resource_unavailable(format!("eventfd: {e}")))?;

        *self.vector.lock().unwrap_or_else(PoisonError::into_inner) = Some(Vector {
            index,
            mode,
            eventfd: Arc::new(fd),
        });
        Ok(0)
    }

    fn free_irq_vectors(&self) {
        self.vector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn request_irq(
        &self,
        vector: u32,
        name: &str,
        shared: bool,
        handler: Arc<dyn InterruptHandler>,
    ) -> Result<()> {
        let (index, mode, eventfd) = {
            let guard = self.vector.lock().unwrap_or_else(PoisonError::into_inner);
            let v = guard.as_ref().filter(|_| vector == 0).ok_or_else(|| {
                EduError::resource_unavailable(format!("irq {vector} not allocated"))
            })?;
            (v.index, v.mode, Arc::clone(&v.eventfd))
        };

        set_irqs(
            &self.device,
            &VfioIrqSet::trigger(index, eventfd.as_raw_fd()),
        )
        .map_err(|e| EduError::resource_unavailable(format!("{name}: {e}")))?;

        let stop = Arc::new(AtomicBool::new(false));
        let unmask = (mode == IrqMode::Legacy).then_some(index);
        let thread = {
            let device = Arc::clone(&self.device);
            let eventfd = Arc::clone(&eventfd);
            let stop = Arc::clone(&stop);
            let label = format!("{}/{name}", self.address);
            thread::Builder::new()
                .name(name.to_string())
                .spawn(move || dispatch(&label, &device, &eventfd, &stop, handler.as_ref(), unmask))
        };
        let thread = match thread {
            Ok(thread) => thread,
            Err(e) => {
                if let Err(disable) = set_irqs(&self.device, &VfioIrqSet::disable(index)) {
                    tracing::warn!("{}: disabling interrupt failed: {disable}", self.address);
                }
                return Err(EduError::resource_unavailable(format!(
                    "{name}: dispatcher thread: {e}"
                )));
            }
        };

        tracing::debug!("{}: {mode} interrupt wired (shared={shared})", self.address);
        *self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner) = Some(Dispatcher {
            index,
            stop,
            eventfd,
            thread,
        });
        Ok(())
    }

    fn free_irq(&self, _vector: u32) {
        let Some(dispatcher) = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        if let Err(e) = set_irqs(&self.device, &VfioIrqSet::disable(dispatcher.index)) {
            tracing::warn!("{}: disabling interrupt failed: {e}", self.address);
        }

        dispatcher.stop.store(true, Ordering::Release);
        if let Err(e) = rustix::io::write(&*dispatcher.eventfd, &1u64.to_ne_bytes()) {
            // The dispatcher still notices `stop` at its next poll timeout.
            tracing::warn!("{}: cannot wake dispatcher: {e}", self.address);
        }
        if dispatcher.thread.join().is_err() {
            tracing::error!("{}: interrupt dispatcher panicked", self.address);
        }
    }
}

// ── VFIO device binding helpers ───────────────────────────────────────────────

/// Bind an edu function to `vfio-pci`, unbinding any current driver.
///
/// Requires root or CAP_SYS_ADMIN.
///
/// # Errors
///
/// Returns `DeviceError` if any sysfs write fails (usually permission denied).
pub fn bind_to_vfio(pcie_address: &str) -> Result<()> {
    tracing::info!("Binding {pcie_address} to vfio-pci");

    let driver_unbind = format!("/sys/bus/pci/devices/{pcie_address}/driver/unbind");
    if Path::new(&driver_unbind).exists() {
        std::fs::write(&driver_unbind, pcie_address).map_err(|e| {
            EduError::device_error(format!("Cannot unbind {pcie_address}: {e}"))
        })?;
        tracing::info!("Unbound from existing driver");
    }

    let new_id = "/sys/bus/pci/drivers/vfio-pci/new_id";
    if Path::new(new_id).exists() {
        // EEXIST when the id was added earlier; the bind below still applies.
        if let Err(e) = std::fs::write(new_id, PciId::EDU.to_string().replace(':', " ")) {
            tracing::debug!("vfio-pci/new_id: {e}");
        }
    }

    let bind_path = "/sys/bus/pci/drivers/vfio-pci/bind";
    if let Err(e) = std::fs::write(bind_path, pcie_address) {
        // new_id already binds matching unbound devices.
        let current = crate::discovery::scan(Path::new(crate::discovery::SYSFS_PCI_DEVICES))?;
        if !current
            .iter()
            .any(|d| d.address == pcie_address && d.is_vfio_bound())
        {
            return Err(EduError::device_error(format!("Cannot bind to vfio-pci: {e}")));
        }
    }

    tracing::info!("{pcie_address} bound to vfio-pci");
    Ok(())
}
