// SPDX-License-Identifier: AGPL-3.0-only

//! Simulated edu device
//!
//! [`SimDevice`] models the register file the way QEMU's edu device behaves:
//!
//! - `XOR` stores the bitwise inverse of the written value
//! - writing `FACTORIAL` while idle sets `COMPUTING` and latches the operand;
//!   writes while computing are ignored
//! - only the `RAISE_IRQ` bit of `STATUS` is writable
//! - `INTR_RAISE` ORs into `INTR_STATUS`, `INTR_ACK` clears the written bits
//! - unmapped offsets read as all ones
//!
//! Completion never happens inside a register write. With
//! [`Latency::Manual`] the caller drives it through
//! [`SimDevice::complete_factorial`] and [`SimDevice::fire_irq`]; with
//! [`Latency::Threaded`] a worker thread does both.
//!
//! [`SimFunction`] wraps a device as a [`PciFunction`] with fault injection
//! at each acquire step and counters for every acquire/release pair.

use crate::error::{EduError, Result};
use crate::mmio::RegisterWindow;
use crate::platform::{InterruptHandler, IrqMode, IrqReturn, PciFunction, PciId};
use edu_chip::ident::Identification;
use edu_chip::pcie::REGS_BAR_SIZE;
use edu_chip::regs;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Identification value of the stock device (version 1.0)
pub const DEFAULT_IDENT: u32 = Identification {
    major: 1,
    minor: 0,
    magic: edu_chip::ident::MAGIC,
}
.encode();

/// When the simulated device finishes work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Latency {
    /// Nothing completes until the caller says so
    Manual,
    /// A worker thread completes factorials after the given delay and
    /// delivers raised interrupts
    Threaded(Duration),
}

#[derive(Debug)]
enum Job {
    Factorial,
    Raise,
}

#[derive(Debug, Default)]
struct Registers {
    ident: u32,
    xor: u32,
    factorial: u32,
    status: u32,
    intr_status: u32,
    dma_src: u32,
    dma_dest: u32,
    dma_cnt: u32,
    dma_cmd: u32,
}

impl Registers {
    fn read(&self, offset: usize) -> u32 {
        match offset {
            regs::IDENT => self.ident,
            regs::XOR => self.xor,
            regs::FACTORIAL => self.factorial,
            regs::STATUS => self.status,
            regs::INTR_STATUS => self.intr_status,
            regs::DMA_SRC => self.dma_src,
            regs::DMA_DEST => self.dma_dest,
            regs::DMA_CNT => self.dma_cnt,
            regs::DMA_CMD => self.dma_cmd,
            _ => u32::MAX,
        }
    }

    fn slot(&mut self, offset: usize) -> Option<&mut u32> {
        match offset {
            regs::IDENT => Some(&mut self.ident),
            regs::XOR => Some(&mut self.xor),
            regs::FACTORIAL => Some(&mut self.factorial),
            regs::STATUS => Some(&mut self.status),
            regs::INTR_STATUS => Some(&mut self.intr_status),
            regs::DMA_SRC => Some(&mut self.dma_src),
            regs::DMA_DEST => Some(&mut self.dma_dest),
            regs::DMA_CNT => Some(&mut self.dma_cnt),
            regs::DMA_CMD => Some(&mut self.dma_cmd),
            _ => None,
        }
    }
}

/// Smallest `n` whose factorial carries 2^32 as a factor.
const FACTORIAL_WRAPS_TO_ZERO: u32 = 34;

/// `n!` as the device computes it, modulo 2^32.
pub fn factorial(n: u32) -> u32 {
    if n >= FACTORIAL_WRAPS_TO_ZERO {
        return 0;
    }
    (1..=n).fold(1u32, u32::wrapping_mul)
}

/// In-process model of the edu register file
pub struct SimDevice {
    latency: Latency,
    regs: Mutex<Registers>,
    journal: Mutex<Vec<(usize, u32)>>,
    handler: RwLock<Option<Arc<dyn InterruptHandler>>>,
    worker: Mutex<Option<Sender<Job>>>,
}

impl fmt::Debug for SimDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let regs = self.regs.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("SimDevice")
            .field("latency", &self.latency)
            .field("ident", &format_args!("{:#010x}", regs.ident))
            .field("status", &format_args!("{:#x}", regs.status))
            .field("intr_status", &format_args!("{:#x}", regs.intr_status))
            .finish_non_exhaustive()
    }
}

impl SimDevice {
    /// Stock version 1.0 device with [`Latency::Manual`].
    pub fn new() -> Arc<Self> {
        Self::with_latency(Latency::Manual)
    }

    /// Stock device with the given completion latency.
    pub fn with_latency(latency: Latency) -> Arc<Self> {
        Self::build(DEFAULT_IDENT, latency)
    }

    /// Device reporting `raw` from the identification register.
    pub fn with_identification(raw: u32) -> Arc<Self> {
        Self::build(raw, Latency::Manual)
    }

    fn build(ident: u32, latency: Latency) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let worker = match latency {
                Latency::Manual => None,
                Latency::Threaded(delay) => {
                    let (tx, rx) = mpsc::channel();
                    let weak = weak.clone();
                    thread::Builder::new()
                        .name("edu-sim".to_string())
                        .spawn(move || run_worker(&weak, &rx, delay))
                        .map_err(|e| warn!("edu-sim: worker thread failed to start: {e}"))
                        .ok()
                        .map(|_| tx)
                }
            };

            Self {
                latency,
                regs: Mutex::new(Registers {
                    ident,
                    ..Registers::default()
                }),
                journal: Mutex::new(Vec::new()),
                handler: RwLock::new(None),
                worker: Mutex::new(worker),
            }
        })
    }

    /// Configured completion latency
    pub const fn latency(&self) -> Latency {
        self.latency
    }

    /// Install the handler that receives line assertions.
    ///
    /// # Errors
    ///
    /// `ResourceUnavailable` if a handler is already installed.
    pub fn connect_irq(&self, handler: Arc<dyn InterruptHandler>) -> Result<()> {
        let mut slot = self.handler.write().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(EduError::resource_unavailable("interrupt line already claimed"));
        }
        *slot = Some(handler);
        Ok(())
    }

    /// Remove the handler. Waits for a running invocation to return.
    pub fn disconnect_irq(&self) {
        self.handler
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Whether a handler is installed
    pub fn irq_connected(&self) -> bool {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Assert the interrupt line once.
    ///
    /// Returns the handler's verdict, or `None` if no handler is installed.
    pub fn fire_irq(&self) -> Option<IrqReturn> {
        let handler = self.handler.read().unwrap_or_else(PoisonError::into_inner);
        let verdict = handler.as_ref().map(|h| h.handle());
        trace!("edu-sim: irq fired -> {verdict:?}");
        verdict
    }

    /// Finish the computation in progress.
    ///
    /// Stores the result, clears `COMPUTING` and, if `RAISE_IRQ` is set,
    /// latches the completion cause and asserts the line. Returns `false`
    /// if nothing was computing.
    pub fn complete_factorial(&self) -> bool {
        let raise = {
            let mut regs = self.regs.lock().unwrap_or_else(PoisonError::into_inner);
            if regs.status & regs::status::COMPUTING == 0 {
                return false;
            }
            regs.factorial = factorial(regs.factorial);
            regs.status &= !regs::status::COMPUTING;
            let raise = regs.status & regs::status::RAISE_IRQ != 0;
            if raise {
                regs.intr_status |= regs::intr::FACTORIAL_DONE;
            }
            debug!("edu-sim: factorial done = {}", regs.factorial);
            raise
        };

        if raise {
            self.fire_irq();
        }
        true
    }

    /// Every register write so far, in order.
    pub fn writes(&self) -> Vec<(usize, u32)> {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Values written to `offset`, in order.
    pub fn writes_to(&self, offset: usize) -> Vec<u32> {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(off, _)| *off == offset)
            .map(|(_, value)| *value)
            .collect()
    }

    /// Read a register without going through the journal.
    pub fn read_register(&self, offset: usize) -> u32 {
        self.regs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .read(offset)
    }

    /// Overwrite a register directly, bypassing device semantics.
    pub fn set_register(&self, offset: usize, value: u32) {
        let mut regs = self.regs.lock().unwrap_or_else(PoisonError::into_inner);
        match regs.slot(offset) {
            Some(slot) => *slot = value,
            None => warn!("edu-sim: no register at {offset:#x}"),
        }
    }

    fn schedule(&self, job: Job) {
        let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = worker.as_ref() {
            if tx.send(job).is_err() {
                warn!("edu-sim: worker has exited");
            }
        }
    }
}

fn run_worker(device: &Weak<SimDevice>, jobs: &Receiver<Job>, delay: Duration) {
    while let Ok(job) = jobs.recv() {
        if matches!(job, Job::Factorial) {
            thread::sleep(delay);
        }
        let Some(device) = device.upgrade() else {
            break;
        };
        match job {
            Job::Factorial => {
                device.complete_factorial();
            }
            Job::Raise => {
                device.fire_irq();
            }
        }
    }
}

impl RegisterWindow for SimDevice {
    fn read32(&self, offset: usize) -> u32 {
        self.read_register(offset)
    }

    fn write32(&self, offset: usize, value: u32) {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((offset, value));

        let job = {
            let mut regs = self.regs.lock().unwrap_or_else(PoisonError::into_inner);
            match offset {
                regs::XOR => {
                    regs.xor = !value;
                    None
                }
                regs::FACTORIAL => {
                    if regs.status & regs::status::COMPUTING == 0 {
                        regs.factorial = value;
                        regs.status |= regs::status::COMPUTING;
                        Some(Job::Factorial)
                    } else {
                        None
                    }
                }
                regs::STATUS => {
                    regs.status = (regs.status & !regs::status::RAISE_IRQ)
                        | (value & regs::status::RAISE_IRQ);
                    None
                }
                regs::INTR_RAISE => {
                    regs.intr_status |= value;
                    Some(Job::Raise)
                }
                regs::INTR_ACK => {
                    regs.intr_status &= !value;
                    None
                }
                regs::DMA_SRC => {
                    regs.dma_src = value;
                    None
                }
                regs::DMA_DEST => {
                    regs.dma_dest = value;
                    None
                }
                regs::DMA_CNT => {
                    regs.dma_cnt = value;
                    None
                }
                regs::DMA_CMD => {
                    regs.dma_cmd = value;
                    None
                }
                _ => {
                    trace!("edu-sim: write to read-only or unmapped {offset:#x}");
                    None
                }
            }
        };

        if let Some(job) = job {
            self.schedule(job);
        }
    }

    fn len(&self) -> usize {
        REGS_BAR_SIZE
    }
}

/// Acquire step of a [`SimFunction`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimStep {
    /// `enable` / `disable`
    Enable,
    /// `request_region` / `release_region`
    RequestRegion,
    /// `map_bar` / mapping dropped
    MapBar,
    /// `alloc_irq_vectors` / `free_irq_vectors`
    AllocIrqVectors,
    /// `request_irq` / `free_irq`
    RequestIrq,
}

impl SimStep {
    const COUNT: usize = 5;

    const fn index(self) -> usize {
        self as usize
    }
}

/// Acquire/release counts per step
#[derive(Debug, Default)]
pub struct SimCounters {
    acquired: [AtomicUsize; SimStep::COUNT],
    released: [AtomicUsize; SimStep::COUNT],
}

impl SimCounters {
    /// Successful acquisitions of `step`
    pub fn acquired(&self, step: SimStep) -> usize {
        self.acquired[step.index()].load(Ordering::Acquire)
    }

    /// Releases of `step`
    pub fn released(&self, step: SimStep) -> usize {
        self.released[step.index()].load(Ordering::Acquire)
    }

    /// Whether every acquired resource has been released exactly once
    pub fn balanced(&self) -> bool {
        (0..SimStep::COUNT).all(|i| {
            self.acquired[i].load(Ordering::Acquire) == self.released[i].load(Ordering::Acquire)
        })
    }

    fn acquire(&self, step: SimStep) {
        self.acquired[step.index()].fetch_add(1, Ordering::AcqRel);
    }

    fn release(&self, step: SimStep) {
        self.released[step.index()].fetch_add(1, Ordering::AcqRel);
    }
}

/// BAR mapping handed out by [`SimFunction::map_bar`]; counts its own release.
#[derive(Debug)]
struct SimMapping {
    device: Arc<SimDevice>,
    counters: Arc<SimCounters>,
}

impl RegisterWindow for SimMapping {
    fn read32(&self, offset: usize) -> u32 {
        self.device.read32(offset)
    }

    fn write32(&self, offset: usize, value: u32) {
        self.device.write32(offset, value);
    }

    fn len(&self) -> usize {
        self.device.len()
    }
}

impl Drop for SimMapping {
    fn drop(&mut self) {
        self.counters.release(SimStep::MapBar);
    }
}

/// Simulated PCI function wrapping a [`SimDevice`]
#[derive(Debug)]
pub struct SimFunction {
    name: String,
    id: PciId,
    device: Arc<SimDevice>,
    fail_at: Option<SimStep>,
    counters: Arc<SimCounters>,
    enabled: AtomicBool,
    master: AtomicBool,
    region_claimed: AtomicBool,
    vector: Mutex<Option<(u32, IrqMode)>>,
}

impl SimFunction {
    /// Function at bus address `name` backed by `device`.
    pub fn new(name: &str, device: Arc<SimDevice>) -> Self {
        Self {
            name: name.to_string(),
            id: PciId::EDU,
            device,
            fail_at: None,
            counters: Arc::new(SimCounters::default()),
            enabled: AtomicBool::new(false),
            master: AtomicBool::new(false),
            region_claimed: AtomicBool::new(false),
            vector: Mutex::new(None),
        }
    }

    /// Report a different vendor/device pair.
    #[must_use]
    pub fn with_id(mut self, id: PciId) -> Self {
        self.id = id;
        self
    }

    /// Make `step` fail instead of acquiring.
    #[must_use]
    pub fn fail_at(mut self, step: SimStep) -> Self {
        self.fail_at = Some(step);
        self
    }

    /// Backing device model
    pub fn device(&self) -> &Arc<SimDevice> {
        &self.device
    }

    /// Acquire/release counters
    pub fn counters(&self) -> &SimCounters {
        &self.counters
    }

    /// Whether the function is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Whether bus mastering is on
    pub fn is_master(&self) -> bool {
        self.master.load(Ordering::Acquire)
    }

    fn injected(&self, step: SimStep) -> bool {
        if self.fail_at == Some(step) {
            debug!("{}: injected failure at {step:?}", self.name);
            true
        } else {
            false
        }
    }
}

impl PciFunction for SimFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> PciId {
        self.id
    }

    fn enable(&self) -> Result<()> {
        if self.injected(SimStep::Enable) {
            return Err(EduError::device_error(format!("{}: enable failed", self.name)));
        }
        self.enabled.store(true, Ordering::Release);
        self.counters.acquire(SimStep::Enable);
        Ok(())
    }

    fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
        self.master.store(false, Ordering::Release);
        self.counters.release(SimStep::Enable);
    }

    fn set_master(&self) {
        self.master.store(true, Ordering::Release);
    }

    fn request_region(&self, bar: u32, name: &str) -> Result<()> {
        if self.injected(SimStep::RequestRegion) {
            return Err(EduError::resource_unavailable(format!("BAR{bar} ({name})")));
        }
        if self
            .region_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(EduError::resource_unavailable(format!(
                "BAR{bar} ({name}) already claimed"
            )));
        }
        self.counters.acquire(SimStep::RequestRegion);
        Ok(())
    }

    fn release_region(&self, _bar: u32) {
        self.region_claimed.store(false, Ordering::Release);
        self.counters.release(SimStep::RequestRegion);
    }

    fn map_bar(&self, bar: u32) -> Result<Arc<dyn RegisterWindow>> {
        if self.injected(SimStep::MapBar) || bar != edu_chip::pcie::REGS_BAR {
            return Err(EduError::resource_unavailable(format!("cannot map BAR{bar}")));
        }
        self.counters.acquire(SimStep::MapBar);
        Ok(Arc::new(SimMapping {
            device: self.device.clone(),
            counters: self.counters.clone(),
        }))
    }

    fn alloc_irq_vectors(&self, mode: IrqMode) -> Result<u32> {
        if self.injected(SimStep::AllocIrqVectors) {
            return Err(EduError::resource_unavailable(format!("no {mode} vector")));
        }
        *self.vector.lock().unwrap_or_else(PoisonError::into_inner) = Some((0, mode));
        self.counters.acquire(SimStep::AllocIrqVectors);
        Ok(0)
    }

    fn free_irq_vectors(&self) {
        self.vector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.counters.release(SimStep::AllocIrqVectors);
    }

    fn request_irq(
        &self,
        vector: u32,
        name: &str,
        shared: bool,
        handler: Arc<dyn InterruptHandler>,
    ) -> Result<()> {
        if self.injected(SimStep::RequestIrq) {
            return Err(EduError::resource_unavailable(format!("irq {vector} ({name})")));
        }
        let allocated = *self.vector.lock().unwrap_or_else(PoisonError::into_inner);
        match allocated {
            Some((v, mode)) if v == vector => {
                if shared != mode.is_shared() {
                    debug!("{}: {mode} line requested with shared={shared}", self.name);
                }
            }
            _ => {
                return Err(EduError::resource_unavailable(format!(
                    "irq {vector} not allocated"
                )))
            }
        }
        self.device.connect_irq(handler)?;
        self.counters.acquire(SimStep::RequestIrq);
        Ok(())
    }

    fn free_irq(&self, _vector: u32) {
        self.device.disconnect_irq();
        self.counters.release(SimStep::RequestIrq);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    struct Counting(AtomicUsize);

    impl InterruptHandler for Counting {
        fn handle(&self) -> IrqReturn {
            self.0.fetch_add(1, Ordering::SeqCst);
            IrqReturn::Handled
        }
    }

    #[test]
    fn factorial_wraps_like_the_device() {
        assert_eq!(factorial(0), 1);
        assert_eq!(factorial(5), 120);
        assert_eq!(factorial(12), 479_001_600);
        assert_eq!(factorial(13), 1_932_053_504);
        assert_eq!(factorial(33), 0x8000_0000);
        assert_eq!(factorial(34), 0);
        assert_eq!(factorial(u32::MAX), 0);
    }

    #[test]
    fn huge_operand_completes_without_holding_registers() {
        let sim = SimDevice::new();
        sim.write32(regs::FACTORIAL, u32::MAX);

        let started = Instant::now();
        assert!(sim.complete_factorial());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(sim.read32(regs::FACTORIAL), 0);

        sim.write32(regs::XOR, 1);
        assert_eq!(sim.read32(regs::XOR), !1);
    }

    #[test]
    fn register_semantics() {
        let sim = SimDevice::new();
        assert_eq!(sim.read32(regs::IDENT), 0x0100_00ed);

        sim.write32(regs::XOR, 0x1234_5678);
        assert_eq!(sim.read32(regs::XOR), !0x1234_5678);

        sim.write32(regs::STATUS, 0xffff_ffff);
        assert_eq!(sim.read32(regs::STATUS), regs::status::RAISE_IRQ);

        sim.write32(regs::INTR_RAISE, 0b0110);
        sim.write32(regs::INTR_RAISE, 0b1000);
        assert_eq!(sim.read32(regs::INTR_STATUS), 0b1110);
        sim.write32(regs::INTR_ACK, 0b0100);
        assert_eq!(sim.read32(regs::INTR_STATUS), 0b1010);

        assert_eq!(sim.read32(0x40), u32::MAX);
        sim.write32(regs::IDENT, 0);
        assert_eq!(sim.read32(regs::IDENT), 0x0100_00ed);
        assert_eq!(sim.len(), REGS_BAR_SIZE);
    }

    #[test]
    fn factorial_write_ignored_while_computing() {
        let sim = SimDevice::new();
        sim.write32(regs::FACTORIAL, 4);
        sim.write32(regs::FACTORIAL, 9);
        assert_ne!(sim.read32(regs::STATUS) & regs::status::COMPUTING, 0);

        assert!(sim.complete_factorial());
        assert_eq!(sim.read32(regs::FACTORIAL), 24);
        assert_eq!(sim.read32(regs::STATUS) & regs::status::COMPUTING, 0);
        // RAISE_IRQ was clear: no cause latched.
        assert_eq!(sim.read32(regs::INTR_STATUS), 0);
        assert!(!sim.complete_factorial());
        assert_eq!(sim.writes_to(regs::FACTORIAL), vec![4, 9]);
    }

    #[test]
    fn completion_asserts_line_when_enabled() {
        let sim = SimDevice::new();
        let handler = Arc::new(Counting(AtomicUsize::new(0)));
        sim.connect_irq(handler.clone()).unwrap();
        assert!(sim.connect_irq(handler.clone()).is_err());

        sim.write32(regs::STATUS, regs::status::RAISE_IRQ);
        sim.write32(regs::FACTORIAL, 3);
        assert_eq!(handler.0.load(Ordering::SeqCst), 0);
        assert!(sim.complete_factorial());
        assert_eq!(handler.0.load(Ordering::SeqCst), 1);
        assert_eq!(sim.read32(regs::INTR_STATUS), regs::intr::FACTORIAL_DONE);

        sim.disconnect_irq();
        assert_eq!(sim.fire_irq(), None);
    }

    #[test]
    fn threaded_latency_completes_on_its_own() {
        let sim = SimDevice::with_latency(Latency::Threaded(Duration::from_millis(5)));
        let handler = Arc::new(Counting(AtomicUsize::new(0)));
        sim.connect_irq(handler.clone()).unwrap();
        sim.write32(regs::STATUS, regs::status::RAISE_IRQ);
        sim.write32(regs::FACTORIAL, 6);

        let deadline = Instant::now() + Duration::from_secs(5);
        while sim.read32(regs::STATUS) & regs::status::COMPUTING != 0 {
            assert!(Instant::now() < deadline, "simulated factorial never completed");
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(sim.read32(regs::FACTORIAL), 720);
        while handler.0.load(Ordering::SeqCst) == 0 {
            assert!(Instant::now() < deadline, "interrupt never delivered");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn function_counts_and_injects() {
        let func = SimFunction::new("0000:00:04.0", SimDevice::new()).fail_at(SimStep::RequestIrq);
        func.enable().unwrap();
        func.set_master();
        assert!(func.is_enabled() && func.is_master());

        func.request_region(0, "edu-bar0").unwrap();
        assert!(func.request_region(0, "edu-bar0").is_err());

        let window = func.map_bar(0).unwrap();
        assert_eq!(window.read32(regs::IDENT), DEFAULT_IDENT);
        assert!(func.map_bar(2).is_err());

        let vector = func.alloc_irq_vectors(IrqMode::Msi).unwrap();
        let handler = Arc::new(Counting(AtomicUsize::new(0)));
        assert!(func.request_irq(vector, "edu-irq", false, handler).is_err());

        func.free_irq_vectors();
        drop(window);
        func.release_region(0);
        func.disable();

        let c = func.counters();
        assert_eq!(c.acquired(SimStep::RequestIrq), 0);
        assert_eq!(c.released(SimStep::MapBar), 1);
        assert!(c.balanced());
        assert!(!func.is_enabled());
    }
}
