// SPDX-License-Identifier: AGPL-3.0-only

//! Bind/unbind lifecycle
//!
//! ```text
//! probe:  enable ─▶ request_region ─▶ map_bar ─▶ check ident ─▶ alloc vectors
//!                                                                   │
//!          Ready ◀── publish endpoint ◀── request_irq ◀──────────────┘
//! ```
//!
//! Each acquired resource is held by a guard. A failing step returns early
//! and the guards already built drop in reverse order, so everything acquired
//! is released exactly once and nothing else is touched. A [`Binding`] owns
//! the full guard set; dropping it unbinds.

use crate::config::DriverConfig;
use crate::device::{BindState, EduDevice, Session};
use crate::error::{EduError, Result};
use crate::platform::PciFunction;
use edu_chip::ident::Identification;
use edu_chip::pcie::{IRQ_NAME, REGION_NAME};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info};

// ── Endpoint table ───────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Endpoints {
    next_index: u32,
    by_name: BTreeMap<String, Arc<EduDevice>>,
}

/// Published control endpoints, keyed by name.
///
/// The lock serializes endpoint creation and owns the device counter:
/// indices increase in bind order and are never reused.
#[derive(Debug, Default)]
struct EndpointTable {
    inner: Mutex<Endpoints>,
}

impl EndpointTable {
    fn publish(
        self: &Arc<Self>,
        config: &DriverConfig,
        device: &Arc<EduDevice>,
    ) -> Result<Endpoint> {
        let mut endpoints = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let index = endpoints.next_index;
        endpoints.next_index = index
            .checked_add(1)
            .ok_or_else(|| EduError::resource_unavailable("endpoint indices exhausted"))?;

        let name = config.endpoint_name(index);
        device.set_index(index);
        endpoints.by_name.insert(name.clone(), Arc::clone(device));
        drop(endpoints);

        debug!("{}: endpoint {name} published", device.pci_name());
        Ok(Endpoint {
            table: Arc::clone(self),
            name,
        })
    }

    fn get(&self, name: &str) -> Option<Arc<EduDevice>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .by_name
            .get(name)
            .cloned()
    }

    fn names(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .by_name
            .keys()
            .cloned()
            .collect()
    }

    fn remove(&self, name: &str) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .by_name
            .remove(name);
    }
}

// ── Resource guards ──────────────────────────────────────────────────────────

#[derive(Debug)]
struct Enabled(Arc<dyn PciFunction>);

impl Drop for Enabled {
    fn drop(&mut self) {
        self.0.disable();
        debug!("{}: disabled", self.0.name());
    }
}

#[derive(Debug)]
struct RegionClaim {
    func: Arc<dyn PciFunction>,
    bar: u32,
}

impl Drop for RegionClaim {
    fn drop(&mut self) {
        self.func.release_region(self.bar);
        debug!("{}: BAR{} released", self.func.name(), self.bar);
    }
}

#[derive(Debug)]
struct Mapping(Arc<EduDevice>);

impl Drop for Mapping {
    fn drop(&mut self) {
        self.0.unmap();
    }
}

#[derive(Debug)]
struct IrqVectors(Arc<dyn PciFunction>);

impl Drop for IrqVectors {
    fn drop(&mut self) {
        self.0.free_irq_vectors();
        debug!("{}: irq vectors freed", self.0.name());
    }
}

#[derive(Debug)]
struct IrqLine {
    func: Arc<dyn PciFunction>,
    vector: u32,
}

impl Drop for IrqLine {
    fn drop(&mut self) {
        self.func.free_irq(self.vector);
        debug!("{}: irq {} freed", self.func.name(), self.vector);
    }
}

#[derive(Debug)]
struct Endpoint {
    table: Arc<EndpointTable>,
    name: String,
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.table.remove(&self.name);
        debug!("endpoint {} removed", self.name);
    }
}

/// Everything a bound device holds. Fields drop in declaration order, which
/// is the reverse of acquisition.
#[derive(Debug)]
struct Guards {
    endpoint: Endpoint,
    irq_line: IrqLine,
    vectors: IrqVectors,
    mapping: Mapping,
    region: RegionClaim,
    enabled: Enabled,
}

// ── Binding ──────────────────────────────────────────────────────────────────

/// A device bound to the driver. Dropping it unbinds.
#[derive(Debug)]
#[must_use = "dropping a Binding unbinds the device"]
pub struct Binding {
    device: Arc<EduDevice>,
    ident: Identification,
    guards: Option<Guards>,
}

impl Binding {
    /// The bound device
    pub fn device(&self) -> &Arc<EduDevice> {
        &self.device
    }

    /// Control endpoint name (`edu0`, ...)
    pub fn name(&self) -> &str {
        self.guards
            .as_ref()
            .map_or("", |guards| guards.endpoint.name.as_str())
    }

    /// Lifecycle state
    pub fn state(&self) -> BindState {
        self.device.state()
    }

    /// Identification accepted at bind time
    pub const fn identification(&self) -> Identification {
        self.ident
    }

    /// Tear the device down. Equivalent to dropping the binding.
    pub fn unbind(self) {
        drop(self);
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        let pci_name = self.device.pci_name().to_string();
        self.device.set_state(BindState::TearingDown);

        if let Some(guards) = self.guards.take() {
            let endpoint = guards.endpoint.name.clone();
            drop(guards);
            info!("{pci_name}: {endpoint} unbound");
        }

        // Interrupt line is gone; nothing can complete a pending factorial now.
        self.device.factorial.abandon();
        self.device.set_state(BindState::Unbound);
    }
}

/// Outcome of [`EduDriver::bind_all`]
#[derive(Debug, Default)]
pub struct BindReport {
    /// Successfully bound devices, in bind order
    pub bound: Vec<Binding>,
    /// Matching functions that failed to bind
    pub failed: Vec<(String, EduError)>,
    /// Functions whose ids did not match
    pub skipped: usize,
}

// ── Driver ───────────────────────────────────────────────────────────────────

/// Lifecycle manager
#[derive(Debug, Default)]
pub struct EduDriver {
    config: DriverConfig,
    endpoints: Arc<EndpointTable>,
}

impl EduDriver {
    /// Driver with `config`.
    pub fn new(config: DriverConfig) -> Self {
        Self {
            config,
            endpoints: Arc::default(),
        }
    }

    /// Active configuration
    pub const fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Bind one PCI function.
    ///
    /// # Errors
    ///
    /// - `NoMatch` if the function is not an edu device (nothing acquired)
    /// - `InvalidDevice`/`UnsupportedVersion` if identification is rejected
    /// - `ResourceUnavailable`/`DeviceError` if a platform step fails
    ///
    /// On error every resource acquired so far has been released.
    pub fn probe(&self, func: Arc<dyn PciFunction>) -> Result<Binding> {
        let id = func.id();
        if !edu_chip::pcie::matches(id.vendor, id.device) {
            return Err(EduError::NoMatch {
                vendor: id.vendor,
                device: id.device,
            });
        }

        info!("{}: probing {id}", func.name());
        self.bind(&func).map_err(|e| {
            error!("{}: bind failed: {e}", func.name());
            e
        })
    }

    fn bind(&self, func: &Arc<dyn PciFunction>) -> Result<Binding> {
        let bar = self.config.bar;
        let mode = self.config.irq_mode;

        let device = Arc::new(EduDevice::new(func.name()));

        func.enable()?;
        let enabled = Enabled(Arc::clone(func));
        func.set_master();
        device.set_state(BindState::Enabled);

        func.request_region(bar, REGION_NAME)?;
        let region = RegionClaim {
            func: Arc::clone(func),
            bar,
        };
        device.set_state(BindState::RegionClaimed);

        device.map(func.map_bar(bar)?);
        let mapping = Mapping(Arc::clone(&device));

        let ident = device.check_identity(self.config.supported_major)?;
        device.set_state(BindState::VersionChecked);

        let vector = func.alloc_irq_vectors(mode)?;
        let vectors = IrqVectors(Arc::clone(func));

        func.request_irq(vector, IRQ_NAME, mode.is_shared(), device.clone())?;
        let irq_line = IrqLine {
            func: Arc::clone(func),
            vector,
        };
        device.set_state(BindState::InterruptArmed);

        let endpoint = self.endpoints.publish(&self.config, &device)?;
        device.set_state(BindState::Ready);
        info!(
            "{}: bound as {} ({mode} vector {vector})",
            func.name(),
            endpoint.name
        );

        Ok(Binding {
            device,
            ident,
            guards: Some(Guards {
                endpoint,
                irq_line,
                vectors,
                mapping,
                region,
                enabled,
            }),
        })
    }

    /// Probe every function in `funcs`; a failure affects only its own device.
    pub fn bind_all<I>(&self, funcs: I) -> BindReport
    where
        I: IntoIterator<Item = Arc<dyn PciFunction>>,
    {
        let mut report = BindReport::default();
        for func in funcs {
            let name = func.name().to_string();
            match self.probe(func) {
                Ok(binding) => report.bound.push(binding),
                Err(EduError::NoMatch { vendor, device }) => {
                    debug!("{name}: {vendor:04x}:{device:04x} not handled");
                    report.skipped += 1;
                }
                Err(e) => report.failed.push((name, e)),
            }
        }
        report
    }

    /// Open the device published as `name`.
    ///
    /// # Errors
    ///
    /// `DeviceNotFound` if no such endpoint exists, otherwise as
    /// [`EduDevice::open`].
    pub fn open(&self, name: &str) -> Result<Session> {
        let device = self
            .endpoints
            .get(name)
            .ok_or_else(|| EduError::DeviceNotFound {
                name: name.to_string(),
            })?;
        device.open()
    }

    /// Names of published endpoints, sorted.
    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints.names()
    }

    /// Device published as `name`, if any.
    pub fn device(&self, name: &str) -> Option<Arc<EduDevice>> {
        self.endpoints.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{IrqMode, PciId};
    use crate::sim::{SimDevice, SimFunction, SimStep};

    fn sim_function(name: &str) -> Arc<SimFunction> {
        Arc::new(SimFunction::new(name, SimDevice::new()))
    }

    #[test]
    fn probe_reaches_ready_and_unbind_releases_everything() {
        let driver = EduDriver::default();
        let func = sim_function("0000:00:04.0");

        let binding = driver.probe(func.clone()).unwrap();
        assert_eq!(binding.state(), BindState::Ready);
        assert_eq!(binding.name(), "edu0");
        assert_eq!(binding.identification().major, 1);
        assert!(func.is_enabled() && func.is_master());
        assert!(func.device().irq_connected());
        assert_eq!(driver.endpoints(), vec!["edu0".to_string()]);

        let device = binding.device().clone();
        binding.unbind();
        assert_eq!(device.state(), BindState::Unbound);
        assert!(driver.endpoints().is_empty());
        assert!(!func.device().irq_connected());
        assert!(func.counters().balanced());
        assert_eq!(func.counters().released(SimStep::MapBar), 1);
    }

    #[test]
    fn non_matching_function_acquires_nothing() {
        let driver = EduDriver::default();
        let func = Arc::new(
            SimFunction::new("0000:00:05.0", SimDevice::new()).with_id(PciId {
                vendor: 0x8086,
                device: 0x100e,
            }),
        );
        let err = driver.probe(func.clone()).unwrap_err();
        assert!(matches!(err, EduError::NoMatch { vendor: 0x8086, device: 0x100e }));
        assert_eq!(func.counters().acquired(SimStep::Enable), 0);
    }

    #[test]
    fn every_failing_step_unwinds_exactly_what_it_acquired() {
        let steps = [
            SimStep::Enable,
            SimStep::RequestRegion,
            SimStep::MapBar,
            SimStep::AllocIrqVectors,
            SimStep::RequestIrq,
        ];
        for (i, step) in steps.into_iter().enumerate() {
            let driver = EduDriver::default();
            let func = Arc::new(SimFunction::new("0000:00:04.0", SimDevice::new()).fail_at(step));
            let err = driver.probe(func.clone()).unwrap_err();
            assert_eq!(err.errno() == -libc::EIO, step == SimStep::Enable, "{step:?}: {err}");

            let c = func.counters();
            for (j, earlier) in steps.into_iter().enumerate() {
                let expected = usize::from(j < i);
                assert_eq!(c.acquired(earlier), expected, "{step:?} acquired {earlier:?}");
                assert_eq!(c.released(earlier), expected, "{step:?} released {earlier:?}");
            }
            assert!(driver.endpoints().is_empty());
            assert!(!func.is_enabled());
        }
    }

    #[test]
    fn bad_identification_unwinds_mapping() {
        let driver = EduDriver::default();
        let func = Arc::new(SimFunction::new(
            "0000:00:04.0",
            SimDevice::with_identification(0x0100_00ee),
        ));
        assert!(matches!(
            driver.probe(func.clone()),
            Err(EduError::InvalidDevice { magic: 0xee })
        ));
        let c = func.counters();
        assert_eq!(c.acquired(SimStep::MapBar), 1);
        assert_eq!(c.acquired(SimStep::AllocIrqVectors), 0);
        assert!(c.balanced());

        let func = Arc::new(SimFunction::new(
            "0000:00:04.0",
            SimDevice::with_identification(0x0203_00ed),
        ));
        assert!(matches!(
            driver.probe(func),
            Err(EduError::UnsupportedVersion { major: 2, minor: 3 })
        ));
    }

    #[test]
    fn endpoint_indices_follow_bind_order_and_are_not_reused() {
        let driver = EduDriver::default();
        let a = driver.probe(sim_function("0000:00:04.0")).unwrap();
        let b = driver.probe(sim_function("0000:00:05.0")).unwrap();
        assert_eq!((a.name(), b.name()), ("edu0", "edu1"));
        assert_eq!(a.device().index(), Some(0));

        drop(a);
        let c = driver.probe(sim_function("0000:00:06.0")).unwrap();
        assert_eq!(c.name(), "edu2");
        assert_eq!(driver.endpoints(), vec!["edu1".to_string(), "edu2".to_string()]);
    }

    #[test]
    fn open_by_name() {
        let driver = EduDriver::new(DriverConfig::default().with_irq_mode(IrqMode::Legacy));
        let _binding = driver.probe(sim_function("0000:00:04.0")).unwrap();
        let session = driver.open("edu0").unwrap();
        assert!(matches!(driver.open("edu0"), Err(EduError::Busy { .. })));
        assert!(matches!(
            driver.open("edu7"),
            Err(EduError::DeviceNotFound { .. })
        ));
        assert_eq!(session.xor(0).unwrap(), u32::MAX);
    }

    #[test]
    fn bind_all_isolates_failures() {
        let driver = EduDriver::default();
        let funcs: Vec<Arc<dyn PciFunction>> = vec![
            sim_function("0000:00:04.0"),
            Arc::new(SimFunction::new("0000:00:05.0", SimDevice::new()).fail_at(SimStep::MapBar)),
            Arc::new(
                SimFunction::new("0000:00:06.0", SimDevice::new()).with_id(PciId {
                    vendor: 0x1af4,
                    device: 0x1000,
                }),
            ),
            sim_function("0000:00:07.0"),
        ];
        let report = driver.bind_all(funcs);
        assert_eq!(report.bound.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "0000:00:05.0");
        assert_eq!(report.skipped, 1);
        assert_eq!(driver.endpoints(), vec!["edu0".to_string(), "edu1".to_string()]);
    }
}
