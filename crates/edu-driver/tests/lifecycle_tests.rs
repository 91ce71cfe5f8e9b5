// SPDX-License-Identifier: AGPL-3.0-only

//! Bind, interrupt and unbind through the public API against the simulated device

use edu_driver::chip::regs;
use edu_driver::sim::{Latency, SimDevice, SimFunction, SimStep};
use edu_driver::{BindState, DriverConfig, EduDriver, EduError, IrqMode, IrqReturn};
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn bind_manual(driver: &EduDriver, address: &str) -> (Arc<SimFunction>, edu_driver::Binding) {
    let func = Arc::new(SimFunction::new(address, SimDevice::new()));
    let binding = driver.probe(func.clone()).expect("probe");
    (func, binding)
}

#[test]
fn bind_then_raise_interrupt_reports_and_acks() {
    init_tracing();
    let driver = EduDriver::default();
    let (func, binding) = bind_manual(&driver, "0000:00:04.0");
    assert_eq!(binding.state(), BindState::Ready);
    assert_eq!(binding.identification().encode(), 0x0100_00ed);

    let session = driver.open("edu0").unwrap();
    session.raise_interrupt(0xdead_f00d).unwrap();
    assert_eq!(func.device().fire_irq(), Some(IrqReturn::Handled));

    assert_eq!(session.raised_interrupts(), (1, 0xdead_f00d));
    assert_eq!(func.device().writes_to(regs::INTR_ACK), vec![0xdead_f00d]);
    assert_eq!(func.device().read_register(regs::INTR_STATUS), 0);
}

#[test]
fn factorial_completes_through_the_interrupt_line() {
    let driver = EduDriver::default();
    let (func, _binding) = bind_manual(&driver, "0000:00:04.0");
    let session = driver.open("edu0").unwrap();

    let handle = session.factorial(5).unwrap();
    assert!(!handle.is_complete());
    assert!(matches!(session.factorial(6), Err(EduError::Busy { .. })));

    // Completion asserts the line; the installed bridge resolves the handle.
    assert!(func.device().complete_factorial());
    assert_eq!(handle.try_result().unwrap().unwrap(), 120);
    assert_eq!(
        func.device().writes_to(regs::INTR_ACK),
        vec![regs::intr::FACTORIAL_DONE]
    );

    let again = session.factorial(6).unwrap();
    assert!(func.device().complete_factorial());
    assert_eq!(again.wait().unwrap(), 720);
    assert_eq!(session.last_factorial(), Some(720));
}

#[test]
fn failed_vector_allocation_releases_region_and_mapping_once() {
    let driver = EduDriver::default();
    let func = Arc::new(
        SimFunction::new("0000:00:04.0", SimDevice::new()).fail_at(SimStep::AllocIrqVectors),
    );

    let err = driver.probe(func.clone()).unwrap_err();
    assert!(matches!(err, EduError::ResourceUnavailable { .. }), "{err}");

    let c = func.counters();
    assert_eq!(c.acquired(SimStep::RequestRegion), 1);
    assert_eq!(c.released(SimStep::RequestRegion), 1);
    assert_eq!(c.acquired(SimStep::MapBar), 1);
    assert_eq!(c.released(SimStep::MapBar), 1);
    assert_eq!(c.acquired(SimStep::RequestIrq), 0);
    assert!(c.balanced());
    assert!(driver.endpoints().is_empty());
}

#[test]
fn endpoint_names_follow_bind_order() {
    let driver = EduDriver::default();
    let (_a, first) = bind_manual(&driver, "0000:00:04.0");
    let (_b, second) = bind_manual(&driver, "0000:00:05.0");
    assert_eq!(first.name(), "edu0");
    assert_eq!(second.name(), "edu1");
    assert_eq!(driver.endpoints(), ["edu0", "edu1"]);
}

#[test]
fn unbind_with_open_session_makes_operations_not_ready() {
    let driver = EduDriver::default();
    let (func, binding) = bind_manual(&driver, "0000:00:04.0");
    let session = driver.open("edu0").unwrap();
    let pending = session.factorial(3).unwrap();

    binding.unbind();

    assert!(matches!(session.xor(1), Err(EduError::NotReady)));
    assert!(matches!(session.factorial(1), Err(EduError::NotReady)));
    assert!(matches!(session.raise_interrupt(1), Err(EduError::NotReady)));
    assert!(matches!(pending.wait(), Err(EduError::NotReady)));
    assert_eq!(session.device().state(), BindState::Unbound);
    assert!(matches!(
        driver.open("edu0"),
        Err(EduError::DeviceNotFound { .. })
    ));

    // Late completion after teardown reaches no handler.
    assert!(func.device().complete_factorial());
    assert_eq!(func.device().fire_irq(), None);
    assert!(func.counters().balanced());
}

#[test]
fn shared_line_reports_not_mine_without_touching_the_device() {
    let driver = EduDriver::new(DriverConfig::default().with_irq_mode(IrqMode::Legacy));
    let (func, _binding) = bind_manual(&driver, "0000:00:04.0");
    let writes_before = func.device().writes().len();

    assert_eq!(func.device().fire_irq(), Some(IrqReturn::None));
    assert_eq!(func.device().writes().len(), writes_before);
}

#[test]
fn rejected_identification_binds_nothing() {
    let driver = EduDriver::default();
    for (raw, expect_magic) in [(0x0100_00aa_u32, true), (0x0200_00ed, false)] {
        let func = Arc::new(SimFunction::new("0000:00:04.0", SimDevice::with_identification(raw)));
        match driver.probe(func.clone()) {
            Err(EduError::InvalidDevice { magic }) => {
                assert!(expect_magic);
                assert_eq!(magic, 0xaa);
            }
            Err(EduError::UnsupportedVersion { major, .. }) => {
                assert!(!expect_magic);
                assert_eq!(major, 2);
            }
            other => panic!("unexpected probe result: {other:?}"),
        }
        assert!(func.counters().balanced());
        assert!(!func.device().irq_connected());
    }
    assert!(driver.endpoints().is_empty());
}

#[test]
fn any_minor_version_is_accepted() {
    let driver = EduDriver::default();
    let func = Arc::new(SimFunction::new(
        "0000:00:04.0",
        SimDevice::with_identification(0x0107_00ed),
    ));
    let binding = driver.probe(func).unwrap();
    assert_eq!(binding.identification().minor, 7);
    assert_eq!(binding.state(), BindState::Ready);
}

#[test]
fn threaded_latency_wait() {
    let driver = EduDriver::default();
    let device = SimDevice::with_latency(Latency::Threaded(Duration::from_millis(2)));
    let _binding = driver
        .probe(Arc::new(SimFunction::new("0000:00:04.0", device)))
        .unwrap();
    let session = driver.open("edu0").unwrap();

    let result = session
        .factorial(10)
        .unwrap()
        .wait_timeout(Duration::from_secs(5))
        .unwrap();
    assert_eq!(result, 3_628_800);
    assert!(!session.factorial_in_flight());
}
