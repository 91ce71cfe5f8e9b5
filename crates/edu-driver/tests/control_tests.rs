// SPDX-License-Identifier: AGPL-3.0-only

//! Control interface: raw commands, exclusivity, concurrent devices

use edu_driver::chip;
use edu_driver::sim::{Latency, SimDevice, SimFunction};
use edu_driver::{EduDriver, EduError, FactorialCmd, IntrCmd, XorCmd};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn threaded(driver: &EduDriver, address: &str) -> edu_driver::Binding {
    let device = SimDevice::with_latency(Latency::Threaded(Duration::from_millis(1)));
    driver
        .probe(Arc::new(SimFunction::new(address, device)))
        .expect("probe")
}

#[test]
fn unknown_command_is_einval() {
    let driver = EduDriver::default();
    let _binding = threaded(&driver, "0000:00:04.0");
    let session = driver.open("edu0").unwrap();

    let mut buf = [0u8; 8];
    assert_eq!(session.ioctl_raw(0xdead_beef, &mut buf), -libc::EINVAL);
    // Right group and number, wrong direction bits.
    assert_eq!(session.ioctl_raw(chip::XOR & 0x3fff_ffff, &mut buf), -libc::EINVAL);
}

#[test]
fn raw_xor_round_trip() {
    let driver = EduDriver::default();
    let _binding = threaded(&driver, "0000:00:04.0");
    let session = driver.open("edu0").unwrap();

    for value in [0u32, 1, 0x1234_5678, 0xffff_0000, u32::MAX] {
        let mut cmd = XorCmd {
            val_in: value,
            val_out: 0,
        };
        assert_eq!(session.ioctl_raw(chip::XOR, bytemuck::bytes_of_mut(&mut cmd)), 0);
        assert_eq!(cmd.val_out, !value);

        let mut back = XorCmd {
            val_in: cmd.val_out,
            val_out: 0,
        };
        session.ioctl(chip::XOR, bytemuck::bytes_of_mut(&mut back)).unwrap();
        assert_eq!(back.val_out, value);
    }
}

#[test]
fn raw_factorial_and_interrupt_commands() {
    let driver = EduDriver::default();
    let binding = threaded(&driver, "0000:00:04.0");
    let session = driver.open("edu0").unwrap();

    let mut fact = FactorialCmd { val_in: 7, val_out: 0 };
    assert_eq!(session.ioctl_raw(chip::FACTORIAL, bytemuck::bytes_of_mut(&mut fact)), 0);

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while session.last_factorial() != Some(5040) {
        assert!(std::time::Instant::now() < deadline, "factorial never completed");
        thread::sleep(Duration::from_millis(1));
    }

    let mut intr = IntrCmd { val_in: 0x40 };
    assert_eq!(session.ioctl_raw(chip::INTERRUPT, bytemuck::bytes_of_mut(&mut intr)), 0);
    while session.raised_interrupts().0 == 0 {
        assert!(std::time::Instant::now() < deadline, "raised interrupt never delivered");
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(session.raised_interrupts(), (1, 0x40));
    assert_eq!(binding.device().handle_interrupt(), edu_driver::IrqOutcome::NotMine);
}

#[test]
fn second_open_is_busy() {
    let driver = EduDriver::default();
    let _binding = threaded(&driver, "0000:00:04.0");

    let first = driver.open("edu0").unwrap();
    assert_eq!(driver.open("edu0").unwrap_err().errno(), -libc::EBUSY);
    first.close();
    assert!(driver.open("edu0").is_ok());
}

#[test]
fn two_devices_compute_concurrently() {
    let driver = EduDriver::default();
    let _a = threaded(&driver, "0000:00:04.0");
    let _b = threaded(&driver, "0000:00:05.0");

    let sessions = [driver.open("edu0").unwrap(), driver.open("edu1").unwrap()];
    let handles: Vec<_> = sessions
        .iter()
        .zip([5u32, 8])
        .map(|(session, n)| session.factorial(n).unwrap())
        .collect();

    let results: Vec<u32> = thread::scope(|scope| {
        let workers: Vec<_> = handles
            .iter()
            .map(|handle| scope.spawn(move || handle.wait_timeout(Duration::from_secs(5))))
            .collect();
        workers
            .into_iter()
            .map(|w| w.join().unwrap().unwrap())
            .collect()
    });
    assert_eq!(results, [120, 40_320]);
}

#[test]
fn operations_after_driver_drop_keep_bindings() {
    let driver = EduDriver::default();
    let binding = threaded(&driver, "0000:00:04.0");
    let session = binding.device().open().unwrap();
    drop(driver);

    assert_eq!(session.xor(0xf0).unwrap(), !0xf0);
    drop(binding);
    assert!(matches!(session.xor(0xf0), Err(EduError::NotReady)));
    assert!(matches!(session.device().open(), Err(EduError::NotReady)));
}

#[test]
fn factorial_of_max_operand_wraps_to_zero_promptly() {
    let driver = EduDriver::default();
    let _binding = threaded(&driver, "0000:00:04.0");
    let session = driver.open("edu0").unwrap();

    let started = std::time::Instant::now();
    let result = session
        .factorial(u32::MAX)
        .unwrap()
        .wait_timeout(Duration::from_secs(5))
        .unwrap();
    assert_eq!(result, 0);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(session.xor(1).unwrap(), !1);
}
