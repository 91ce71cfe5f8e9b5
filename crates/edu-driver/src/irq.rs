// SPDX-License-Identifier: AGPL-3.0-only

//! Interrupt bridge
//!
//! Runs whenever the device's interrupt line fires:
//!
//! ```text
//! INTR_STATUS == 0 ─────────────────────────────▶ NotMine (no writes)
//!        │
//!        ▼
//!     STATUS
//!        │
//!  in flight && !computing
//!  && FACTORIAL_DONE latched ─▶ read FACTORIAL ──┐
//!        │                                       ├──▶ INTR_ACK ← observed INTR_STATUS
//!  otherwise ───────────────▶ record raised ─────┘
//! ```
//!
//! The acknowledge uses the status read at the top, never a re-read, and
//! happens exactly once per handled interrupt.

use crate::device::EduDevice;
use crate::platform::{InterruptHandler, IrqReturn};
use edu_chip::regs;
use std::sync::atomic::Ordering;

/// What the bridge made of one interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqOutcome {
    /// Interrupt status was zero; another device raised the line
    NotMine,
    /// A factorial completed with this result
    FactorialDone {
        /// Result read from the factorial register
        value: u32,
        /// Interrupt status that was acknowledged
        status: u32,
    },
    /// Software-raised or otherwise unsolicited interrupt
    Raised {
        /// Interrupt status that was acknowledged
        status: u32,
    },
}

impl EduDevice {
    /// Service one interrupt from this device.
    pub fn handle_interrupt(&self) -> IrqOutcome {
        let outcome = self.with_window(|w| {
            let status = w.read32(regs::INTR_STATUS);
            if status == 0 {
                return IrqOutcome::NotMine;
            }

            let device_status = w.read32(regs::STATUS);
            let completed = self.factorial.in_flight()
                && device_status & regs::status::COMPUTING == 0
                && status & regs::intr::FACTORIAL_DONE != 0;
            let outcome = if completed {
                IrqOutcome::FactorialDone {
                    value: w.read32(regs::FACTORIAL),
                    status,
                }
            } else {
                IrqOutcome::Raised { status }
            };

            w.write32(regs::INTR_ACK, status);
            outcome
        });

        // An unmapped window means teardown already freed the line.
        let outcome = outcome.unwrap_or(IrqOutcome::NotMine);

        match outcome {
            IrqOutcome::NotMine => {}
            IrqOutcome::FactorialDone { value, .. } => {
                tracing::info!("{}: factorial = {value}", self.pci_name());
                self.factorial.finish(value);
            }
            IrqOutcome::Raised { status } => {
                tracing::info!("{}: got interrupted ({status:#x})", self.pci_name());
                self.raised.count.fetch_add(1, Ordering::AcqRel);
                self.raised.last_status.store(status, Ordering::Release);
            }
        }

        outcome
    }
}

impl InterruptHandler for EduDevice {
    fn handle(&self) -> IrqReturn {
        match self.handle_interrupt() {
            IrqOutcome::NotMine => IrqReturn::None,
            IrqOutcome::FactorialDone { .. } | IrqOutcome::Raised { .. } => IrqReturn::Handled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::BindState;
    use crate::sim::{Latency, SimDevice};
    use std::sync::Arc;

    fn bound(sim: &Arc<SimDevice>) -> Arc<EduDevice> {
        let device = Arc::new(EduDevice::new("0000:00:04.0"));
        device.map(sim.clone());
        device.set_state(BindState::Ready);
        device
    }

    #[test]
    fn zero_status_is_not_mine_and_writes_nothing() {
        let sim = SimDevice::new();
        let device = bound(&sim);
        let before = sim.writes().len();

        assert_eq!(device.handle_interrupt(), IrqOutcome::NotMine);
        assert_eq!(device.handle(), IrqReturn::None);
        assert_eq!(sim.writes().len(), before);
    }

    #[test]
    fn factorial_completion_reads_result_and_acks_once() {
        let sim = SimDevice::with_latency(Latency::Manual);
        let device = bound(&sim);
        let session = device.open().unwrap();

        let handle = session.factorial(5).unwrap();
        assert!(sim.complete_factorial());
        let acks_before = sim.writes_to(regs::INTR_ACK).len();

        let outcome = device.handle_interrupt();
        assert_eq!(
            outcome,
            IrqOutcome::FactorialDone {
                value: 120,
                status: regs::intr::FACTORIAL_DONE
            }
        );
        assert_eq!(
            sim.writes_to(regs::INTR_ACK)[acks_before..],
            [regs::intr::FACTORIAL_DONE]
        );
        assert!(!session.factorial_in_flight());
        assert_eq!(handle.try_result().unwrap().unwrap(), 120);
        assert_eq!(session.last_factorial(), Some(120));
    }

    #[test]
    fn raised_interrupt_is_recorded_and_acked_with_observed_status() {
        let sim = SimDevice::with_latency(Latency::Manual);
        let device = bound(&sim);
        let session = device.open().unwrap();

        session.raise_interrupt(0xdead_f00d).unwrap();
        assert_eq!(
            device.handle_interrupt(),
            IrqOutcome::Raised { status: 0xdead_f00d }
        );
        assert_eq!(sim.writes_to(regs::INTR_ACK), vec![0xdead_f00d]);
        assert_eq!(sim.read_register(regs::INTR_STATUS), 0);
        assert_eq!(session.raised_interrupts(), (1, 0xdead_f00d));
    }

    #[test]
    fn computing_device_is_not_treated_as_completion() {
        let sim = SimDevice::with_latency(Latency::Manual);
        let device = bound(&sim);
        let session = device.open().unwrap();

        let handle = session.factorial(4).unwrap();
        // Raise while the factorial is still computing.
        session.raise_interrupt(0x10).unwrap();
        assert_eq!(device.handle_interrupt(), IrqOutcome::Raised { status: 0x10 });
        assert!(session.factorial_in_flight());
        assert!(!handle.is_complete());

        assert!(sim.complete_factorial());
        assert!(matches!(
            device.handle_interrupt(),
            IrqOutcome::FactorialDone { value: 24, .. }
        ));
    }

    #[test]
    fn raise_between_claim_and_operand_write_stays_raised() {
        let sim = SimDevice::with_latency(Latency::Manual);
        let device = bound(&sim);
        let session = device.open().unwrap();

        // Slot claimed, operand not yet written.
        let completion = device.factorial.claim().unwrap();
        sim.set_register(regs::INTR_STATUS, 0x10);
        assert_eq!(device.handle_interrupt(), IrqOutcome::Raised { status: 0x10 });
        assert!(session.factorial_in_flight());
        assert!(completion.poll_state().is_none());
        assert_eq!(session.raised_interrupts(), (1, 0x10));
    }

    #[test]
    fn unmapped_device_reports_not_mine() {
        let sim = SimDevice::new();
        sim.set_register(regs::INTR_STATUS, 1);
        let device = bound(&sim);
        device.unmap();
        assert_eq!(device.handle_interrupt(), IrqOutcome::NotMine);
    }
}
