// SPDX-License-Identifier: AGPL-3.0-only

//! Command dispatcher
//!
//! Each control command is one short register transaction on the session's
//! device. [`Session::ioctl`] is the byte-level boundary: it decodes the
//! fixed-size request for a command number, runs the operation and writes the
//! response back in place.

use crate::completion::FactorialHandle;
use crate::device::Session;
use crate::error::{EduError, Result};
use bytemuck::{Pod, Zeroable};
use edu_chip::ioctl::Command;
use edu_chip::regs;

/// `XOR` request/response
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct XorCmd {
    /// Operand
    pub val_in: u32,
    /// Transformed value
    pub val_out: u32,
}

/// `FACTORIAL` request/response
///
/// `val_out` is not filled synchronously; the result arrives through the
/// interrupt bridge.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct FactorialCmd {
    /// Operand
    pub val_in: u32,
    /// Result slot
    pub val_out: u32,
}

/// `INTERRUPT` request
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct IntrCmd {
    /// Value raised into the interrupt status register
    pub val_in: u32,
}

fn read_request<T: Pod>(buf: &[u8]) -> T {
    bytemuck::pod_read_unaligned(&buf[..std::mem::size_of::<T>()])
}

fn write_response<T: Pod>(buf: &mut [u8], value: &T) {
    let bytes = bytemuck::bytes_of(value);
    buf[..bytes.len()].copy_from_slice(bytes);
}

impl Session {
    /// Write `operand` to the XOR register and read back the result.
    ///
    /// # Errors
    ///
    /// `NotReady` if the device has been unbound.
    pub fn xor(&self, operand: u32) -> Result<u32> {
        self.device.ensure_ready()?;
        let out = self.device.with_window(|w| {
            w.write32(regs::XOR, operand);
            w.read32(regs::XOR)
        })?;
        tracing::debug!("{}: xor {operand:#x} -> {out:#x}", self.device.pci_name());
        Ok(out)
    }

    /// Arm a factorial computation and return immediately.
    ///
    /// # Errors
    ///
    /// `Busy` if a computation is already in flight on this device,
    /// `NotReady` if the device has been unbound.
    pub fn factorial(&self, operand: u32) -> Result<FactorialHandle> {
        self.device.ensure_ready()?;
        let completion = self.device.factorial.claim()?;

        let armed = self.device.with_window(|w| {
            let status = w.read32(regs::STATUS);
            w.write32(regs::STATUS, status | regs::status::RAISE_IRQ);
            w.write32(regs::FACTORIAL, operand);
        });
        if let Err(e) = armed {
            self.device.factorial.abandon();
            return Err(e);
        }

        tracing::debug!("{}: factorial({operand}) armed", self.device.pci_name());
        Ok(FactorialHandle::new(operand, completion))
    }

    /// Force a software interrupt carrying `operand`.
    ///
    /// Completion is only observable through the interrupt bridge; see
    /// [`Session::raised_interrupts`].
    ///
    /// # Errors
    ///
    /// `NotReady` if the device has been unbound.
    pub fn raise_interrupt(&self, operand: u32) -> Result<()> {
        self.device.ensure_ready()?;
        self.device
            .with_window(|w| w.write32(regs::INTR_RAISE, operand))?;
        tracing::debug!("{}: raised interrupt {operand:#x}", self.device.pci_name());
        Ok(())
    }

    /// Run control command `cmd` with its request structure in `buf`.
    ///
    /// The response, if the command has one, overwrites `buf`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an unknown command or a short buffer, plus the
    /// errors of the selected operation.
    pub fn ioctl(&self, cmd: u32, buf: &mut [u8]) -> Result<()> {
        let command = Command::from_raw(cmd)
            .ok_or_else(|| EduError::invalid_argument(format!("unknown command {cmd:#x}")))?;
        let need = command.request_len();
        if buf.len() < need {
            return Err(EduError::invalid_argument(format!(
                "{command:?} ({:#x}) request is {} bytes, need {need}",
                command.raw(),
                buf.len()
            )));
        }

        match command {
            Command::Xor => {
                let mut req: XorCmd = read_request(buf);
                req.val_out = self.xor(req.val_in)?;
                write_response(buf, &req);
            }
            Command::Factorial => {
                let req: FactorialCmd = read_request(buf);
                // Result is delivered by the interrupt bridge.
                let _accepted = self.factorial(req.val_in)?;
            }
            Command::Interrupt => {
                let req: IntrCmd = read_request(buf);
                self.raise_interrupt(req.val_in)?;
            }
        }
        Ok(())
    }

    /// [`Session::ioctl`] with a kernel-style return: `0` or a negative errno.
    pub fn ioctl_raw(&self, cmd: u32, buf: &mut [u8]) -> i32 {
        match self.ioctl(cmd, buf) {
            Ok(()) => 0,
            Err(e) => {
                tracing::debug!("{}: ioctl {cmd:#x} failed: {e}", self.device.pci_name());
                e.errno()
            }
        }
    }
}
