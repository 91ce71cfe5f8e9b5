// SPDX-License-Identifier: AGPL-3.0-only

//! `edu`: command-line interface for the edu PCI device.
//!
//! ```text
//! USAGE:
//!   edu enumerate                    List edu functions in sysfs
//!   edu info                         Bind and print identification
//!   edu xor <value>                  Run one XOR transaction
//!   edu factorial <n>                Compute n! through the interrupt path
//!   edu intr <value>                 Raise a software interrupt
//!   edu selftest                     xor, factorial and intr in sequence
//!   edu bind-vfio <pcie-addr>        Bind a function to vfio-pci (root)
//!   edu iommu-group <pcie-addr>      IOMMU group of a function
//! ```
//!
//! Device commands run against an in-process simulated device unless
//! `--vfio <pcie-addr>` selects a real one.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use edu_driver::sim::{Latency, SimDevice, SimFunction};
use edu_driver::{Binding, DriverConfig, EduDriver, IrqMode, PciFunction, Session, VfioFunction};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "edu", about = "QEMU edu device CLI", version)]
struct Cli {
    #[command(flatten)]
    target: Target,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Args)]
struct Target {
    /// Use the function at this PCIe address through VFIO instead of the simulator.
    #[arg(long, global = true, value_name = "PCIE_ADDR")]
    vfio: Option<String>,

    /// Interrupt mode (msi or legacy); overrides EDU_IRQ_MODE.
    #[arg(long, global = true)]
    irq_mode: Option<IrqMode>,

    /// Simulated factorial latency in milliseconds.
    #[arg(long, global = true, default_value_t = 1)]
    sim_latency_ms: u64,

    /// How long to wait for interrupt-driven results, in milliseconds.
    #[arg(long, global = true, default_value_t = 1000)]
    timeout_ms: u64,
}

#[derive(Subcommand)]
enum Cmd {
    /// List edu functions found in sysfs.
    Enumerate,
    /// Bind the device and print its identification.
    Info,
    /// Write a value to the XOR register and read back the result.
    Xor {
        /// Operand (decimal or 0x-prefixed hex).
        #[arg(value_parser = parse_u32)]
        value: u32,
    },
    /// Compute a factorial; the result arrives through the device interrupt.
    Factorial {
        /// Operand (decimal or 0x-prefixed hex).
        #[arg(value_parser = parse_u32)]
        n: u32,
    },
    /// Raise a software interrupt carrying a value.
    Intr {
        /// Value raised into the interrupt status register.
        #[arg(value_parser = parse_u32)]
        value: u32,
    },
    /// Run xor, factorial and intr against the device.
    Selftest,
    /// Bind a function to vfio-pci (requires root / CAP_SYS_ADMIN).
    BindVfio {
        /// PCIe address (e.g. 0000:00:04.0).
        pcie_addr: String,
    },
    /// Query the IOMMU group for a function.
    IommuGroup {
        /// PCIe address (e.g. 0000:00:04.0).
        pcie_addr: String,
    },
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(&hex.replace('_', ""), 16),
        None => s.replace('_', "").parse(),
    };
    parsed.map_err(|e| format!("'{s}': {e}"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Enumerate => cmd_enumerate()?,
        Cmd::BindVfio { pcie_addr } => cmd_bind_vfio(&pcie_addr)?,
        Cmd::IommuGroup { pcie_addr } => cmd_iommu_group(&pcie_addr)?,
        Cmd::Info => with_device(&cli.target, |binding, _| cmd_info(binding))?,
        Cmd::Xor { value } => with_device(&cli.target, |_, session| cmd_xor(session, value))?,
        Cmd::Factorial { n } => {
            let timeout = cli.target.timeout();
            with_device(&cli.target, |_, session| cmd_factorial(session, n, timeout))?;
        }
        Cmd::Intr { value } => {
            let timeout = cli.target.timeout();
            with_device(&cli.target, |_, session| cmd_intr(session, value, timeout))?;
        }
        Cmd::Selftest => {
            let timeout = cli.target.timeout();
            with_device(&cli.target, |_, session| cmd_selftest(session, timeout))?;
        }
    }

    Ok(())
}

impl Target {
    const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn function(&self) -> Result<Arc<dyn PciFunction>> {
        match &self.vfio {
            Some(addr) => {
                let func = VfioFunction::open(addr)
                    .with_context(|| format!("opening {addr} through VFIO"))?;
                Ok(Arc::new(func))
            }
            None => {
                let latency = Latency::Threaded(Duration::from_millis(self.sim_latency_ms));
                Ok(Arc::new(SimFunction::new(
                    "sim:00:04.0",
                    SimDevice::with_latency(latency),
                )))
            }
        }
    }
}

/// Bind the selected device, open its endpoint and run `f`.
fn with_device<F>(target: &Target, f: F) -> Result<()>
where
    F: FnOnce(&Binding, &Session) -> Result<()>,
{
    let mut config = DriverConfig::from_env()?;
    if let Some(mode) = target.irq_mode {
        config = config.with_irq_mode(mode);
    }

    let driver = EduDriver::new(config);
    let binding = driver.probe(target.function()?)?;
    let session = driver.open(binding.name())?;
    f(&binding, &session)
}

fn cmd_enumerate() -> Result<()> {
    let devices = edu_driver::discovery::discover()?;

    println!("edu devices: {}", devices.len());
    for dev in &devices {
        println!(
            "  {}  {}  driver={}  iommu_group={}",
            dev.address,
            dev.id,
            dev.driver.as_deref().unwrap_or("-"),
            dev.iommu_group
                .map_or_else(|| "-".to_string(), |g| g.to_string())
        );
    }
    if devices.is_empty() {
        println!("  (none; lspci -d {})", edu_driver::chip::lspci_filter());
    }
    Ok(())
}

fn cmd_info(binding: &Binding) -> Result<()> {
    let ident = binding.identification();
    let device = binding.device();
    println!("Endpoint     : {}", binding.name());
    println!("PCIe address : {}", device.pci_name());
    println!("Version      : {}.{}", ident.major, ident.minor);
    println!("Magic        : {:#04x}", ident.magic);
    println!("State        : {}", binding.state());
    Ok(())
}

fn cmd_xor(session: &Session, value: u32) -> Result<()> {
    let out = session.xor(value)?;
    println!("xor({value:#010x}) = {out:#010x}");
    Ok(())
}

fn cmd_factorial(session: &Session, n: u32, timeout: Duration) -> Result<()> {
    let started = Instant::now();
    let value = session.factorial(n)?.wait_timeout(timeout)?;
    println!("{n}! = {value}  ({:.1?})", started.elapsed());
    Ok(())
}

fn cmd_intr(session: &Session, value: u32, timeout: Duration) -> Result<()> {
    let (before, _) = session.raised_interrupts();
    session.raise_interrupt(value)?;

    let deadline = Instant::now() + timeout;
    loop {
        let (count, status) = session.raised_interrupts();
        if count > before {
            println!("interrupt delivered: status {status:#010x}");
            return Ok(());
        }
        if Instant::now() >= deadline {
            bail!("interrupt {value:#x} not delivered within {timeout:?}");
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn cmd_selftest(session: &Session, timeout: Duration) -> Result<()> {
    for value in [0u32, 0x1234_5678, u32::MAX] {
        let once = session.xor(value)?;
        let twice = session.xor(once)?;
        if twice != value {
            bail!("xor({value:#x}) twice gave {twice:#x}");
        }
    }
    println!("xor        ok");

    for (n, expected) in [(0u32, 1u32), (5, 120), (12, 479_001_600)] {
        let got = session.factorial(n)?.wait_timeout(timeout)?;
        if got != expected {
            bail!("factorial({n}) = {got}, expected {expected}");
        }
    }
    println!("factorial  ok");

    cmd_intr(session, 0xdead_f00d, timeout)?;
    println!("intr       ok");
    Ok(())
}

fn cmd_bind_vfio(pcie_addr: &str) -> Result<()> {
    println!("Binding {pcie_addr} to vfio-pci ...");
    edu_driver::vfio::bind_to_vfio(pcie_addr)?;
    let group = iommu_group(pcie_addr)?;
    println!("Done. IOMMU group: {group}");
    println!("Grant access:  sudo chown $USER /dev/vfio/{group}");
    Ok(())
}

fn cmd_iommu_group(pcie_addr: &str) -> Result<()> {
    let group = iommu_group(pcie_addr)?;
    println!("IOMMU group for {pcie_addr}: {group}");
    println!("Device file: /dev/vfio/{group}");
    Ok(())
}

fn iommu_group(pcie_addr: &str) -> Result<u32> {
    Ok(edu_driver::discovery::iommu_group(
        Path::new(edu_driver::discovery::SYSFS_PCI_DEVICES),
        pcie_addr,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_hex_and_decimal() {
        assert_eq!(parse_u32("0xdeadf00d"), Ok(0xdead_f00d));
        assert_eq!(parse_u32("1_000"), Ok(1000));
        assert!(parse_u32("-1").is_err());
        assert!(parse_u32("0x1_0000_0000").is_err());
    }

    #[test]
    fn selftest_against_simulator() {
        let cli = Cli::try_parse_from(["edu", "selftest", "--timeout-ms", "5000"]).unwrap();
        let timeout = cli.target.timeout();
        with_device(&cli.target, |_, session| cmd_selftest(session, timeout)).unwrap();
    }
}
