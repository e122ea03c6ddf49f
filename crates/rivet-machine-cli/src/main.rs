use std::fs;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use rivet_gdb::{Disposition, GdbServer};
use rivet_machine::{load_elf, write_signature, Machine, MachineConfig};
use tracing_subscriber::EnvFilter;

/// Cycle-approximate RISC-V virtual platform.
#[derive(Debug, Parser)]
#[command(name = "rivet-machine", version)]
struct Args {
    /// RISC-V ELF executable to simulate.
    elf: PathBuf,

    /// Guest RAM start address.
    #[arg(long, default_value_t = 0x0, value_parser = parse_u64)]
    memory_start: u64,

    /// Guest RAM size in bytes.
    #[arg(long, default_value_t = 32 * 1024 * 1024)]
    memory_size: usize,

    /// Use the E instead of the I integer base ISA.
    #[arg(long = "use-E-base-isa")]
    use_e_base_isa: bool,

    /// Override the ELF entry point (ISS program counter).
    #[arg(long, value_parser = parse_u64)]
    entry_point: Option<u64>,

    /// Proxy newlib syscalls to the host instead of trapping ECALL.
    #[arg(long)]
    intercept_syscalls: bool,

    /// Wait for a GDB connection before executing.
    #[arg(long)]
    debug_mode: bool,

    /// TCP port for the GDB stub (loopback only).
    #[arg(long, default_value_t = 5005)]
    debug_port: u16,

    /// Log every retired instruction.
    #[arg(long)]
    trace_mode: bool,

    /// Scheduling quantum in nanoseconds.
    #[arg(long, default_value_t = 10_000)]
    tlm_global_quantum: u64,

    /// Fetch instructions directly from RAM, skipping bus routing.
    #[arg(long)]
    use_instr_dmi: bool,

    /// Issue data accesses directly to RAM, skipping bus routing.
    #[arg(long)]
    use_data_dmi: bool,

    /// Shorthand for --use-instr-dmi --use-data-dmi.
    #[arg(long)]
    use_dmi: bool,

    /// Write the RISC-V compliance signature to this file.
    #[arg(long)]
    signature: Option<PathBuf>,

    /// Number of harts.
    #[arg(long, default_value_t = 1)]
    num_harts: usize,
}

fn parse_u64(s: &str) -> Result<u64, std::num::ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    }
}


fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.trace_mode { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let elf_data = fs::read(&args.elf)
        .with_context(|| format!("reading executable {}", args.elf.display()))?;
    let image = load_elf(&elf_data)
        .with_context(|| format!("loading executable {}", args.elf.display()))?;

    if args.num_harts == 0 {
        bail!("at least one hart is required");
    }

    let config = MachineConfig {
        mem_start: args.memory_start,
        mem_size: args.memory_size,
        num_harts: args.num_harts,
        e_base: args.use_e_base_isa,
        intercept_syscalls: args.intercept_syscalls,
        trace: args.trace_mode,
        quantum_ns: args.tlm_global_quantum.max(10),
        entry_point: args.entry_point,
        use_instr_dmi: args.use_instr_dmi || args.use_dmi,
        use_data_dmi: args.use_data_dmi || args.use_dmi,
        ..MachineConfig::default()
    };
    let mut machine = Machine::new(&config, &image).context("assembling the platform")?;

    let killed = if args.debug_mode {
        machine.debug_attach();
        let server = GdbServer::bind(args.debug_port)
            .with_context(|| format!("binding gdb stub to port {}", args.debug_port))?;
        server.serve(&mut machine).context("gdb session")? == Disposition::Kill
    } else {
        false
    };

    if !killed {
        // Free-running (or post-detach) execution to the guest's exit.
        let code = machine.run().context("simulation failed")?;
        tracing::info!(code, "guest exited");
    }

    machine.show();

    if let Some(path) = &args.signature {
        let (begin, end) = match (machine.begin_signature, machine.end_signature) {
            (Some(b), Some(e)) => (b, e),
            _ => bail!("executable carries no begin_signature/end_signature symbols"),
        };
        let file = File::create(path)
            .with_context(|| format!("creating signature file {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        write_signature(&mut writer, &machine.bus.ram, machine.mem_start, begin, end)
            .context("writing signature")?;
        tracing::info!(path = %path.display(), begin, end, "signature written");
    }

    Ok(())
}
