//! The per-hart instruction-set simulator: architectural register state,
//! the masked CSR file, quantum-based time accounting and the interpreter
//! loop itself.

mod csrs;
mod iss;
mod quantum;
mod regs;

pub use csrs::Csrs;
pub use iss::{CoreExecStatus, Hart, HartBus, HartConfig, RunExit};
pub use quantum::{QuantumKeeper, DEFAULT_CYCLE_TIME_NS, DEFAULT_QUANTUM_NS};
pub use regs::{RegFile, REG_A0, REG_A1, REG_A2, REG_A3, REG_A7, REG_RA, REG_SP};
