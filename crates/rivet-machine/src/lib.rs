//! Platform assembly: the system bus with its memory map, the ELF loader,
//! the host syscall proxy, the cooperative simulation driver, and the
//! debug-target glue for the GDB stub.

mod bus;
mod debug;
mod loader;
mod machine;
mod sig;
mod syscall;

pub use bus::{IrqEvent, SystemBus, CLINT_BASE, PLIC_BASE};
pub use loader::{load_elf, LoadRecord, LoadedImage, LoaderError};
pub use machine::{Machine, MachineConfig, MachineError};
pub use sig::write_signature;
pub use syscall::SyscallHandler;
