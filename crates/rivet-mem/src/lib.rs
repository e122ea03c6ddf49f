//! Physical-address plumbing shared by the platform: port decoding, RAM,
//! the bus lock, the LR/SC reservation set and direct-memory fast paths.
//!
//! The concrete system bus (which devices sit at which addresses) is
//! assembled by the machine crate; this crate provides the pieces and the
//! [`BusPort`] trait the interpreter and MMU issue accesses through.

mod bus;
mod dmi;
mod lock;
mod ram;
mod resv;

pub use bus::{BusError, BusPort, PortMapping};
pub use dmi::DmiRange;
pub use lock::BusLock;
pub use ram::Ram;
pub use resv::ReservationSet;
