pub mod emu;

use super::address;
use crate::allocation::OverlapError;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("out of device memory: requested {requested} bytes with {available} bytes available")]
    OutOfMemory { requested: u64, available: u64 },

    #[error("{0:#x} is not a live device allocation")]
    InvalidPointer(address),

    #[error("access of {num_bytes} bytes at {ptr:#x} exceeds its allocation")]
    OutOfBounds { ptr: address, num_bytes: u64 },

    #[error("allocation of {0} x {1} bytes overflows the address space")]
    SizeOverflow(u64, u64),

    #[error("unknown symbol {0:?}")]
    UnknownSymbol(String),

    #[error(transparent)]
    Overlap(#[from] OverlapError),
}

/// Raw memory primitives of a device execution backend.
///
/// All operations are blocking and complete or fail before returning.
pub trait Device {
    /// Allocates `num_bytes` of device memory.
    fn allocate(&mut self, num_bytes: u64) -> Result<address, DeviceError>;

    /// Fills `num_bytes` starting at `ptr` with zeros.
    fn zero(&mut self, ptr: address, num_bytes: u64) -> Result<(), DeviceError>;

    /// Copies `num_bytes` starting at `ptr` back to the host.
    fn copy_to_host(&self, ptr: address, num_bytes: u64) -> Result<Vec<u8>, DeviceError>;

    /// Releases the allocation starting at `ptr`.
    fn free(&mut self, ptr: address) -> Result<(), DeviceError>;

    /// Binds `ptr` to the device visible symbol `symbol`.
    fn bind_symbol(&mut self, symbol: &str, ptr: address) -> Result<(), DeviceError>;
}
