use super::{ActiveMask, AddressSpace, Dim, Opcode};
use serde::{Deserialize, Serialize};

/// One executed instruction as reported by the emulation backend.
///
/// `memory_addresses` and `memory_sizes` hold one entry per *active* lane,
/// in ascending lane order. Which lane an entry belongs to is recovered
/// from the active mask.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Program counter of the instruction.
    pub pc: u64,
    pub opcode: Opcode,
    /// Declared address space of the instruction.
    pub address_space: AddressSpace,
    /// Coordinates of the issuing thread block.
    pub block_id: Dim,
    pub active: ActiveMask,
    #[serde(default)]
    pub memory_addresses: Vec<u64>,
    #[serde(default)]
    pub memory_sizes: Vec<u32>,
}

/// A single access made by one lane.
#[derive(Debug, Default, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct Access {
    pub address: u64,
    /// Size of the access in bytes.
    pub size: u32,
    /// Thread id of the lane within its thread block.
    pub thread_id: u32,
}

/// Trace record of one executed memory or texture instruction.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub pc: u64,
    pub opcode: Opcode,
    pub address_space: AddressSpace,
    /// Coordinates of the issuing thread block.
    pub cta: Dim,
    pub accesses: Vec<Access>,
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:<4} [{}] pc={:#06x} cta={} accesses={}",
            self.opcode,
            self.address_space,
            self.pc,
            self.cta,
            self.accesses.len()
        )
    }
}
