//! Data model of memory traces.
//!
//! Shared by the trace generator that writes traces and by tools reading them back.

pub mod active_mask;
pub mod dim;
pub mod entry;
pub mod event;
pub mod header;
pub mod space;

pub use active_mask::{ActiveMask, ToBitString};
pub use dim::Dim;
pub use entry::{Format, TraceEntry};
pub use event::{Access, Event, TraceEvent};
pub use header::Header;
pub use space::{AddressSpace, Opcode};

/// Number of access records emitted per active lane of a texture fetch,
/// one per fetched component.
pub const TEXTURE_COMPONENTS: usize = 4;
