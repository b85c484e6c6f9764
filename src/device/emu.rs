//! Host memory backed device.

use super::DeviceError;
use crate::address;
use crate::allocation::{Allocation, AllocationResolver, Allocations};
use std::collections::HashMap;
use trace_model::AddressSpace;

pub const DEV_GLOBAL_HEAP_START: address = 0xC000_0000;
pub const ALIGNMENT_BYTES: u64 = 256;

#[must_use]
pub fn align(num_bytes: u64) -> Option<u64> {
    num_bytes.checked_next_multiple_of(ALIGNMENT_BYTES)
}

fn end_of(ptr: address, num_bytes: u64) -> Result<address, DeviceError> {
    ptr.checked_add(num_bytes)
        .ok_or(DeviceError::SizeOverflow(1, num_bytes))
}

#[derive(Debug, Clone)]
pub struct Device {
    /// Backing memory keyed by allocation start address, created on first write.
    buffers: HashMap<address, Vec<u8>>,
    allocations: Allocations,
    globals: Allocations,
    /// Declared symbols and the address bound to them.
    symbols: HashMap<String, Option<address>>,
    offset: address,
    capacity: Option<u64>,
}

impl Default for Device {
    fn default() -> Self {
        Self {
            buffers: HashMap::new(),
            allocations: Allocations::default(),
            globals: Allocations::default(),
            symbols: HashMap::new(),
            offset: DEV_GLOBAL_HEAP_START,
            capacity: None,
        }
    }
}

impl Device {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Device limited to `capacity` bytes of live allocations.
    #[must_use]
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    /// Declares a device visible symbol that can later be bound.
    pub fn declare_symbol(&mut self, symbol: impl Into<String>) {
        self.symbols.entry(symbol.into()).or_insert(None);
    }

    /// Address bound to `symbol`, if declared and bound.
    #[must_use]
    pub fn symbol(&self, symbol: &str) -> Option<address> {
        self.symbols.get(symbol).copied().flatten()
    }

    #[must_use]
    pub fn allocations(&self) -> &Allocations {
        &self.allocations
    }

    /// Bytes held by live device allocations.
    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        self.allocations.total_bytes()
    }

    /// Registers a module scope global variable.
    pub fn register_global(
        &mut self,
        name: impl Into<String>,
        ptr: address,
        num_bytes: u64,
    ) -> Result<&Allocation, DeviceError> {
        let end = end_of(ptr, num_bytes)?;
        let allocation = self
            .globals
            .insert(ptr..end, Some(name.into()), AddressSpace::Global)?;
        Ok(allocation)
    }

    /// Maps a device allocation at a fixed address.
    pub fn map_allocation(
        &mut self,
        ptr: address,
        num_bytes: u64,
        name: Option<String>,
    ) -> Result<(), DeviceError> {
        let end = end_of(ptr, num_bytes)?;
        self.allocations
            .insert(ptr..end, name, AddressSpace::Global)?;
        if let Some(next) = align(end) {
            self.offset = self.offset.max(next);
        }
        Ok(())
    }

    /// Allocation holding `ptr..ptr + num_bytes` and the offset of `ptr` within it.
    fn locate(&self, ptr: address, num_bytes: u64) -> Result<(&Allocation, usize), DeviceError> {
        let allocation = self
            .allocations
            .find(ptr)
            .ok_or(DeviceError::InvalidPointer(ptr))?;
        let offset = ptr - allocation.start_addr;
        if offset
            .checked_add(num_bytes)
            .map_or(true, |end| end > allocation.num_bytes())
        {
            return Err(DeviceError::OutOfBounds { ptr, num_bytes });
        }
        Ok((allocation, offset as usize))
    }

    fn buffer_mut(
        &mut self,
        ptr: address,
        num_bytes: u64,
    ) -> Result<(&mut [u8], usize), DeviceError> {
        let (allocation, offset) = self.locate(ptr, num_bytes)?;
        let (start_addr, size) = (allocation.start_addr, allocation.num_bytes());
        let buffer = self
            .buffers
            .entry(start_addr)
            .or_insert_with(|| vec![0; size as usize]);
        Ok((buffer.as_mut_slice(), offset))
    }

    /// Copies `data` from the host to `ptr`.
    pub fn copy_from_host(&mut self, ptr: address, data: &[u8]) -> Result<(), DeviceError> {
        let (buffer, offset) = self.buffer_mut(ptr, data.len() as u64)?;
        buffer[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Adds `value` to the little endian 64-bit counter at `ptr`.
    ///
    /// Returns the previous value.
    pub fn fetch_add_u64(&mut self, ptr: address, value: u64) -> Result<u64, DeviceError> {
        let (buffer, offset) = self.buffer_mut(ptr, 8)?;
        let slot = &mut buffer[offset..offset + 8];
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(slot);
        let old = u64::from_le_bytes(bytes);
        slot.copy_from_slice(&old.wrapping_add(value).to_le_bytes());
        Ok(old)
    }
}

impl super::Device for Device {
    fn allocate(&mut self, num_bytes: u64) -> Result<address, DeviceError> {
        let aligned =
            align(num_bytes.max(1)).ok_or(DeviceError::SizeOverflow(1, num_bytes))?;
        if let Some(capacity) = self.capacity {
            let available = capacity.saturating_sub(self.used_bytes());
            if aligned > available {
                return Err(DeviceError::OutOfMemory {
                    requested: num_bytes,
                    available,
                });
            }
        }
        let ptr = self.offset;
        let end = end_of(ptr, aligned)?;
        self.allocations
            .insert(ptr..end, None, AddressSpace::Global)?;
        self.offset = end;
        log::debug!(
            "allocated {} at {:#x}",
            human_bytes::human_bytes(num_bytes as f64),
            ptr
        );
        Ok(ptr)
    }

    fn zero(&mut self, ptr: address, num_bytes: u64) -> Result<(), DeviceError> {
        let (allocation, offset) = self.locate(ptr, num_bytes)?;
        let start_addr = allocation.start_addr;
        // untouched memory reads as zero already
        if let Some(buffer) = self.buffers.get_mut(&start_addr) {
            buffer[offset..offset + num_bytes as usize].fill(0);
        }
        Ok(())
    }

    fn copy_to_host(&self, ptr: address, num_bytes: u64) -> Result<Vec<u8>, DeviceError> {
        let (allocation, offset) = self.locate(ptr, num_bytes)?;
        let bytes = match self.buffers.get(&allocation.start_addr) {
            Some(buffer) => buffer[offset..offset + num_bytes as usize].to_vec(),
            None => vec![0; num_bytes as usize],
        };
        Ok(bytes)
    }

    fn free(&mut self, ptr: address) -> Result<(), DeviceError> {
        let allocation = self
            .allocations
            .remove(ptr)
            .ok_or(DeviceError::InvalidPointer(ptr))?;
        self.buffers.remove(&ptr);
        for bound in self.symbols.values_mut() {
            if *bound == Some(ptr) {
                *bound = None;
            }
        }
        log::debug!(
            "freed {} at {:#x}",
            human_bytes::human_bytes(allocation.num_bytes() as f64),
            ptr
        );
        Ok(())
    }

    fn bind_symbol(&mut self, symbol: &str, ptr: address) -> Result<(), DeviceError> {
        let bound = self
            .symbols
            .get_mut(symbol)
            .ok_or_else(|| DeviceError::UnknownSymbol(symbol.to_string()))?;
        *bound = Some(ptr);
        log::debug!("bound {symbol} to {ptr:#x}");
        Ok(())
    }
}

impl AllocationResolver for Device {
    fn global_allocation(&self, addr: address) -> Option<&Allocation> {
        self.globals.find(addr)
    }

    fn device_allocation(&self, addr: address) -> Option<&Allocation> {
        self.allocations.find(addr)
    }
}
