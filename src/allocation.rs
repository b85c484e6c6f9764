use super::address;
use trace_model::AddressSpace;

/// A live memory allocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Allocation {
    pub id: usize,
    pub name: Option<String>,
    pub start_addr: address,
    pub end_addr: address,
    pub space: AddressSpace,
}

impl Allocation {
    #[must_use]
    pub fn num_bytes(&self) -> u64 {
        self.end_addr.saturating_sub(self.start_addr)
    }

    #[must_use]
    pub fn contains(&self, addr: address) -> bool {
        (self.start_addr..self.end_addr).contains(&addr)
    }
}

impl std::cmp::Ord for Allocation {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl std::cmp::PartialOrd for Allocation {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for Allocation {
    #[allow(clippy::cast_precision_loss)]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocation")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("space", &self.space)
            .field("start_addr", &format_args!("{:#x}", self.start_addr))
            .field("end_addr", &format_args!("{:#x}", self.end_addr))
            .field(
                "size",
                &human_bytes::human_bytes(self.num_bytes() as f64),
            )
            .finish()
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("allocation {range:#x?} overlaps an existing allocation")]
pub struct OverlapError {
    pub range: std::ops::Range<address>,
}

/// Table of non-overlapping allocations, searchable by any address they contain.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Allocations {
    ranges: rangemap::RangeMap<address, Allocation>,
    /// Ids are never reused, even after a removal.
    next_id: usize,
}

impl std::ops::Deref for Allocations {
    type Target = rangemap::RangeMap<address, Allocation>;

    fn deref(&self) -> &Self::Target {
        &self.ranges
    }
}

impl Allocations {
    pub fn insert(
        &mut self,
        range: std::ops::Range<address>,
        name: Option<String>,
        space: AddressSpace,
    ) -> Result<&Allocation, OverlapError> {
        if range.is_empty() || self.ranges.overlaps(&range) {
            return Err(OverlapError { range });
        }
        // ids start at one
        self.next_id += 1;
        let id = self.next_id;
        let start_addr = range.start;
        self.ranges.insert(
            range.clone(),
            Allocation {
                id,
                name,
                start_addr,
                end_addr: range.end,
                space,
            },
        );
        self.ranges
            .get(&start_addr)
            .ok_or(OverlapError { range })
    }

    /// Removes the allocation starting at `start_addr`.
    pub fn remove(&mut self, start_addr: address) -> Option<Allocation> {
        let (range, allocation) = self.ranges.get_key_value(&start_addr)?;
        if range.start != start_addr {
            return None;
        }
        let (range, allocation) = (range.clone(), allocation.clone());
        self.ranges.remove(range);
        Some(allocation)
    }

    /// The allocation containing `addr`, if any.
    #[must_use]
    pub fn find(&self, addr: address) -> Option<&Allocation> {
        self.ranges.get(&addr)
    }

    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.ranges.iter().map(|(_, allocation)| allocation.num_bytes()).sum()
    }
}

/// Answers which live allocation an address belongs to.
///
/// Two tables are consulted independently: allocations of module-scope
/// global variables and generic allocations of the currently selected device.
pub trait AllocationResolver {
    fn global_allocation(&self, addr: address) -> Option<&Allocation>;

    fn device_allocation(&self, addr: address) -> Option<&Allocation>;
}

impl AllocationResolver for (Allocations, Allocations) {
    fn global_allocation(&self, addr: address) -> Option<&Allocation> {
        self.0.find(addr)
    }

    fn device_allocation(&self, addr: address) -> Option<&Allocation> {
        self.1.find(addr)
    }
}
