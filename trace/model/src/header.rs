use super::{AddressSpace, Dim, Format};
use serde::{Deserialize, Serialize};

/// Aggregate memory statistics of one traced kernel execution.
///
/// Both `access` and `address` are fed once per executed memory
/// instruction (respectively once per accessed word) in program order.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub format: Format,

    pub block_dim: Dim,
    /// Number of threads per thread block the emulator steps together.
    pub thread_count: u32,

    pub dynamic_instructions: u64,
    /// One per active lane of every executed instruction.
    pub dynamic_operations: u64,

    pub const_accesses: u64,
    pub global_accesses: u64,
    pub local_accesses: u64,
    pub param_accesses: u64,
    pub shared_accesses: u64,
    pub texture_accesses: u64,

    /// Lowest global or texture address touched, zero until the first access.
    pub global_min_address: u64,
    /// Highest global or texture address touched, zero until the first access.
    pub global_max_address: u64,

    pub global_instructions: u64,
    pub texture_instructions: u64,

    pub global_bytes: u64,
    pub shared_bytes: u64,
    pub texture_bytes: u64,

    pub global_words: u64,
    pub texture_words: u64,

    /// Bytes spanned by the distinct allocations reachable through kernel parameters.
    pub global_extent: u64,

    pub global_segments: u64,
    pub halfwarps: u64,

    pub header_only: bool,
}

impl Header {
    /// Records one memory instruction moving `bytes` in `space`.
    pub fn access(&mut self, space: AddressSpace, bytes: u64) {
        match space {
            AddressSpace::Const => self.const_accesses += 1,
            AddressSpace::Global => {
                self.global_accesses += 1;
                self.global_bytes += bytes;
                self.global_instructions += 1;
            }
            AddressSpace::Local => self.local_accesses += 1,
            AddressSpace::Param => self.param_accesses += 1,
            AddressSpace::Shared => {
                self.shared_accesses += 1;
                self.shared_bytes += bytes;
            }
            AddressSpace::Texture => {
                self.texture_accesses += 1;
                self.texture_bytes += bytes;
                self.texture_instructions += 1;
            }
            AddressSpace::Generic => {}
        }
    }

    /// Records one word accessed at `addr` in `space`.
    ///
    /// Only global and texture accesses contribute to the address range.
    pub fn address(&mut self, space: AddressSpace, addr: u64) {
        if !space.is_addressed() {
            return;
        }
        self.update_address_range(addr);
        if space == AddressSpace::Texture {
            self.texture_words += 1;
        } else {
            self.global_words += 1;
        }
    }

    fn update_address_range(&mut self, addr: u64) {
        // zero doubles as the unset sentinel
        if self.global_min_address == 0 || addr < self.global_min_address {
            self.global_min_address = addr;
        }
        if self.global_max_address == 0 || addr > self.global_max_address {
            self.global_max_address = addr;
        }
    }

    /// Bytes between the lowest and highest global address touched.
    #[must_use]
    pub fn address_span(&self) -> u64 {
        self.global_max_address.saturating_sub(self.global_min_address)
    }

    /// Mean number of accesses folded into one coalescing segment.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn accesses_per_segment(&self) -> Option<f64> {
        if self.global_segments == 0 {
            return None;
        }
        Some((self.global_words + self.texture_words) as f64 / self.global_segments as f64)
    }
}

impl std::fmt::Display for Header {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        #[allow(clippy::cast_precision_loss)]
        let human = |bytes: u64| human_bytes::human_bytes(bytes as f64);
        f.debug_struct("Header")
            .field("format", &self.format)
            .field("block_dim", &self.block_dim)
            .field("dynamic_instructions", &self.dynamic_instructions)
            .field("dynamic_operations", &self.dynamic_operations)
            .field("global_accesses", &self.global_accesses)
            .field("shared_accesses", &self.shared_accesses)
            .field("texture_accesses", &self.texture_accesses)
            .field("global_bytes", &human(self.global_bytes))
            .field("global_extent", &human(self.global_extent))
            .field("global_segments", &self.global_segments)
            .field("halfwarps", &self.halfwarps)
            .field("header_only", &self.header_only)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::Header;
    use crate::AddressSpace;
    use similar_asserts as diff;

    #[test]
    fn test_address_range_and_words() {
        let mut header = Header::default();
        for addr in [100, 50, 200] {
            header.address(AddressSpace::Global, addr);
        }
        diff::assert_eq!(have: header.global_min_address, want: 50);
        diff::assert_eq!(have: header.global_max_address, want: 200);
        diff::assert_eq!(have: header.global_words, want: 3);
        diff::assert_eq!(have: header.texture_words, want: 0);
        diff::assert_eq!(have: header.address_span(), want: 150);
    }

    #[test]
    fn test_address_ignores_untracked_spaces() {
        let mut header = Header::default();
        for space in [
            AddressSpace::Const,
            AddressSpace::Local,
            AddressSpace::Param,
            AddressSpace::Shared,
        ] {
            header.address(space, 64);
        }
        diff::assert_eq!(have: header, want: Header::default());
    }

    #[test]
    fn test_texture_shares_address_range() {
        let mut header = Header::default();
        header.address(AddressSpace::Global, 400);
        header.address(AddressSpace::Texture, 16);
        header.address(AddressSpace::Texture, 800);
        diff::assert_eq!(have: header.global_min_address, want: 16);
        diff::assert_eq!(have: header.global_max_address, want: 800);
        diff::assert_eq!(have: header.global_words, want: 1);
        diff::assert_eq!(have: header.texture_words, want: 2);
        diff::assert_eq!(have: header.address_span(), want: 784);
    }

    #[test]
    fn test_access_is_additive() {
        let mut header = Header::default();
        for _ in 0..3 {
            header.access(AddressSpace::Global, 4);
        }
        diff::assert_eq!(have: header.global_accesses, want: 3);
        diff::assert_eq!(have: header.global_bytes, want: 12);
        diff::assert_eq!(have: header.global_instructions, want: 3);

        header.access(AddressSpace::Shared, 8);
        header.access(AddressSpace::Texture, 16);
        header.access(AddressSpace::Param, 4);
        diff::assert_eq!(have: header.shared_bytes, want: 8);
        diff::assert_eq!(have: header.texture_bytes, want: 16);
        diff::assert_eq!(have: header.texture_instructions, want: 1);
        diff::assert_eq!(have: header.param_accesses, want: 1);
        diff::assert_eq!(have: header.global_bytes, want: 12);
    }
}
