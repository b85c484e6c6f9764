use trace_model::Header;

/// Why an access starts a new coalescing segment.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, strum::Display)]
pub enum SegmentCause {
    /// The lane lies in the second half-warp.
    HalfWarp,
    /// The address does not continue the previous access.
    Discontinuity,
}

impl SegmentCause {
    pub fn record(self, header: &mut Header) {
        header.global_segments += 1;
        if self == Self::HalfWarp {
            header.halfwarps += 1;
        }
    }
}

/// Groups the ordered lane accesses of one instruction into segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coalescer {
    half_warp: u32,
    /// Address continuing the previous access.
    next_address: Option<u64>,
}

impl Coalescer {
    #[must_use]
    pub fn new(thread_count: u32) -> Self {
        Self {
            half_warp: thread_count / 2,
            next_address: None,
        }
    }

    /// Observes the access of `lane` and reports whether it opens a segment.
    ///
    /// The first access of an instruction always opens one.
    pub fn observe(&mut self, lane: u32, addr: u64, size: u32) -> Option<SegmentCause> {
        let cause = if lane > self.half_warp {
            Some(SegmentCause::HalfWarp)
        } else if self.next_address != Some(addr) {
            Some(SegmentCause::Discontinuity)
        } else {
            None
        };
        self.next_address = Some(addr.wrapping_add(u64::from(size)));
        cause
    }
}
