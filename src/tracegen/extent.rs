use crate::allocation::AllocationResolver;
use crate::ir::Kernel;
use std::collections::HashSet;

/// Reassembles candidate addresses from the elements of a parameter.
///
/// Sub 64-bit elements are shifted into a running accumulator most
/// significant chunk first, a 64-bit element replaces it.
fn accumulate(acc: u64, value: u64, width: Option<u32>) -> u64 {
    match width {
        Some(64) => value,
        Some(width) => {
            let mask = (1u64 << width) - 1;
            (acc << width) | (value & mask)
        }
        None => acc,
    }
}

/// Bytes spanned by the distinct allocations reachable through the
/// parameter values of `kernel`.
///
/// Module scope globals are looked up first, then allocations of the
/// device. Each allocation contributes its size at most once.
pub fn extent(kernel: &dyn Kernel, resolver: &dyn AllocationResolver) -> u64 {
    log::debug!("computing extent for kernel {}", kernel.name());
    let mut encountered = HashSet::new();
    let mut extent = 0;

    for parameter in kernel.parameters() {
        let width = parameter.ty.integer_width();
        let mut addr = 0;
        for value in &parameter.values {
            addr = accumulate(addr, *value, width);
            log::trace!("checking address {:#x} of {}", addr, parameter.name);

            let hit = resolver
                .global_allocation(addr)
                .or_else(|| resolver.device_allocation(addr));
            if let Some(allocation) = hit {
                log::debug!(
                    "{} hits allocation {:#x} of {}",
                    parameter.name,
                    allocation.start_addr,
                    human_bytes::human_bytes(allocation.num_bytes() as f64)
                );
                if encountered.insert(allocation.start_addr) {
                    extent += allocation.num_bytes();
                }
            }
        }
    }
    extent
}

#[cfg(test)]
mod tests {
    use super::{accumulate, extent};
    use crate::device::{emu, Device as _};
    use crate::ir::{KernelDef, ParamType, Parameter};
    use crate::testing;
    use color_eyre::eyre;
    use similar_asserts as diff;

    #[test]
    fn test_accumulate() {
        diff::assert_eq!(have: accumulate(0, 0xC000_0000, Some(64)), want: 0xC000_0000);
        diff::assert_eq!(have: accumulate(0xAB, 0xCD, Some(8)), want: 0xABCD);
        diff::assert_eq!(have: accumulate(0x1, 0x1_0000_0002, Some(32)), want: 0x1_0000_0002);
        diff::assert_eq!(have: accumulate(0x1234, 0x5678_9ABC, Some(16)), want: 0x1234_9ABC);
        diff::assert_eq!(have: accumulate(0x42, 7, None), want: 0x42);
    }

    #[test]
    fn test_aliasing_parameters_count_once() -> eyre::Result<()> {
        testing::init_logging();
        let mut device = emu::Device::new();
        let a = device.allocate(1024)?;
        let b = device.allocate(512)?;

        let kernel = KernelDef::new("saxpy", ["BB_0"])
            .with_parameter(testing::pointer("x", a))
            .with_parameter(testing::pointer("y", b + 64))
            .with_parameter(testing::pointer("x_alias", a + 128))
            .with_parameter(testing::pointer("n", 1024));
        diff::assert_eq!(have: extent(&kernel, &device), want: 1024 + 512);
        Ok(())
    }

    #[test]
    fn test_globals_take_precedence() -> eyre::Result<()> {
        let mut device = emu::Device::new();
        device.register_global("lookup", 0x1000, 96)?;
        let ptr = device.allocate(256)?;

        // two 32-bit halves packed most significant first
        let split = Parameter {
            name: "packed".to_string(),
            ty: ParamType::U32,
            values: vec![ptr >> 32, ptr & 0xFFFF_FFFF],
            offset: 0,
        };
        let kernel = KernelDef::new("gather", ["BB_0"])
            .with_parameter(testing::pointer("table", 0x1010))
            .with_parameter(split)
            .with_parameter(Parameter {
                name: "scale".to_string(),
                ty: ParamType::F32,
                values: vec![0x1000],
                offset: 8,
            });
        diff::assert_eq!(have: extent(&kernel, &device), want: 96 + 256);
        Ok(())
    }

    #[test]
    fn test_no_hits() {
        let device = emu::Device::new();
        let kernel = KernelDef::new("empty", ["BB_0"]).with_parameter(testing::pointer("p", 8));
        diff::assert_eq!(have: extent(&kernel, &device), want: 0);
    }
}
