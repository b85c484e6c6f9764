use crate::device::emu;
use crate::instrument::pass::COUNTER_BASE_SYMBOL;
use crate::ir::{KernelDef, Module, ParamType, Parameter};
use trace_model::{ActiveMask, AddressSpace, Dim, Opcode, TraceEvent};

static LOGGER: std::sync::Once = std::sync::Once::new();

pub fn init_logging() {
    LOGGER.call_once(|| {
        env_logger::builder().is_test(true).init();
    });
}

/// Emulated device with the counter base symbol declared.
#[must_use]
pub fn counter_device() -> emu::Device {
    let mut device = emu::Device::new();
    device.declare_symbol(COUNTER_BASE_SYMBOL);
    device
}

#[must_use]
pub fn pointer(name: &str, ptr: u64) -> Parameter {
    Parameter {
        name: name.to_string(),
        ty: ParamType::U64,
        values: vec![ptr],
        offset: 0,
    }
}

/// Module with a single `vecAdd` kernel of `labels` launched as `grid` x `block`.
#[must_use]
pub fn vec_add_module(labels: &[&str], grid: u32, block: u32) -> Module {
    Module::new("vectoradd.ptx")
        .with_kernel(KernelDef::new("vecAdd", labels.iter().copied()).with_launch(grid, block))
}

/// Load or store of consecutive 4 byte words starting at `base` for the given lanes.
#[must_use]
pub fn strided_event(
    opcode: Opcode,
    space: AddressSpace,
    num_threads: usize,
    lanes: &[usize],
    base: u64,
) -> TraceEvent {
    let active = ActiveMask::from_lanes(num_threads, lanes.iter().copied());
    let memory_addresses = lanes.iter().map(|lane| base + 4 * *lane as u64).collect();
    TraceEvent {
        pc: 0x10,
        opcode,
        address_space: space,
        block_id: Dim::ZERO,
        active,
        memory_sizes: vec![4; lanes.len()],
        memory_addresses,
    }
}
