use super::layout::CounterLayout;
use super::pass::{self, Pass, EXECUTION_COUNT_ENTRY, MEMORY_OPERATIONS_ENTRY};
use super::{Error, InstrumentationType, Stage};
use crate::address;
use crate::device::{Device, DeviceError};
use crate::ir::{KernelSet, ENTRY_LABEL, EXIT_LABEL};
use indexmap::IndexMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    pub kind: Option<InstrumentationType>,
    /// Kernel to instrument, all kernels of the module when absent.
    pub kernel_name: Option<String>,
}

/// Accumulated per basic block counters of one kernel execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelProfile {
    pub execution_counts: Vec<u64>,
    /// Empty unless the pass counts memory operations.
    pub memory_operations: Vec<u64>,
}

impl KernelProfile {
    #[must_use]
    pub fn execution_count(&self, block: usize) -> u64 {
        self.execution_counts.get(block).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn memory_operations(&self, block: usize) -> Option<u64> {
        self.memory_operations.get(block).copied()
    }

    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.execution_counts.len()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsvRow {
    pub kernel: String,
    pub block: usize,
    pub label: String,
    pub execution_count: u64,
    pub memory_operations: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockCounters {
    pub execution_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_operations: Option<u64>,
}

/// Structured report emitted after extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub kernel: Option<String>,
    pub pass: InstrumentationType,
    pub thread_blocks: usize,
    pub threads: usize,
    /// Counters keyed by basic block label in analysis order.
    pub counters: IndexMap<String, BlockCounters>,
}

/// Device counter array owned by one instrumented kernel execution.
///
/// Freed on drop unless released through [`CounterBuffer::release`].
pub struct CounterBuffer<'d, D>
where
    D: Device + ?Sized,
{
    device: &'d mut D,
    ptr: address,
    layout: CounterLayout,
    num_bytes: u64,
    released: bool,
}

impl<'d, D> CounterBuffer<'d, D>
where
    D: Device + ?Sized,
{
    #[must_use]
    pub fn ptr(&self) -> address {
        self.ptr
    }

    #[must_use]
    pub fn layout(&self) -> CounterLayout {
        self.layout
    }

    /// Device address of the counter slot at `index`.
    #[must_use]
    pub fn slot(&self, index: usize) -> address {
        self.ptr + index as u64 * super::layout::COUNTER_BYTES
    }

    pub fn device(&mut self) -> &mut D {
        &mut *self.device
    }

    /// Copies the counters back to the host and frees the device memory.
    pub fn release(mut self) -> Result<Vec<u64>, Error> {
        let num_bytes = self.num_bytes;
        let bytes = self
            .device
            .copy_to_host(self.ptr, num_bytes)
            .map_err(Error::device(Stage::Copy))?;
        self.released = true;
        self.device
            .free(self.ptr)
            .map_err(Error::device(Stage::Free))?;
        log::debug!(
            "released {} of counters at {:#x}",
            human_bytes::human_bytes(num_bytes as f64),
            self.ptr
        );
        Ok(bytes
            .chunks_exact(8)
            .map(|chunk| {
                let mut word = [0u8; 8];
                word.copy_from_slice(chunk);
                u64::from_le_bytes(word)
            })
            .collect())
    }
}

impl<'d, D> Drop for CounterBuffer<'d, D>
where
    D: Device + ?Sized,
{
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.device.free(self.ptr) {
            log::warn!("failed to free counters at {:#x}: {}", self.ptr, err);
        }
    }
}

/// Instruments basic blocks of a kernel with per thread counters.
#[derive(Debug, Clone)]
pub struct BlockInstrumentor {
    pass: Pass,
    kernel_name: Option<String>,
    basic_blocks: usize,
    thread_blocks: usize,
    threads: usize,
    labels: Vec<String>,
    profile: KernelProfile,
}

impl BlockInstrumentor {
    pub fn new(options: Options) -> Result<Self, Error> {
        let pass = pass::select_pass(options.kind)?;
        Ok(Self {
            pass,
            kernel_name: options.kernel_name,
            basic_blocks: 0,
            thread_blocks: 0,
            threads: 0,
            labels: Vec::new(),
            profile: KernelProfile::default(),
        })
    }

    #[must_use]
    pub fn pass(&self) -> Pass {
        self.pass
    }

    #[must_use]
    pub fn kernel_name(&self) -> Option<&str> {
        self.kernel_name.as_deref()
    }

    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    #[must_use]
    pub fn profile(&self) -> &KernelProfile {
        &self.profile
    }

    #[must_use]
    pub fn layout(&self) -> CounterLayout {
        CounterLayout {
            entries: self.pass.entries_per_block(),
            basic_blocks: self.basic_blocks,
            thread_blocks: self.thread_blocks,
            threads: self.threads,
        }
    }

    /// Overrides the launch geometry found during analysis.
    pub fn set_launch_geometry(&mut self, thread_blocks: usize, threads: usize) {
        self.thread_blocks = thread_blocks;
        self.threads = threads;
    }

    /// Counts basic blocks and collects their labels.
    pub fn analyze(&mut self, kernels: &dyn KernelSet) -> Result<(), Error> {
        self.labels.clear();
        if let Some(name) = self.kernel_name.as_deref() {
            let kernel = kernels
                .kernel(name)
                .ok_or_else(|| Error::KernelNotFound {
                    name: name.to_string(),
                })?;
            // without the entry and exit blocks
            self.basic_blocks = kernel.dataflow_graph_size().saturating_sub(2);
            self.labels = kernel
                .basic_blocks()
                .iter()
                .map(|block| block.label.as_str())
                .filter(|label| *label != ENTRY_LABEL && *label != EXIT_LABEL)
                .map(str::to_string)
                .collect();
            self.thread_blocks = kernel.grid_dim().size() as usize;
            self.threads = kernel.block_dim().size() as usize;
        } else {
            self.basic_blocks = 0;
            self.thread_blocks = 0;
            self.threads = 0;
            for kernel in kernels.kernels() {
                self.basic_blocks += kernel.dataflow_graph_size();
                self.thread_blocks = self.thread_blocks.max(kernel.grid_dim().size() as usize);
                self.threads = self.threads.max(kernel.block_dim().size() as usize);
            }
            log::debug!(
                "aggregating kernels [{}]",
                kernels.kernels().map(|kernel| kernel.name()).join(", ")
            );
        }
        log::info!(
            "analyzed {}: {} basic blocks, {} thread blocks x {} threads",
            self.kernel_name.as_deref().unwrap_or("all kernels"),
            self.basic_blocks,
            self.thread_blocks,
            self.threads,
        );
        Ok(())
    }

    /// Allocates, zeroes and binds the counter array.
    ///
    /// A failure after allocation frees the array before returning.
    pub fn initialize<'d, D>(&self, device: &'d mut D) -> Result<CounterBuffer<'d, D>, Error>
    where
        D: Device + ?Sized,
    {
        let layout = self.layout();
        if layout.thread_blocks == 0 || layout.threads == 0 {
            return Err(Error::MissingGeometry);
        }
        log::debug!("counter layout: {}", layout);

        let num_bytes = layout
            .num_bytes()
            .ok_or(DeviceError::SizeOverflow(
                layout.len() as u64,
                super::layout::COUNTER_BYTES,
            ))
            .map_err(Error::device(Stage::Allocate))?;
        let ptr = device
            .allocate(num_bytes)
            .map_err(Error::device(Stage::Allocate))?;
        let buffer = CounterBuffer {
            device,
            ptr,
            layout,
            num_bytes,
            released: false,
        };
        buffer
            .device
            .zero(ptr, num_bytes)
            .map_err(Error::device(Stage::Zero))?;
        buffer
            .device
            .bind_symbol(self.pass.counter_base_symbol(), ptr)
            .map_err(Error::device(Stage::Bind))?;
        Ok(buffer)
    }

    /// Sums the raw counter array per basic block.
    #[must_use]
    pub fn reduce(&self, counters: &[u64]) -> KernelProfile {
        let layout = self.layout();
        debug_assert_eq!(counters.len(), layout.len());
        let counts_memory = self.pass.counts_memory_operations();
        let counter = |index: usize| counters.get(index).copied().unwrap_or(0);

        let mut profile = KernelProfile {
            execution_counts: vec![0; layout.basic_blocks],
            memory_operations: if counts_memory {
                vec![0; layout.basic_blocks]
            } else {
                Vec::new()
            },
        };
        for thread_block in 0..layout.thread_blocks {
            for block in 0..layout.basic_blocks {
                for thread in 0..layout.threads {
                    let executions =
                        counter(layout.index(block, EXECUTION_COUNT_ENTRY, thread, thread_block));
                    // counters wrap like the device side increments
                    profile.execution_counts[block] =
                        profile.execution_counts[block].wrapping_add(executions);
                    if counts_memory {
                        let operations = counter(layout.index(
                            block,
                            MEMORY_OPERATIONS_ENTRY,
                            thread,
                            thread_block,
                        ));
                        profile.memory_operations[block] =
                            profile.memory_operations[block].wrapping_add(operations);
                    }
                }
            }
        }
        profile
    }

    fn label(&self, block: usize) -> Cow<'_, str> {
        match self.labels.get(block) {
            Some(label) => Cow::Borrowed(label.as_str()),
            None => Cow::Owned(format!("block_{block}")),
        }
    }

    #[must_use]
    pub fn report(&self) -> Report {
        let counters = (0..self.profile.num_blocks())
            .map(|block| {
                (
                    self.label(block).into_owned(),
                    BlockCounters {
                        execution_count: self.profile.execution_count(block),
                        memory_operations: self.profile.memory_operations(block),
                    },
                )
            })
            .collect();
        Report {
            kernel: self.kernel_name.clone(),
            pass: self.pass.kind(),
            thread_blocks: self.thread_blocks,
            threads: self.threads,
            counters,
        }
    }

    /// Copies the counters back, frees the device memory and reduces them.
    ///
    /// Writes the report to `out` and returns the raw counter array.
    pub fn extract_results<D, W>(
        &mut self,
        buffer: CounterBuffer<'_, D>,
        out: &mut W,
    ) -> Result<Vec<u64>, Error>
    where
        D: Device + ?Sized,
        W: std::io::Write,
    {
        let counters = buffer.release()?;
        self.profile = self.reduce(&counters);

        let report = self.report();
        let mut serializer = serde_json::Serializer::with_formatter(
            &mut *out,
            serde_json::ser::PrettyFormatter::with_indent(b"    "),
        );
        report.serialize(&mut serializer)?;
        writeln!(out)?;
        Ok(counters)
    }

    /// Runs `launch` against freshly initialized counters and extracts the results.
    ///
    /// `launch` receives the device and the base address of the counter array.
    pub fn instrument<D, F, E, W>(
        &mut self,
        device: &mut D,
        launch: F,
        out: &mut W,
    ) -> Result<Vec<u64>, Error>
    where
        D: Device + ?Sized,
        F: FnOnce(&mut D, &CounterLayout, address) -> Result<(), E>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
        W: std::io::Write,
    {
        let mut buffer = self.initialize(device)?;
        let (layout, ptr) = (buffer.layout(), buffer.ptr());
        launch(buffer.device(), &layout, ptr).map_err(|err| Error::Launch(err.into()))?;
        self.extract_results(buffer, out)
    }

    #[must_use]
    pub fn csv_rows(&self) -> Vec<CsvRow> {
        let kernel = self.kernel_name.clone().unwrap_or_default();
        (0..self.profile.num_blocks())
            .map(|block| CsvRow {
                kernel: kernel.clone(),
                block,
                label: self.label(block).into_owned(),
                execution_count: self.profile.execution_count(block),
                memory_operations: self.profile.memory_operations(block),
            })
            .collect()
    }

    pub fn write_csv(&self, writer: impl std::io::Write) -> Result<(), Error> {
        let mut csv_writer = csv::WriterBuilder::new()
            .flexible(false)
            .from_writer(writer);
        for row in self.csv_rows() {
            csv_writer.serialize(row)?;
        }
        csv_writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{BlockInstrumentor, Options, Report};
    use crate::address;
    use crate::device::{emu, Device, DeviceError};
    use crate::instrument::{Error, InstrumentationType, Stage};
    use crate::ir::{KernelDef, Module};
    use crate::testing;
    use color_eyre::eyre;
    use similar_asserts as diff;

    fn instrumentor(kind: InstrumentationType, kernel: Option<&str>) -> BlockInstrumentor {
        BlockInstrumentor::new(Options {
            kind: Some(kind),
            kernel_name: kernel.map(str::to_string),
        })
        .unwrap()
    }

    #[test]
    fn test_reduce_synthetic_counters() -> eyre::Result<()> {
        testing::init_logging();
        let module = testing::vec_add_module(&["BB_0", "BB_1", "BB_2"], 2, 4);
        let mut instrumentor = instrumentor(InstrumentationType::MemoryIntensity, Some("vecAdd"));
        instrumentor.analyze(&module)?;

        let layout = instrumentor.layout();
        diff::assert_eq!(have: (layout.entries, layout.basic_blocks, layout.thread_blocks, layout.threads), want: (2, 3, 2, 4));

        let mut device = testing::counter_device();
        let mut buffer = instrumentor.initialize(&mut device)?;
        for block in 0..3 {
            for entry in 0..2 {
                for thread in 0..4 {
                    for thread_block in 0..2 {
                        let value = 1000 * block + 100 * entry + 10 * thread + thread_block;
                        let slot = buffer.slot(layout.index(block, entry, thread, thread_block));
                        buffer.device().fetch_add_u64(slot, value as u64)?;
                    }
                }
            }
        }

        let mut out = Vec::new();
        let counters = instrumentor.extract_results(buffer, &mut out)?;
        diff::assert_eq!(have: counters.len(), want: 48);
        diff::assert_eq!(have: device.used_bytes(), want: 0);

        let profile = instrumentor.profile();
        diff::assert_eq!(have: profile.execution_counts, want: vec![124, 8124, 16124]);
        diff::assert_eq!(have: profile.memory_operations, want: vec![924, 8924, 16924]);

        let report: Report = serde_json::from_slice(&out)?;
        let labels: Vec<_> = report.counters.keys().cloned().collect();
        diff::assert_eq!(have: labels, want: vec!["BB_0", "BB_1", "BB_2"]);
        diff::assert_eq!(have: report.counters["BB_1"].memory_operations, want: Some(8924));
        diff::assert_eq!(have: report.kernel.as_deref(), want: Some("vecAdd"));
        Ok(())
    }

    #[test]
    fn test_execution_count_omits_memory_operations() -> eyre::Result<()> {
        let module = testing::vec_add_module(&["BB_0"], 1, 2);
        let mut instrumentor = instrumentor(InstrumentationType::ExecutionCount, Some("vecAdd"));
        instrumentor.analyze(&module)?;
        let mut device = testing::counter_device();
        let mut out = Vec::new();
        instrumentor.instrument(
            &mut device,
            |device, layout, _| -> Result<(), DeviceError> {
                let ptr = device.symbol(crate::instrument::pass::COUNTER_BASE_SYMBOL).unwrap();
                device.fetch_add_u64(ptr + 8 * layout.index(0, 0, 1, 0) as u64, 3)?;
                Ok(())
            },
            &mut out,
        )?;
        diff::assert_eq!(have: instrumentor.profile().execution_counts, want: vec![3]);
        assert!(instrumentor.profile().memory_operations.is_empty());
        let report: serde_json::Value = serde_json::from_slice(&out)?;
        assert!(report["counters"]["BB_0"].get("memoryOperations").is_none());
        Ok(())
    }

    #[test]
    fn test_missing_kernel_is_lookup_error() {
        let module = testing::vec_add_module(&["BB_0"], 1, 1);
        let mut instrumentor = instrumentor(InstrumentationType::ExecutionCount, Some("matMul"));
        assert!(matches!(
            instrumentor.analyze(&module),
            Err(Error::KernelNotFound { name }) if name == "matMul"
        ));
    }

    #[test]
    fn test_unset_type_fails_before_device_interaction() {
        let err = BlockInstrumentor::new(Options::default()).unwrap_err();
        assert!(matches!(err, Error::Config));
    }

    #[test]
    fn test_aggregate_analysis() -> eyre::Result<()> {
        let module = Module::new("kernels.ptx")
            .with_kernel(KernelDef::new("a", ["BB_0", "BB_1"]).with_launch(4u32, 32u32))
            .with_kernel(KernelDef::new("b", ["BB_0"]).with_launch(2u32, 64u32));
        let mut instrumentor = instrumentor(InstrumentationType::InstructionCount, None);
        instrumentor.analyze(&module)?;
        let layout = instrumentor.layout();
        diff::assert_eq!(have: layout.basic_blocks, want: 4 + 3);
        diff::assert_eq!(have: (layout.thread_blocks, layout.threads), want: (4, 64));
        assert!(instrumentor.labels().is_empty());

        let mut device = testing::counter_device();
        let buffer = instrumentor.initialize(&mut device)?;
        let mut out = Vec::new();
        instrumentor.extract_results(buffer, &mut out)?;
        let report: Report = serde_json::from_slice(&out)?;
        diff::assert_eq!(have: report.counters.len(), want: 7);
        assert!(report.counters.contains_key("block_6"));
        diff::assert_eq!(have: report.kernel, want: None);
        Ok(())
    }

    #[test]
    fn test_bind_failure_releases_counters() -> eyre::Result<()> {
        let module = testing::vec_add_module(&["BB_0"], 1, 32);
        let mut instrumentor = instrumentor(InstrumentationType::ExecutionCount, Some("vecAdd"));
        instrumentor.analyze(&module)?;

        // counter base symbol never declared
        let mut device = emu::Device::new();
        let err = instrumentor.initialize(&mut device).err().unwrap();
        assert!(matches!(
            err,
            Error::Device { stage: Stage::Bind, source: DeviceError::UnknownSymbol(_) }
        ));
        diff::assert_eq!(have: device.used_bytes(), want: 0);
        assert!(device.allocations().is_empty());
        Ok(())
    }

    /// Emulated device whose zero fill always fails.
    #[derive(Default)]
    struct ZeroFailingDevice(emu::Device);

    impl Device for ZeroFailingDevice {
        fn allocate(&mut self, num_bytes: u64) -> Result<address, DeviceError> {
            self.0.allocate(num_bytes)
        }

        fn zero(&mut self, ptr: address, _num_bytes: u64) -> Result<(), DeviceError> {
            Err(DeviceError::InvalidPointer(ptr))
        }

        fn copy_to_host(&self, ptr: address, num_bytes: u64) -> Result<Vec<u8>, DeviceError> {
            self.0.copy_to_host(ptr, num_bytes)
        }

        fn free(&mut self, ptr: address) -> Result<(), DeviceError> {
            self.0.free(ptr)
        }

        fn bind_symbol(&mut self, symbol: &str, ptr: address) -> Result<(), DeviceError> {
            self.0.bind_symbol(symbol, ptr)
        }
    }

    #[test]
    fn test_zero_failure_names_stage_and_releases_counters() -> eyre::Result<()> {
        let module = testing::vec_add_module(&["BB_0", "BB_1"], 2, 32);
        let mut instrumentor = instrumentor(InstrumentationType::MemoryIntensity, Some("vecAdd"));
        instrumentor.analyze(&module)?;

        let mut device = ZeroFailingDevice::default();
        let err = instrumentor.initialize(&mut device).err().unwrap();
        assert!(matches!(
            err,
            Error::Device { stage: Stage::Zero, source: DeviceError::InvalidPointer(_) }
        ));
        diff::assert_eq!(have: err.to_string(), want: "failed to zero counter memory");
        diff::assert_eq!(have: device.0.used_bytes(), want: 0);
        Ok(())
    }

    #[test]
    fn test_overflowing_geometry_fails_to_allocate() -> eyre::Result<()> {
        let module = testing::vec_add_module(&["BB_0"], 1, 32);
        let mut instrumentor = instrumentor(InstrumentationType::MemoryIntensity, Some("vecAdd"));
        instrumentor.analyze(&module)?;
        instrumentor.set_launch_geometry(usize::MAX / 2, 1024);

        let mut device = testing::counter_device();
        let err = instrumentor.initialize(&mut device).err().unwrap();
        assert!(matches!(
            err,
            Error::Device { stage: Stage::Allocate, source: DeviceError::SizeOverflow(..) }
        ));
        assert!(device.allocations().is_empty());
        Ok(())
    }

    #[test]
    fn test_reduction_wraps_like_device_counters() -> eyre::Result<()> {
        let module = testing::vec_add_module(&["BB_0"], 1, 2);
        let mut instrumentor = instrumentor(InstrumentationType::ExecutionCount, Some("vecAdd"));
        instrumentor.analyze(&module)?;
        let profile = instrumentor.reduce(&[u64::MAX, 2]);
        diff::assert_eq!(have: profile.execution_counts, want: vec![1]);
        Ok(())
    }

    #[test]
    fn test_allocation_failure_names_stage() -> eyre::Result<()> {
        let module = testing::vec_add_module(&["BB_0"], 1, 32);
        let mut instrumentor = instrumentor(InstrumentationType::ExecutionCount, Some("vecAdd"));
        instrumentor.analyze(&module)?;
        let mut device = emu::Device::with_capacity(0);
        let err = instrumentor.initialize(&mut device).err().unwrap();
        assert!(matches!(err, Error::Device { stage: Stage::Allocate, .. }));
        diff::assert_eq!(have: err.to_string(), want: "failed to allocate counter memory");
        Ok(())
    }

    #[test]
    fn test_failed_launch_releases_counters() -> eyre::Result<()> {
        let module = testing::vec_add_module(&["BB_0"], 1, 32);
        let mut instrumentor = instrumentor(InstrumentationType::ExecutionCount, Some("vecAdd"));
        instrumentor.analyze(&module)?;
        let mut device = testing::counter_device();
        let mut out = Vec::new();
        let result = instrumentor.instrument(
            &mut device,
            |_, _, _| Err(eyre::eyre!("kernel trapped")),
            &mut out,
        );
        assert!(matches!(result, Err(Error::Launch(_))));
        diff::assert_eq!(have: device.used_bytes(), want: 0);
        assert!(out.is_empty());
        Ok(())
    }

    #[test]
    fn test_csv_rows() -> eyre::Result<()> {
        let module = testing::vec_add_module(&["BB_0", "BB_1"], 1, 1);
        let mut instrumentor = instrumentor(InstrumentationType::MemoryIntensity, Some("vecAdd"));
        instrumentor.analyze(&module)?;
        let mut device = testing::counter_device();
        let mut buffer = instrumentor.initialize(&mut device)?;
        let slot = buffer.slot(instrumentor.layout().index(1, 1, 0, 0));
        buffer.device().fetch_add_u64(slot, 7)?;
        instrumentor.extract_results(buffer, &mut std::io::sink())?;

        let mut csv = Vec::new();
        instrumentor.write_csv(&mut csv)?;
        diff::assert_eq!(
            have: String::from_utf8(csv)?,
            want: "kernel,block,label,execution_count,memory_operations\nvecAdd,0,BB_0,0,0\nvecAdd,1,BB_1,0,7\n"
        );
        Ok(())
    }
}
