//! Offline replay of instrumented and traced kernel executions.
//!
//! A replay configuration describes a module and the allocations that were
//! live when its kernel ran. Counters dumped by an instrumented kernel, or
//! the instruction stream of an emulated one, are then fed through the
//! same machinery as a live run on an emulated device.

use crate::device::{emu, DeviceError};
use crate::instrument::{self, BlockInstrumentor};
use crate::ir::{Kernel, KernelSet, Module};
use crate::tracegen::{self, MemoryTraceGenerator, SessionCounter};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;
use trace_model::{Header, TraceEntry, TraceEvent};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] utils::fs::Error),

    #[error("failed to read {path:?}")]
    Read {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("invalid replay configuration")]
    Config(#[from] serde_yaml::Error),

    #[error("invalid event")]
    Event(#[from] serde_json::Error),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Instrument(#[from] instrument::Error),

    #[error(transparent)]
    Trace(#[from] tracegen::Error),

    #[error("counter dump of {num_bytes} bytes is not a multiple of 8")]
    TruncatedCounters { num_bytes: usize },

    #[error("expected {expected} counters but found {found}")]
    CounterMismatch { expected: usize, found: usize },

    #[error("module has no kernel {0:?}")]
    KernelNotFound(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationDef {
    #[serde(default)]
    pub name: Option<String>,
    pub start: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationTable {
    /// Module scope global variables.
    #[serde(default)]
    pub global: Vec<AllocationDef>,
    /// Allocations of the device.
    #[serde(default)]
    pub device: Vec<AllocationDef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub module: Module,
    #[serde(default)]
    pub allocations: AllocationTable,
}

impl Config {
    pub fn from_reader(reader: impl Read) -> Result<Self, Error> {
        let mut config: Self = serde_yaml::from_reader(reader)?;
        config.module.link();
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let reader = utils::fs::open_readable(path.as_ref())?;
        Self::from_reader(reader)
    }

    /// Emulated device holding the configured allocations.
    pub fn device(&self) -> Result<emu::Device, Error> {
        let mut device = emu::Device::new();
        for global in &self.allocations.global {
            device.register_global(
                global.name.clone().unwrap_or_default(),
                global.start,
                global.size,
            )?;
        }
        for allocation in &self.allocations.device {
            device.map_allocation(allocation.start, allocation.size, allocation.name.clone())?;
        }
        Ok(device)
    }

    /// Kernel named `name`, or the first kernel of the module.
    pub fn kernel(&self, name: Option<&str>) -> Result<&dyn Kernel, Error> {
        let kernel = match name {
            Some(name) => self.module.kernel(name),
            None => self.module.kernels().next(),
        };
        kernel.ok_or_else(|| Error::KernelNotFound(name.unwrap_or_default().to_string()))
    }
}

/// Reads a raw dump of little endian 64-bit counters.
pub fn read_counters(path: impl AsRef<Path>) -> Result<Vec<u64>, Error> {
    let path = path.as_ref();
    let mut reader = utils::fs::open_readable(path)?;
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
    if bytes.len() % 8 != 0 {
        return Err(Error::TruncatedCounters {
            num_bytes: bytes.len(),
        });
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|chunk| {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            u64::from_le_bytes(word)
        })
        .collect())
}

/// Reads executed instructions, one JSON object per line.
pub fn read_events(path: impl AsRef<Path>) -> Result<Vec<TraceEvent>, Error> {
    let reader = utils::fs::open_readable(path.as_ref())?;
    let events = serde_json::Deserializer::from_reader(reader)
        .into_iter::<TraceEvent>()
        .collect::<Result<_, _>>()?;
    Ok(events)
}

/// Reduces `counters` as if written by the instrumented kernel.
pub fn profile(
    config: &Config,
    counters: &[u64],
    options: instrument::Options,
    out: &mut impl std::io::Write,
) -> Result<BlockInstrumentor, Error> {
    let mut instrumentor = BlockInstrumentor::new(options)?;
    instrumentor.analyze(&config.module)?;
    let expected = instrumentor.layout().len();
    if counters.len() != expected {
        return Err(Error::CounterMismatch {
            expected,
            found: counters.len(),
        });
    }

    let mut device = config.device()?;
    device.declare_symbol(instrumentor.pass().counter_base_symbol());
    let bytes: Vec<u8> = counters.iter().flat_map(|c| c.to_le_bytes()).collect();
    instrumentor.instrument(
        &mut device,
        |device, _, ptr| device.copy_from_host(ptr, &bytes),
        out,
    )?;
    Ok(instrumentor)
}

/// Traces `events` as one execution of `kernel`.
pub fn trace(
    config: &Config,
    kernel: Option<&str>,
    events: impl IntoIterator<Item = TraceEvent>,
    options: tracegen::Options,
    counter: SessionCounter,
) -> Result<(TraceEntry, Header), Error> {
    let kernel = config.kernel(kernel)?;
    let device = config.device()?;
    let mut generator = MemoryTraceGenerator::new(options, counter);
    generator.initialize(kernel, &device)?;
    for event in events {
        generator.event(&event)?;
    }
    let entry = generator.finish()?.ok_or(tracegen::Error::NoSession)?;
    Ok((entry, generator.header().clone()))
}

#[cfg(test)]
mod tests {
    use super::{read_counters, Config, Error};
    use crate::allocation::AllocationResolver;
    use crate::instrument::{self, InstrumentationType};
    use color_eyre::eyre;
    use similar_asserts as diff;

    const CONFIG: &str = r"
module:
  path: saxpy.ptx
  kernels:
    - name: saxpy
      basicBlocks:
        - label: entry
        - label: BB_1
        - label: BB_2
        - label: exit
      grid: { x: 2, y: 1, z: 1 }
      block: { x: 4, y: 1, z: 1 }
      parameters:
        - name: x
          type: u64
          values: [3221225472]
        - name: y
          type: u64
          values: [3221226496]
allocations:
  global:
    - name: coefficients
      start: 4096
      size: 64
  device:
    - start: 3221225472
      size: 1024
    - start: 3221226496
      size: 2048
";

    #[test]
    fn test_config_device() -> eyre::Result<()> {
        let config = Config::from_reader(CONFIG.as_bytes())?;
        let device = config.device()?;
        assert!(device.global_allocation(4100).is_some());
        diff::assert_eq!(
            have: device.device_allocation(0xC000_0500).map(|a| a.start_addr),
            want: Some(0xC000_0400)
        );
        diff::assert_eq!(have: config.kernel(None)?.name(), want: "saxpy");
        diff::assert_eq!(have: config.kernel(Some("saxpy"))?.module_path(), want: "saxpy.ptx");
        assert!(matches!(config.kernel(Some("gemm")), Err(Error::KernelNotFound(_))));
        Ok(())
    }

    #[test]
    fn test_profile_replays_counters() -> eyre::Result<()> {
        let config = Config::from_reader(CONFIG.as_bytes())?;
        // 2 blocks x 2 thread blocks x 4 threads
        let counters: Vec<u64> = (0..16).map(|i| if i < 4 { 1 } else { 0 }).collect();
        let mut out = Vec::new();
        let instrumentor = super::profile(
            &config,
            &counters,
            instrument::Options {
                kind: Some(InstrumentationType::ExecutionCount),
                kernel_name: Some("saxpy".to_string()),
            },
            &mut out,
        )?;
        diff::assert_eq!(have: instrumentor.profile().execution_counts, want: vec![4, 0]);
        assert!(String::from_utf8(out)?.contains("\"BB_1\""));

        let result = super::profile(
            &config,
            &counters[..8],
            instrument::Options {
                kind: Some(InstrumentationType::ExecutionCount),
                kernel_name: Some("saxpy".to_string()),
            },
            &mut std::io::sink(),
        );
        assert!(matches!(result, Err(Error::CounterMismatch { expected: 16, found: 8 })));
        Ok(())
    }

    #[test]
    fn test_read_counters() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("counters.bin");
        let bytes: Vec<u8> = [3u64, 0, 42].iter().flat_map(|c| c.to_le_bytes()).collect();
        std::fs::write(&path, &bytes)?;
        diff::assert_eq!(have: read_counters(&path)?, want: vec![3, 0, 42]);

        std::fs::write(&path, &bytes[..5])?;
        assert!(matches!(read_counters(&path), Err(Error::TruncatedCounters { num_bytes: 5 })));
        Ok(())
    }
}
