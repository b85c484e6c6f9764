//! Counter based basic block instrumentation.

pub mod instrumentor;
pub mod layout;
pub mod pass;

pub use instrumentor::{
    BlockCounters, BlockInstrumentor, CounterBuffer, CsvRow, KernelProfile, Options, Report,
};
pub use layout::CounterLayout;
pub use pass::{select_pass, InstrumentationType, Pass};

use crate::device::DeviceError;

/// Device interaction during an instrumented kernel execution.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Stage {
    Allocate,
    Zero,
    Bind,
    Copy,
    Free,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no basic block instrumentation pass specified")]
    Config,

    #[error("kernel {name:?} not found")]
    KernelNotFound { name: String },

    #[error("launch geometry unknown: no thread blocks or threads")]
    MissingGeometry,

    #[error("failed to {stage} counter memory")]
    Device {
        stage: Stage,
        source: DeviceError,
    },

    #[error("instrumented kernel launch failed")]
    Launch(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("failed to serialize report")]
    Report(#[from] serde_json::Error),

    #[error("failed to write profile")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn device(stage: Stage) -> impl FnOnce(DeviceError) -> Self {
        move |source| Self::Device { stage, source }
    }
}
