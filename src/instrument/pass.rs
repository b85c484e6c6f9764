use super::Error;
use serde::{Deserialize, Serialize};

/// Offset of the memory operation counter within a block's entry group.
pub const MEMORY_OPERATIONS_ENTRY: usize = 1;

/// Offset of the execution counter within a block's entry group.
pub const EXECUTION_COUNT_ENTRY: usize = 0;

pub const COUNTER_BASE_SYMBOL: &str = "__basic_block_counter_base";

#[derive(
    Debug,
    Clone,
    Copy,
    Hash,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    clap::ValueEnum,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum InstrumentationType {
    InstructionCount,
    ExecutionCount,
    MemoryIntensity,
}

/// Basic block instrumentation pass.
///
/// The rewriting of kernel code is done elsewhere, a pass only knows how
/// many counters it needs per basic block and where device code finds them.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pass {
    ExecutionCount,
    InstructionCount,
    MemoryIntensity,
}

impl Pass {
    #[must_use]
    pub fn kind(self) -> InstrumentationType {
        match self {
            Self::ExecutionCount => InstrumentationType::ExecutionCount,
            Self::InstructionCount => InstrumentationType::InstructionCount,
            Self::MemoryIntensity => InstrumentationType::MemoryIntensity,
        }
    }

    #[must_use]
    pub fn entries_per_block(self) -> usize {
        match self {
            Self::ExecutionCount | Self::InstructionCount => 1,
            Self::MemoryIntensity => 2,
        }
    }

    /// Device symbol holding the base address of the counter array.
    #[must_use]
    pub fn counter_base_symbol(self) -> &'static str {
        match self {
            Self::ExecutionCount | Self::InstructionCount | Self::MemoryIntensity => {
                COUNTER_BASE_SYMBOL
            }
        }
    }

    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::ExecutionCount => "Basic Block Execution Count Per Thread",
            Self::InstructionCount => "Dynamic Instruction Count Per Basic Block",
            Self::MemoryIntensity => "Memory Operations Per Basic Block",
        }
    }

    /// Whether the pass records memory operations at [`MEMORY_OPERATIONS_ENTRY`].
    #[must_use]
    pub fn counts_memory_operations(self) -> bool {
        matches!(self, Self::MemoryIntensity)
    }
}

impl From<InstrumentationType> for Pass {
    fn from(kind: InstrumentationType) -> Self {
        match kind {
            InstrumentationType::ExecutionCount => Self::ExecutionCount,
            InstrumentationType::InstructionCount => Self::InstructionCount,
            InstrumentationType::MemoryIntensity => Self::MemoryIntensity,
        }
    }
}

impl std::fmt::Display for Pass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// Selects the pass for the configured instrumentation type.
pub fn select_pass(kind: Option<InstrumentationType>) -> Result<Pass, Error> {
    let pass = Pass::from(kind.ok_or(Error::Config)?);
    log::debug!(
        "selected pass {:?} with {} entries per block",
        pass,
        pass.entries_per_block()
    );
    Ok(pass)
}

#[cfg(test)]
mod tests {
    use super::{select_pass, InstrumentationType, Pass};
    use crate::instrument::Error;
    use similar_asserts as diff;
    use std::str::FromStr;

    #[test]
    fn test_entries_per_block() {
        let entries = |kind| select_pass(Some(kind)).map(Pass::entries_per_block).ok();
        diff::assert_eq!(have: entries(InstrumentationType::ExecutionCount), want: Some(1));
        diff::assert_eq!(have: entries(InstrumentationType::InstructionCount), want: Some(1));
        diff::assert_eq!(have: entries(InstrumentationType::MemoryIntensity), want: Some(2));
    }

    #[test]
    fn test_unset_type_is_config_error() {
        assert!(matches!(select_pass(None), Err(Error::Config)));
    }

    #[test]
    fn test_parse_type() {
        diff::assert_eq!(
            have: InstrumentationType::from_str("memory-intensity").ok(),
            want: Some(InstrumentationType::MemoryIntensity)
        );
        diff::assert_eq!(
            have: InstrumentationType::ExecutionCount.to_string(),
            want: "execution-count"
        );
    }
}
