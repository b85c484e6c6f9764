use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Encoding of a trace's access log.
///
/// Also used as the format tag in artifact names.
#[derive(
    Debug,
    Default,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    Clone,
    Copy,
    Hash,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Format {
    /// Consecutive MessagePack values.
    #[default]
    Msgpack,
    /// One JSON object per line.
    Json,
}

/// Index record of one traced kernel execution.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Kernel name.
    pub name: String,
    /// Path of the module that defines the kernel.
    pub module: String,
    pub format: Format,
    /// Absolute path of the access log.
    pub path: PathBuf,
    /// Absolute path of the header.
    pub header: PathBuf,
}

impl std::fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceEntry")
            .field("name", &self.name)
            .field("module", &self.module)
            .field("format", &self.format.to_string())
            .field("path", &self.path.display())
            .finish_non_exhaustive()
    }
}
