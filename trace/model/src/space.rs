use serde::{Deserialize, Serialize};

/// State space targeted by a memory instruction.
#[derive(
    Debug,
    Default,
    strum::EnumIter,
    strum::Display,
    strum::EnumString,
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
pub enum AddressSpace {
    Const,
    #[default]
    Global,
    Local,
    Param,
    Shared,
    Texture,
    Generic,
}

impl AddressSpace {
    /// Whether accesses to this space are tracked with address extrema and word counts.
    #[must_use]
    pub fn is_addressed(self) -> bool {
        matches!(self, Self::Global | Self::Texture)
    }
}

/// Opcode of an executed instruction as far as tracing is concerned.
#[derive(
    Debug,
    Default,
    strum::Display,
    strum::EnumString,
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
pub enum Opcode {
    Ld,
    St,
    Tex,
    #[default]
    Other,
}

impl Opcode {
    #[must_use]
    pub fn is_load_or_store(self) -> bool {
        matches!(self, Self::Ld | Self::St)
    }
}
