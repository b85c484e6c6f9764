//! Kernel set query interface.
//!
//! Analysis only needs a narrow view of a compiled module: basic block
//! labels, the dataflow graph size, launch geometry and parameter values.
//! [`Module`] is a plain data implementation loadable from YAML.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use trace_model::Dim;

pub const ENTRY_LABEL: &str = "entry";
pub const EXIT_LABEL: &str = "exit";

/// Element type of a kernel parameter.
#[derive(
    Debug,
    Clone,
    Copy,
    Hash,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ParamType {
    B8,
    B16,
    B32,
    B64,
    S8,
    S16,
    S32,
    S64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Pred,
}

impl ParamType {
    /// Bit width of integer typed elements.
    ///
    /// Floating point and predicate parameters never carry addresses.
    #[must_use]
    pub fn integer_width(self) -> Option<u32> {
        match self {
            Self::B8 | Self::S8 | Self::U8 => Some(8),
            Self::B16 | Self::S16 | Self::U16 => Some(16),
            Self::B32 | Self::S32 | Self::U32 => Some(32),
            Self::B64 | Self::S64 | Self::U64 => Some(64),
            Self::F32 | Self::F64 | Self::Pred => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ParamType,
    /// Raw element values, one per array element.
    #[serde(default)]
    pub values: Vec<u64>,
    /// Byte offset within the parameter block.
    #[serde(default)]
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicBlock {
    pub label: String,
}

impl From<&str> for BasicBlock {
    fn from(label: &str) -> Self {
        Self {
            label: label.to_string(),
        }
    }
}

pub trait Kernel {
    fn name(&self) -> &str;

    /// Path of the module defining this kernel.
    fn module_path(&self) -> &str;

    /// Control flow graph blocks in order, including `entry` and `exit`.
    fn basic_blocks(&self) -> &[BasicBlock];

    /// Number of nodes of the dataflow graph, including `entry` and `exit`.
    fn dataflow_graph_size(&self) -> usize;

    fn grid_dim(&self) -> Dim;

    fn block_dim(&self) -> Dim;

    fn max_threads_per_block(&self) -> u32;

    fn parameters(&self) -> &[Parameter];
}

pub trait KernelSet {
    fn kernel(&self, name: &str) -> Option<&dyn Kernel>;

    fn kernels(&self) -> Box<dyn Iterator<Item = &dyn Kernel> + '_>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelDef {
    pub name: String,
    #[serde(skip)]
    pub module_path: String,
    pub basic_blocks: Vec<BasicBlock>,
    /// Defaults to the number of basic blocks.
    #[serde(default)]
    pub dataflow_graph_size: Option<usize>,
    #[serde(default = "default_dim")]
    pub grid: Dim,
    #[serde(default = "default_dim")]
    pub block: Dim,
    #[serde(default)]
    pub max_threads_per_block: Option<u32>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

fn default_dim() -> Dim {
    Dim::ONE
}

impl KernelDef {
    /// A kernel with the given inner block labels, framed by `entry` and `exit`.
    #[must_use]
    pub fn new<'a>(name: impl Into<String>, labels: impl IntoIterator<Item = &'a str>) -> Self {
        let basic_blocks = std::iter::once(ENTRY_LABEL)
            .chain(labels)
            .chain(std::iter::once(EXIT_LABEL))
            .map(BasicBlock::from)
            .collect();
        Self {
            name: name.into(),
            module_path: String::new(),
            basic_blocks,
            dataflow_graph_size: None,
            grid: Dim::ONE,
            block: Dim::ONE,
            max_threads_per_block: None,
            parameters: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_launch(mut self, grid: impl Into<Dim>, block: impl Into<Dim>) -> Self {
        self.grid = grid.into();
        self.block = block.into();
        self
    }

    #[must_use]
    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }
}

impl Kernel for KernelDef {
    fn name(&self) -> &str {
        &self.name
    }

    fn module_path(&self) -> &str {
        &self.module_path
    }

    fn basic_blocks(&self) -> &[BasicBlock] {
        &self.basic_blocks
    }

    fn dataflow_graph_size(&self) -> usize {
        self.dataflow_graph_size
            .unwrap_or(self.basic_blocks.len())
    }

    fn grid_dim(&self) -> Dim {
        self.grid
    }

    fn block_dim(&self) -> Dim {
        self.block
    }

    fn max_threads_per_block(&self) -> u32 {
        self.max_threads_per_block
            .unwrap_or_else(|| u32::try_from(self.block.size()).unwrap_or(u32::MAX))
    }

    fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }
}

/// A compiled module holding kernels by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub path: String,
    #[serde(with = "kernel_list")]
    pub kernels: IndexMap<String, KernelDef>,
}

impl Module {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kernels: IndexMap::new(),
        }
    }

    pub fn add_kernel(&mut self, mut kernel: KernelDef) {
        kernel.module_path.clone_from(&self.path);
        self.kernels.insert(kernel.name.clone(), kernel);
    }

    #[must_use]
    pub fn with_kernel(mut self, kernel: KernelDef) -> Self {
        self.add_kernel(kernel);
        self
    }

    /// Propagates the module path into its kernels after deserialization.
    pub fn link(&mut self) {
        for kernel in self.kernels.values_mut() {
            kernel.module_path.clone_from(&self.path);
        }
    }
}

impl KernelSet for Module {
    fn kernel(&self, name: &str) -> Option<&dyn Kernel> {
        self.kernels.get(name).map(|kernel| kernel as &dyn Kernel)
    }

    fn kernels(&self) -> Box<dyn Iterator<Item = &dyn Kernel> + '_> {
        Box::new(self.kernels.values().map(|kernel| kernel as &dyn Kernel))
    }
}

mod kernel_list {
    use super::KernelDef;
    use indexmap::IndexMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(kernels: &IndexMap<String, KernelDef>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let kernels: Vec<&KernelDef> = kernels.values().collect();
        kernels.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<IndexMap<String, KernelDef>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let kernels = Vec::<KernelDef>::deserialize(deserializer)?;
        Ok(kernels
            .into_iter()
            .map(|kernel| (kernel.name.clone(), kernel))
            .collect())
    }
}
