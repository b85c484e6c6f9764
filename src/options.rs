use crate::instrument::InstrumentationType;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use trace_model::Format;

#[derive(Debug, Clone, Args)]
pub struct ProfileOptions {
    /// Replay configuration holding the module and its allocations
    #[arg(short, long, value_name = "YAML")]
    pub module: PathBuf,
    /// Raw little endian 64-bit counters written by the instrumented kernel
    #[arg(short, long, value_name = "COUNTERS")]
    pub counters: PathBuf,
    /// Instrumentation pass
    #[arg(short = 't', long = "type", value_enum)]
    pub kind: Option<InstrumentationType>,
    /// Kernel to profile, all kernels when omitted
    #[arg(short, long)]
    pub kernel: Option<String>,
    /// Report output, stdout when omitted
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Per block profile as CSV
    #[arg(long)]
    pub csv: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct TraceOptions {
    /// Replay configuration holding the module and its allocations
    #[arg(short, long, value_name = "YAML")]
    pub module: PathBuf,
    /// Executed instructions, one JSON object per line
    #[arg(short, long, value_name = "JSONL")]
    pub events: PathBuf,
    /// Traced kernel, the first kernel of the module when omitted
    #[arg(short, long)]
    pub kernel: Option<String>,
    #[arg(short, long, default_value = "traces/traces.json")]
    pub database: PathBuf,
    #[arg(short, long, default_value = "msgpack")]
    pub format: Format,
    /// Only write the header
    #[arg(long)]
    pub header_only: bool,
}

#[derive(Debug, Clone, Args)]
pub struct InspectOptions {
    #[arg(short, long, default_value = "traces/traces.json")]
    pub database: PathBuf,
    /// Also print the recorded events
    #[arg(short, long)]
    pub events: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Reduce basic block counters of an instrumented kernel
    Profile(ProfileOptions),
    /// Trace memory instructions of a kernel execution
    Trace(TraceOptions),
    /// Show the traces of a trace index
    Inspect(InspectOptions),
}

#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Options {
    #[command(subcommand)]
    pub command: Command,
}
