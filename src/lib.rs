#![allow(
    non_camel_case_types,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::too_many_lines,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap
)]

pub mod allocation;
pub mod device;
pub mod instrument;
pub mod ir;
pub mod options;
pub mod replay;
pub mod tracegen;

#[cfg(test)]
pub mod testing;

pub use trace_model as model;

pub type address = u64;
