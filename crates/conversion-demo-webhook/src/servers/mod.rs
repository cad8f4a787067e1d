//! Ready-to-use webhook server implementations.
mod conversion;

pub use conversion::*;
