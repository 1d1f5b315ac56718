//! Dataset input for the command-line runner.

pub mod dataset;

pub use dataset::RgbdDataset;
