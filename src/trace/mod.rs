//! Recorded traces.

pub mod reader;
