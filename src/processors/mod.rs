//! Event processors.
//!
//! This module contains the front-end of the event processors and the
//! writers of their results.

pub mod extract_taskset;
pub mod write_stats;
