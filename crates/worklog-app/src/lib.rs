//! Process-level plumbing shared by the work-log binaries.

pub mod logging;
