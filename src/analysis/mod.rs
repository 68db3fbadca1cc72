//! Analysis of trace forest snapshots.
//!
//! The engine keeps totals consistent incrementally; this module checks the
//! result from scratch.

pub mod audit;

pub use audit::*;
