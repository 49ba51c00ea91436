//! Plugins shipped with the crate.

pub mod heuristics;

pub use heuristics::{HeuristicsPlugin, HeuristicsThresholds, Issue, Severity};
