//! Shared fixtures and end-to-end billing scenarios.

pub mod helpers;

mod scenario_electricity;
mod scenario_water;
