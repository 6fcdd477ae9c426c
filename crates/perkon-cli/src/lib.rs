//! Perkon CLI library - testable modules behind the `perkon` binary.

pub mod client;
pub mod config;
