//! netharness - integration test harness for a network configuration daemon
//!
//! Each scenario directory describes a daemon configuration plus the
//! interface state it should converge to. The harness builds an isolated
//! network namespace, runs the daemon in it, checks the result and writes a
//! JUnit-style report.

pub mod cli;
pub mod common;
pub mod compare;
pub mod fixture;
pub mod harness;
pub mod report;

pub use common::{Error, Result};
