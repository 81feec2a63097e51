//! Test environment orchestration
//!
//! [`Runner`] drives the selected scenarios one after another; each one is
//! set up, validated and torn down by a [`ScenarioRun`] on top of a
//! [`NetPlatform`].

mod driver;
mod platform;
mod process;
mod run;
mod timer;

pub use driver::Runner;
pub use platform::{IpPlatform, NetPlatform};
pub use process::{run_command, ProcessSet};
pub use run::{RunState, ScenarioRun};
pub use timer::Timer;
