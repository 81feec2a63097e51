//! Command line interface
//!
//! Parses arguments, runs the selected scenarios and prints a summary. The
//! process exit status is the number of failed tests, capped at 255; 255 is
//! also used when the run could not be completed.

use std::path::PathBuf;

use clap::Parser;
use colored::Colorize;

use crate::common::config::Config;
use crate::common::paths::DEFAULT_REPORT;
use crate::common::{Error, Result};
use crate::harness::{IpPlatform, Runner};
use crate::report::{Report, ResultWriter};

/// Exit status for runs that did not complete
pub const EXIT_ABORTED: i32 = 255;

#[derive(Parser, Debug)]
#[command(name = "netharness", about = "Run network daemon test scenarios in a network namespace")]
#[command(version, long_about = None)]
pub struct Args {
    /// Path of the JUnit XML report
    #[arg(short, long, default_value = DEFAULT_REPORT)]
    pub output: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Open a shell inside the namespace after each scenario is set up
    #[arg(short, long)]
    pub shell: bool,

    /// Configuration file (defaults to the user config directory)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory containing the test_* scenario directories
    #[arg(long)]
    pub testcases: Option<PathBuf>,

    /// Scenarios to run, with or without the test_ prefix (default: all)
    pub scenarios: Vec<String>,
}

/// Run the harness and return the process exit status
pub async fn run(args: Args) -> i32 {
    let mut rw = match ResultWriter::new(Some(args.output.clone())) {
        Ok(rw) => rw,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            return EXIT_ABORTED;
        }
    };

    if let Err(e) = execute(&args, &mut rw).await {
        return abort(&mut rw, &e);
    }

    if let Err(e) = rw.finish() {
        eprintln!("{} {}", "Error:".red().bold(), e);
        return EXIT_ABORTED;
    }

    print_summary(rw.report(), rw.path());
    exit_status(rw.failed_test_count())
}

async fn execute(args: &Args, rw: &mut ResultWriter) -> Result<()> {
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(testcases) = &args.testcases {
        config.testcases = testcases.clone();
    }

    let runner = Runner::load(config)?;
    let selected = runner.select(&args.scenarios)?;
    if selected.is_empty() {
        tracing::warn!("No scenarios found in {}", runner.config().testcases.display());
        return Ok(());
    }

    let ip = runner.config().resolve_binary(&runner.config().binaries.ip)?;
    let platform = IpPlatform::new(ip);
    runner.run(&platform, rw, &selected, args.shell).await
}

/// Discard the report of a run that did not complete
fn abort(rw: &mut ResultWriter, error: &Error) -> i32 {
    // an incomplete report is worse than none
    rw.set_path(None);
    let _ = rw.finish();
    eprintln!("{} {}", "Error:".red().bold(), error);
    EXIT_ABORTED
}

fn print_summary(report: &Report, path: Option<&std::path::Path>) {
    let counts = report.counts;
    let failed = report.failed_tests();

    println!();
    if failed.is_empty() {
        println!(
            "{} {}",
            "✓".green().bold(),
            format!("All {} tests passed", counts.tests).green().bold()
        );
    } else {
        println!(
            "{} {} of {} tests failed ({} failures, {} errors)",
            "✗".red().bold(),
            failed.len(),
            counts.tests,
            counts.failures,
            counts.errors
        );
        for name in &failed {
            println!("  {} {}", "✗".red(), name);
        }
    }
    if let Some(path) = path {
        println!("  Report: {}", path.display().to_string().dimmed());
    }
}

fn exit_status(failed: u32) -> i32 {
    failed.min(EXIT_ABORTED as u32) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status_is_capped() {
        assert_eq!(exit_status(0), 0);
        assert_eq!(exit_status(3), 3);
        assert_eq!(exit_status(255), 255);
        assert_eq!(exit_status(1000), 255);
    }

    #[test]
    fn test_parse_arguments() {
        let args = Args::try_parse_from([
            "netharness",
            "-v",
            "-o",
            "out.xml",
            "--testcases",
            "cases",
            "static",
            "test_dhcp",
        ])
        .unwrap();
        assert!(args.verbose);
        assert!(!args.shell);
        assert_eq!(args.output, PathBuf::from("out.xml"));
        assert_eq!(args.testcases, Some(PathBuf::from("cases")));
        assert_eq!(args.scenarios, vec!["static", "test_dhcp"]);
    }

    #[test]
    fn test_interrupted_run_leaves_no_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.xml");
        let mut rw = ResultWriter::new(Some(path.clone())).unwrap();
        {
            let mut suite = rw.start_suite("alpha");
            let _test = suite.start_test("Teardown");
        }

        assert_eq!(abort(&mut rw, &Error::Interrupted), EXIT_ABORTED);
        drop(rw);
        assert!(!path.exists());
    }

    #[test]
    fn test_default_report_path() {
        let args = Args::try_parse_from(["netharness"]).unwrap();
        assert_eq!(args.output, PathBuf::from(DEFAULT_REPORT));
        assert!(args.scenarios.is_empty());
    }
}
