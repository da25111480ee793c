// Copyright (c) The incremental-junit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::{ExpectedError, IjunitExitCode, Result},
    output::{OutputOpts, clap_styles},
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand, ValueEnum};
use incremental_junit::{
    accumulator::MergeOutcome,
    config::{IncrementalJunitConfig, StrategySetting},
    errors::DisplayErrorChain,
    events::{HostEvent, HostEventReader},
    session::{ProcessRole, ReportSessionBuilder, RunTopology},
    signal::SignalHandlerKind,
};
use incremental_junit::junit_report::Property;
use std::{
    fs::File,
    io::{self, BufRead, BufReader, Write},
};
use tracing::{info, warn};

/// Incremental JUnit reports for any test runner.
#[derive(Debug, Parser)]
#[command(
    name = "ijunit",
    version,
    styles = clap_styles::style(),
    max_term_width = 100
)]
pub struct IjunitApp {
    #[clap(flatten)]
    output: OutputOpts,

    /// Config file [default: none, built-in defaults and environment only]
    #[arg(long, global = true, value_name = "PATH", env = "INCREMENTAL_JUNIT_CONFIG")]
    config: Option<Utf8PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Prepare the report for a new run
    ///
    /// Run this once, in the primary process, before any test results are recorded. Any state
    /// left over from an earlier run is discarded.
    Start {
        #[clap(flatten)]
        report: ReportOpts,

        #[clap(flatten)]
        topology: TopologyOpts,

        #[clap(flatten)]
        metadata: MetadataOpts,
    },

    /// Record test results from JSON-lines host events
    ///
    /// Each line is either a phase report (`{"event": "report", ...}`) or a teardown
    /// (`{"event": "teardown", ...}`). A test is recorded when its teardown is seen.
    Record {
        #[clap(flatten)]
        report: ReportOpts,

        #[clap(flatten)]
        topology: TopologyOpts,

        /// Tag of the worker process [default: from the worker environment variable]
        #[arg(long, value_name = "TAG")]
        worker: Option<String>,

        /// File to read events from [default: standard input]
        #[arg(long, value_name = "PATH")]
        events: Option<Utf8PathBuf>,
    },

    /// Merge recorded test results into the report
    ///
    /// Run this once, in the primary process, after all test results were recorded. It can also
    /// be used to recover the results of a run that crashed before merging.
    Merge {
        #[clap(flatten)]
        report: ReportOpts,

        #[clap(flatten)]
        metadata: MetadataOpts,
    },
}

#[derive(Debug, Args)]
struct ReportOpts {
    /// Path to the JUnit report [default: report.path from configuration]
    #[arg(long, value_name = "PATH")]
    report: Option<Utf8PathBuf>,
}

#[derive(Debug, Args)]
struct MetadataOpts {
    /// Add a property to the session metadata of the report (can be repeated)
    ///
    /// Session metadata is written when the report document is created: by `start` for runs
    /// that append in place, by `merge` for runs that collect.
    #[arg(long = "property", value_name = "NAME=VALUE", value_parser = parse_property)]
    properties: Vec<Property>,
}

fn parse_property(input: &str) -> Result<Property, String> {
    match input.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok(Property::new(name, value)),
        _ => Err(format!("expected NAME=VALUE, found `{input}`")),
    }
}

#[derive(Debug, Args)]
struct TopologyOpts {
    /// How the test run is laid out
    #[arg(long, value_enum, default_value_t)]
    topology: TopologyOpt,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum TopologyOpt {
    /// All tests run in a single process
    #[default]
    Single,

    /// Tests are distributed across worker processes
    Distributed,
}

impl From<TopologyOpt> for RunTopology {
    fn from(opt: TopologyOpt) -> Self {
        match opt {
            TopologyOpt::Single => RunTopology::Single,
            TopologyOpt::Distributed => RunTopology::Distributed,
        }
    }
}

impl IjunitApp {
    /// Initializes logging.
    pub fn init_output(&self) {
        self.output.init();
    }

    /// Executes the app, writing command output to `stdout`.
    ///
    /// Returns the process exit code on success.
    pub fn exec(self, stdout: &mut dyn Write) -> Result<i32> {
        let config = IncrementalJunitConfig::from_sources(self.config.as_deref())?;

        match self.command {
            Command::Start {
                report,
                topology,
                metadata,
            } => {
                let mut builder = session_builder(&config, report.report)?;
                metadata.apply(&mut builder);
                builder
                    .role(ProcessRole::Primary)
                    .topology(topology.topology.into());
                let mut session = builder.build();
                session
                    .session_start()
                    .map_err(|err| ExpectedError::session(session.report_path(), err))?;
                info!(
                    "prepared {} for a {:?} run",
                    session.report_path(),
                    session.strategy(),
                );
                Ok(IjunitExitCode::OK)
            }
            Command::Record {
                report,
                topology,
                worker,
                events,
            } => {
                let mut builder = session_builder(&config, report.report)?;
                builder.topology(topology.topology.into());
                if let Some(tag) = worker {
                    builder.role(ProcessRole::Worker { tag });
                }
                match events {
                    Some(path) => {
                        let file = File::open(&path)
                            .map_err(|err| ExpectedError::EventsOpen { path, err })?;
                        record(builder, BufReader::new(file))
                    }
                    None => record(builder, io::stdin().lock()),
                }
            }
            Command::Merge { report, metadata } => {
                let mut builder = session_builder(&config, report.report)?;
                metadata.apply(&mut builder);
                builder
                    .role(ProcessRole::Primary)
                    .strategy(StrategySetting::Collect);
                let mut session = builder.build();
                let outcome = session
                    .session_finish()
                    .map_err(|err| ExpectedError::session(session.report_path(), err))?;
                if let Err(error) = write_merge_summary(session.report_path(), outcome, stdout) {
                    warn!("failed to write merge summary: {error}");
                }
                Ok(IjunitExitCode::OK)
            }
        }
    }
}

impl MetadataOpts {
    fn apply(self, builder: &mut ReportSessionBuilder) {
        for property in self.properties {
            builder.session_property(property);
        }
    }
}

fn session_builder(
    config: &IncrementalJunitConfig,
    report: Option<Utf8PathBuf>,
) -> Result<ReportSessionBuilder> {
    let mut config = config.clone();
    if let Some(report) = report {
        config.report.path = Some(report);
    }
    let mut builder =
        ReportSessionBuilder::from_config(&config).ok_or(ExpectedError::ReportPathMissing)?;
    // Each invocation is short-lived: interrupted runs are recovered with `ijunit merge`.
    builder.signal_handler(SignalHandlerKind::Noop);
    Ok(builder)
}

fn record(builder: ReportSessionBuilder, reader: impl BufRead) -> Result<i32> {
    let mut session = builder.build();
    // Starting a primary session would discard the results recorded so far.
    if !session.role().is_primary() {
        session
            .session_start()
            .map_err(|err| ExpectedError::session(session.report_path(), err))?;
    }

    let mut recorded = 0;
    let mut failed = 0;
    for event in HostEventReader::new(reader) {
        let event = match event {
            Ok(event) => event,
            Err(error) => {
                warn!("skipping event: {}", DisplayErrorChain::new(&error));
                continue;
            }
        };
        match event {
            HostEvent::Report(report) => session.on_test_report(report),
            HostEvent::Teardown(teardown) => match session.on_teardown(&teardown) {
                Ok(Some(_)) => recorded += 1,
                Ok(None) => {}
                Err(error) => {
                    warn!(
                        "failed to record {}: {}",
                        teardown.node_id,
                        DisplayErrorChain::new(&error),
                    );
                    failed += 1;
                }
            },
        }
    }

    info!(
        "recorded {recorded} test {} for {}",
        plural(recorded, "result", "results"),
        session.report_path(),
    );
    if failed > 0 {
        return Err(ExpectedError::RecordFailed { failed });
    }
    Ok(IjunitExitCode::OK)
}

fn write_merge_summary(
    report_path: &Utf8Path,
    outcome: Option<MergeOutcome>,
    stdout: &mut dyn Write,
) -> io::Result<()> {
    let Some(MergeOutcome::Merged(summary)) = outcome else {
        return writeln!(stdout, "{report_path} is already merged");
    };

    let counts = &summary.counts;
    write!(
        stdout,
        "merged {} {} into {report_path}: {} tests, {} failures, {} errors, {} skipped",
        summary.fragments_merged,
        plural(summary.fragments_merged, "result", "results"),
        counts.tests,
        counts.failures,
        counts.errors,
        counts.skipped,
    )?;
    if summary.fragments_skipped > 0 {
        write!(stdout, " ({} unreadable results skipped)", summary.fragments_skipped)?;
    }
    writeln!(stdout)
}

fn plural(count: usize, singular: &'static str, plural: &'static str) -> &'static str {
    if count == 1 { singular } else { plural }
}
