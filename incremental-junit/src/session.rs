// Copyright (c) The incremental-junit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Coordinating a reporting session across the lifecycle of a test run.
//!
//! A [`ReportSession`] is driven by the host runner:
//!
//! 1. [`session_start`](ReportSession::session_start) once, before any test runs.
//! 2. For every test, [`on_test_report`](ReportSession::on_test_report) for each phase, then
//!    [`on_teardown`](ReportSession::on_teardown) once all phases are done.
//! 3. [`session_finish`](ReportSession::session_finish) once, after all tests ran.
//!
//! Only the primary process initializes the report and merges it. Worker processes only record
//! their own test cases.

use crate::{
    accumulator::{Accumulator, MergeOutcome, Strategy},
    config::{IncrementalJunitConfig, StrategySetting},
    enrichment::{CompletedTest, EnrichmentRegistry, HostProperties},
    errors::{DisplayErrorChain, RecordError, SessionError},
    events::{TestReportEvent, TestTeardown},
    fragment::{FragmentStore, FragmentWriter, PRIMARY_WORKER_TAG},
    lock::{ReportLock, SentinelLock},
    metadata::{HostIdentity, MetadataSource},
    signal::{SignalHandler, SignalHandlerKind, ShutdownSignal},
    testcase::{DEFAULT_SKIP_TYPE, TestCaseBuilder},
    traceback::TracebackCleaner,
    tracker::{FailureAnnotator, TrackerConnector, TrackerCredentials, connect_with_retries},
};
use camino::{Utf8Path, Utf8PathBuf};
use debug_ignore::DebugIgnore;
use junit_report::{Property, TestCase};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tracing::{debug, info, warn};

/// The default environment variable marking worker processes.
pub static DEFAULT_WORKER_ENV_VAR: &str = "INCREMENTAL_JUNIT_WORKER";

/// The role of this process in the run.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum ProcessRole {
    /// The coordinating process. Initializes and merges the report.
    Primary,

    /// A subordinate process. Only records its own test cases.
    Worker {
        /// The tag distinguishing this worker's fragments, e.g. `gw0`.
        tag: String,
    },
}

impl ProcessRole {
    /// Determines the role from an environment variable: a process is a worker if `var` is set
    /// to a non-empty value, which is used as its tag.
    pub fn from_env(var: &str) -> Self {
        match std::env::var(var) {
            Ok(tag) if !tag.is_empty() => Self::Worker { tag },
            _ => Self::Primary,
        }
    }

    /// Returns true if this is the primary process.
    pub fn is_primary(&self) -> bool {
        matches!(self, Self::Primary)
    }

    /// Returns the tag used in fragment file names.
    pub fn worker_tag(&self) -> &str {
        match self {
            Self::Primary => PRIMARY_WORKER_TAG,
            Self::Worker { tag } => tag,
        }
    }
}

/// The shape of the run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RunTopology {
    /// All tests run in this process.
    Single,

    /// Tests are distributed across worker processes.
    Distributed,
}

/// Where a session is in its lifecycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum SessionState {
    /// `session_start` hasn't been called yet.
    NotStarted,

    /// The session was started; no test has been reported yet.
    Initialized,

    /// Tests are being recorded.
    Running,

    /// The terminal merge is in progress.
    Merging,

    /// The session is finished. Further events are ignored.
    Done,
}

#[derive(Debug)]
struct TrackerSetup {
    credentials: TrackerCredentials,
    attempts: u32,
    backoff: Duration,
    connector: Option<DebugIgnore<Box<dyn TrackerConnector>>>,
}

/// Builds a [`ReportSession`].
#[derive(Debug)]
pub struct ReportSessionBuilder<L = SentinelLock> {
    report_path: Utf8PathBuf,
    work_dir: Option<Utf8PathBuf>,
    suite_name: Option<String>,
    strategy: StrategySetting,
    topology: RunTopology,
    role: ProcessRole,
    lock: L,
    markers: Option<Vec<String>>,
    skip_type: String,
    enrichment: EnrichmentRegistry,
    session_properties: Vec<Property>,
    host: Option<HostIdentity>,
    tracker: Option<TrackerSetup>,
    signal_handler: SignalHandlerKind,
}

impl ReportSessionBuilder<SentinelLock> {
    /// Creates a builder for a report at `report_path`, with default settings.
    pub fn new(report_path: impl Into<Utf8PathBuf>) -> Self {
        let report_path = report_path.into();
        let lock = SentinelLock::for_report(&report_path);
        Self {
            report_path,
            work_dir: None,
            suite_name: None,
            strategy: StrategySetting::Auto,
            topology: RunTopology::Single,
            role: ProcessRole::from_env(DEFAULT_WORKER_ENV_VAR),
            lock,
            markers: None,
            skip_type: DEFAULT_SKIP_TYPE.to_owned(),
            enrichment: EnrichmentRegistry::new(),
            session_properties: Vec::new(),
            host: None,
            tracker: None,
            signal_handler: SignalHandlerKind::Standard,
        }
    }

    /// Creates a builder from configuration.
    ///
    /// Returns `None` if no report path is configured: reporting is disabled.
    pub fn from_config(config: &IncrementalJunitConfig) -> Option<Self> {
        let settings = &config.report;
        let report_path = settings.path.clone()?;

        let mut builder = Self::new(report_path);
        builder.lock = SentinelLock::for_report(&builder.report_path)
            .with_timeout(settings.lock_timeout)
            .with_poll_interval(settings.lock_poll_interval);
        builder.work_dir = settings.work_dir.clone();
        builder.suite_name = Some(settings.suite_name.clone());
        builder.strategy = settings.strategy;
        builder.role = ProcessRole::from_env(&settings.worker_env_var);
        builder.markers = Some(settings.internal_frame_markers.clone());
        builder.skip_type = settings.skip_type.clone();

        if let Some(credentials) = config.tracker.credentials() {
            builder.tracker = Some(TrackerSetup {
                credentials,
                attempts: config.tracker.connect_attempts,
                backoff: config.tracker.connect_backoff,
                connector: None,
            });
        }
        Some(builder)
    }
}

impl<L: ReportLock + 'static> ReportSessionBuilder<L> {
    /// Sets the role of this process.
    pub fn role(&mut self, role: ProcessRole) -> &mut Self {
        self.role = role;
        self
    }

    /// Sets the shape of the run.
    pub fn topology(&mut self, topology: RunTopology) -> &mut Self {
        self.topology = topology;
        self
    }

    /// Sets the accumulation strategy.
    pub fn strategy(&mut self, strategy: StrategySetting) -> &mut Self {
        self.strategy = strategy;
        self
    }

    /// Sets the directory the fragment store is created in.
    pub fn work_dir(&mut self, work_dir: impl Into<Utf8PathBuf>) -> &mut Self {
        self.work_dir = Some(work_dir.into());
        self
    }

    /// Sets the name of the test suite.
    pub fn suite_name(&mut self, suite_name: impl Into<String>) -> &mut Self {
        self.suite_name = Some(suite_name.into());
        self
    }

    /// Returns the enrichment registry, to register enrichers.
    pub fn enrichment_mut(&mut self) -> &mut EnrichmentRegistry {
        &mut self.enrichment
    }

    /// Adds a fixed property to the session metadata, after the host identity and before
    /// anything contributed by registered enrichers.
    pub fn session_property(&mut self, property: impl Into<Property>) -> &mut Self {
        self.session_properties.push(property.into());
        self
    }

    /// Sets a fixed host identity instead of detecting it.
    pub fn host_identity(&mut self, host: HostIdentity) -> &mut Self {
        self.host = Some(host);
        self
    }

    /// Enables issue-tracker annotation with the given credentials and retry policy.
    pub fn tracker(
        &mut self,
        credentials: TrackerCredentials,
        attempts: u32,
        backoff: Duration,
    ) -> &mut Self {
        let connector = self.tracker.take().and_then(|setup| setup.connector);
        self.tracker = Some(TrackerSetup {
            credentials,
            attempts,
            backoff,
            connector,
        });
        self
    }

    /// Sets the client used to connect to the issue tracker.
    ///
    /// Has no effect unless tracker credentials are configured.
    pub fn tracker_connector(&mut self, connector: impl TrackerConnector + 'static) -> &mut Self {
        match &mut self.tracker {
            Some(setup) => setup.connector = Some(DebugIgnore(Box::new(connector))),
            None => debug!("ignoring tracker connector: no tracker credentials configured"),
        }
        self
    }

    /// Sets the kind of signal handler installed by the primary at session start.
    pub fn signal_handler(&mut self, kind: SignalHandlerKind) -> &mut Self {
        self.signal_handler = kind;
        self
    }

    /// Replaces the report lock.
    pub fn lock<L2: ReportLock + 'static>(self, lock: L2) -> ReportSessionBuilder<L2> {
        ReportSessionBuilder {
            report_path: self.report_path,
            work_dir: self.work_dir,
            suite_name: self.suite_name,
            strategy: self.strategy,
            topology: self.topology,
            role: self.role,
            lock,
            markers: self.markers,
            skip_type: self.skip_type,
            enrichment: self.enrichment,
            session_properties: self.session_properties,
            host: self.host,
            tracker: self.tracker,
            signal_handler: self.signal_handler,
        }
    }

    /// Builds the session.
    pub fn build(self) -> ReportSession<L> {
        let mut enrichment = EnrichmentRegistry::new();
        enrichment
            .register(HostProperties::new(self.session_properties))
            .extend(self.enrichment);
        let enrichment = Arc::new(enrichment);
        let store = FragmentStore::for_report(&self.report_path, self.work_dir.as_deref());
        let host = self.host.unwrap_or_else(HostIdentity::detect);

        let mut accumulator = Accumulator::with_lock(self.report_path, self.lock);
        accumulator
            .set_store(store.clone())
            .set_metadata(MetadataSource::new(host, enrichment.clone()));
        if let Some(suite_name) = self.suite_name {
            accumulator.set_suite_name(suite_name);
        }

        let cleaner = match self.markers {
            Some(markers) => TracebackCleaner::new(markers),
            None => TracebackCleaner::default(),
        };
        let mut test_case_builder = TestCaseBuilder::new(cleaner, enrichment);
        test_case_builder.set_skip_type(self.skip_type);

        ReportSession {
            writer: FragmentWriter::new(store, self.role.worker_tag()),
            role: self.role,
            strategy: self.strategy.resolve(self.topology),
            state: SessionState::NotStarted,
            accumulator: Arc::new(accumulator),
            builder: test_case_builder,
            pending: HashMap::new(),
            tracker: self.tracker,
            signal_kind: self.signal_handler,
            signal_handler: None,
        }
    }
}

/// The reporting state of one process in a test run.
#[derive(Debug)]
pub struct ReportSession<L: ReportLock + 'static = SentinelLock> {
    role: ProcessRole,
    strategy: Strategy,
    state: SessionState,
    accumulator: Arc<Accumulator<L>>,
    writer: FragmentWriter,
    builder: TestCaseBuilder,
    // The last recordable report per test, waiting for its teardown.
    pending: HashMap<String, TestReportEvent>,
    tracker: Option<TrackerSetup>,
    signal_kind: SignalHandlerKind,
    signal_handler: Option<SignalHandler>,
}

impl ReportSession<SentinelLock> {
    /// Creates a session from configuration, for a run of the given shape.
    ///
    /// Returns `None` if no report path is configured: reporting is disabled.
    pub fn from_config(config: &IncrementalJunitConfig, topology: RunTopology) -> Option<Self> {
        let mut builder = ReportSessionBuilder::from_config(config)?;
        builder.topology(topology);
        Some(builder.build())
    }
}

impl<L: ReportLock + 'static> ReportSession<L> {
    /// Returns the role of this process.
    pub fn role(&self) -> &ProcessRole {
        &self.role
    }

    /// Returns the resolved accumulation strategy.
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns the report path.
    pub fn report_path(&self) -> &Utf8Path {
        self.accumulator.report_path()
    }

    /// Returns the accumulator owning the report.
    pub fn accumulator(&self) -> &Arc<Accumulator<L>> {
        &self.accumulator
    }

    /// Returns the number of tests with a report that haven't been torn down yet.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Starts the session.
    ///
    /// The primary connects the issue tracker, prepares the report (a fresh document when
    /// appending, an empty fragment store when collecting) and installs the signal handler.
    /// Workers only enable failure annotation if a tracker is configured.
    pub fn session_start(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::NotStarted {
            warn!(state = ?self.state, "session already started, ignoring");
            return Ok(());
        }

        if self.role.is_primary() {
            self.connect_tracker();
            match self.strategy {
                Strategy::Append => self.accumulator.initialize()?,
                Strategy::Collect => self.accumulator.store().reset()?,
            }
            self.install_signal_handler()?;
        } else if self.tracker.is_some() {
            // Workers never connect: every failure gets its id appended.
            self.builder.set_annotator(FailureAnnotator::disconnected());
        }

        info!(
            path = %self.report_path(),
            role = ?self.role,
            strategy = ?self.strategy,
            "report session started",
        );
        self.state = SessionState::Initialized;
        Ok(())
    }

    /// Handles the report for one phase of a test.
    ///
    /// The last setup or call report before the test's teardown is the one recorded. Reruns
    /// and teardown reports are ignored.
    pub fn on_test_report(&mut self, report: TestReportEvent) {
        if self.state == SessionState::Done {
            debug!(node_id = %report.node_id, "session done, ignoring test report");
            return;
        }
        self.state = SessionState::Running;

        if report.is_recordable() {
            self.pending.insert(report.node_id.clone(), report);
        }
    }

    /// Records a test once all its phases are done, returning the recorded test case.
    ///
    /// Returns `Ok(None)` if no recordable report was seen for the test. An error only affects
    /// this test case.
    pub fn on_teardown(&mut self, teardown: &TestTeardown) -> Result<Option<TestCase>, RecordError> {
        if self.state == SessionState::Done {
            debug!(node_id = %teardown.node_id, "session done, ignoring teardown");
            return Ok(None);
        }
        let Some(report) = self.pending.remove(&teardown.node_id) else {
            debug!(node_id = %teardown.node_id, "no report for test, ignoring teardown");
            return Ok(None);
        };
        self.state = SessionState::Running;

        let test_case = self.builder.build(&CompletedTest {
            report: &report,
            teardown,
        });
        match self.strategy {
            Strategy::Collect => {
                self.writer.record(&teardown.node_id, &test_case)?;
            }
            Strategy::Append => {
                self.accumulator.append(test_case.clone())?;
            }
        }
        Ok(Some(test_case))
    }

    /// Finishes the session.
    ///
    /// When collecting, the primary performs the terminal merge and the outcome is returned.
    /// Otherwise the report is already complete and `None` is returned.
    pub fn session_finish(&mut self) -> Result<Option<MergeOutcome>, SessionError> {
        if self.state == SessionState::Done {
            return Ok(None);
        }
        if !self.pending.is_empty() {
            debug!(count = self.pending.len(), "tests without a teardown are not recorded");
        }

        let outcome = if self.role.is_primary() && self.strategy == Strategy::Collect {
            self.state = SessionState::Merging;
            Some(self.accumulator.merge())
        } else {
            None
        };

        // The watcher is stopped only once the merge is done.
        self.signal_handler = None;
        self.state = SessionState::Done;
        Ok(outcome.transpose()?)
    }

    fn connect_tracker(&mut self) {
        let Some(setup) = self.tracker.take() else {
            return;
        };
        let Some(connector) = &setup.connector else {
            warn!(
                url = %setup.credentials.url,
                "issue tracker configured but no tracker client available, disabling integration",
            );
            return;
        };

        match connect_with_retries(
            connector.0.as_ref(),
            &setup.credentials,
            setup.attempts,
            setup.backoff,
        ) {
            Ok(tracker) => {
                self.builder.set_annotator(FailureAnnotator::new(tracker));
            }
            Err(error) => {
                warn!(
                    "disabling issue tracker integration for this run: {}",
                    DisplayErrorChain::new(&error),
                );
            }
        }
    }

    fn install_signal_handler(&mut self) -> Result<(), SessionError> {
        let accumulator = self.accumulator.clone();
        let strategy = self.strategy;
        let handler = self.signal_kind.install(move |signal: ShutdownSignal| {
            if strategy != Strategy::Collect {
                return;
            }
            info!(?signal, "merging report before exiting");
            if let Err(error) = accumulator.merge() {
                warn!("failed to merge report: {}", DisplayErrorChain::new(&error));
            }
        })?;
        self.signal_handler = Some(handler);
        Ok(())
    }
}
