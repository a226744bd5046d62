use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Once;
use std::time::Duration;

use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::Map;
use crate::common::config::{MachineMetaData, MachineTypeConfiguration, SiteConfiguration};
use crate::common::error::CommandExecutionFailure;
use crate::common::executor::{CommandFuture, CommandOutput, CommandResult, CommandRunner};

thread_local! {
    static CAPTURED_LOGS: RefCell<Vec<(Level, String)>> = const { RefCell::new(Vec::new()) };
}

/// Forwards to `env_logger` and keeps every record of the current thread, so that a test
/// can check what its own code logged.
struct CapturingLogger {
    inner: env_logger::Logger,
}

impl Log for CapturingLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        CAPTURED_LOGS.with(|logs| {
            logs.borrow_mut()
                .push((record.level(), record.args().to_string()))
        });
        if self.inner.matches(record) {
            self.inner.log(record);
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

pub fn init_test_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let inner = env_logger::Builder::default()
            .filter(None, LevelFilter::Debug)
            .is_test(true)
            .build();
        let logger: &'static CapturingLogger = Box::leak(Box::new(CapturingLogger { inner }));
        if log::set_logger(logger).is_ok() {
            log::set_max_level(LevelFilter::Trace);
        }
    });
}

/// Installs the test logger and forgets everything logged so far on this thread.
pub fn capture_logs() {
    init_test_logging();
    CAPTURED_LOGS.with(|logs| logs.borrow_mut().clear());
}

/// Messages logged on this thread at `level` since the last [`capture_logs`].
pub fn logged_messages(level: Level) -> Vec<String> {
    CAPTURED_LOGS.with(|logs| {
        logs.borrow()
            .iter()
            .filter(|(logged, _)| *logged == level)
            .map(|(_, message)| message.clone())
            .collect()
    })
}

#[derive(Default)]
struct MockState {
    commands: Vec<String>,
    outcomes: VecDeque<CommandResult>,
    fallback: Option<CommandResult>,
    delay: Duration,
}

/// Command runner that records every command and replays prepared outcomes.
///
/// Queued outcomes are consumed first, then the fallback outcome is repeated. Clones share
/// the same state.
#[derive(Clone, Default)]
pub struct MockRunner {
    state: Rc<RefCell<MockState>>,
}

impl MockRunner {
    pub fn with_stdout(stdout: impl Into<String>) -> Self {
        let runner = Self::default();
        runner.set_fallback(Ok(CommandOutput::with_stdout(stdout)));
        runner
    }

    pub fn failing(failure: CommandExecutionFailure) -> Self {
        let runner = Self::default();
        runner.set_fallback(Err(failure));
        runner
    }

    pub fn set_fallback(&self, outcome: CommandResult) {
        self.state.borrow_mut().fallback = Some(outcome);
    }

    pub fn push_stdout(&self, stdout: impl Into<String>) {
        self.push(Ok(CommandOutput::with_stdout(stdout)));
    }

    pub fn push_failure(&self, failure: CommandExecutionFailure) {
        self.push(Err(failure));
    }

    pub fn push(&self, outcome: CommandResult) {
        self.state.borrow_mut().outcomes.push_back(outcome);
    }

    /// Every command answers only after `delay`.
    pub fn set_delay(&self, delay: Duration) {
        self.state.borrow_mut().delay = delay;
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.borrow().commands.clone()
    }

    pub fn last_command(&self) -> Option<String> {
        self.state.borrow().commands.last().cloned()
    }

    pub fn as_runner(&self) -> Rc<dyn CommandRunner> {
        Rc::new(self.clone())
    }
}

impl CommandRunner for MockRunner {
    fn run_command(&self, command: &str) -> CommandFuture {
        let mut state = self.state.borrow_mut();
        state.commands.push(command.to_string());
        let outcome = state
            .outcomes
            .pop_front()
            .or_else(|| state.fallback.clone())
            .unwrap_or_else(|| Ok(CommandOutput::default()));
        let delay = state.delay;
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            outcome
        })
    }
}

pub fn command_failure(exit_code: i32) -> CommandExecutionFailure {
    CommandExecutionFailure::new(
        format!("Command failed with exit code {exit_code}"),
        String::new(),
        "Failed".to_string(),
        Some(exit_code),
    )
}

/// Site with a regular machine type `test2large` (8 cores, 32 GB) and a machine type
/// `testunknownresource` that additionally requests `foo = 3`. Snapshots live 10 minutes.
pub fn site_configuration() -> SiteConfiguration {
    let mut machine_type_configuration = Map::default();
    let mut machine_meta_data = Map::default();
    for name in ["test2large", "testunknownresource"] {
        machine_type_configuration.insert(
            name.to_string(),
            MachineTypeConfiguration::new("submit.jdl"),
        );
        machine_meta_data.insert(name.to_string(), MachineMetaData::new(8, 32.0));
    }
    if let Some(meta_data) = machine_meta_data.get_mut("testunknownresource") {
        meta_data
            .extra
            .insert("foo".to_string(), toml::Value::Integer(3));
    }

    SiteConfiguration {
        max_age: 10,
        unreachable_drone_policy: Default::default(),
        stale_snapshot_policy: Default::default(),
        machine_type_configuration,
        machine_meta_data,
    }
}
