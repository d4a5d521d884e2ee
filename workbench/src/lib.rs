//! Editing-session runtime around the questscript core: undo history,
//! debounced background validation and generation, and the external syntax
//! checker.

pub mod checker;
pub mod coordinator;
pub mod session;
pub mod worker;

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use questscript::diagnostics::Report;
use questscript::document::Document;
use questscript::generator::Generated;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use checker::{CheckError, CheckOutcome, SyntaxChecker};
pub use coordinator::{Coordinator, Dispatch, JobKind, Ticket};
pub use session::{EditSession, SessionError};
pub use worker::{Job, Outcome, Services, Worker};

/// `[workbench]` settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkbenchConfig {
    /// Idle time after the last edit before text is regenerated.
    pub quiescence_ms: u64,
    /// Syntax checker invoked as `<checker> -c <file>`.
    pub checker: Option<String>,
}

impl Default for WorkbenchConfig {
    fn default() -> Self {
        WorkbenchConfig {
            quiescence_ms: 400,
            checker: None,
        }
    }
}

impl WorkbenchConfig {
    pub fn quiescence(&self) -> Duration {
        Duration::from_millis(self.quiescence_ms)
    }
}

/// An edit session wired to a background worker.
///
/// Mutate through [`Workbench::edit`], then call [`Workbench::tick`]
/// regularly. The latest accepted report, generated text and check result
/// are kept until something newer replaces them.
pub struct Workbench {
    session: EditSession,
    coordinator: Coordinator,
    worker: Worker,
    checking: bool,
    in_flight: usize,
    report: Option<Report>,
    generated: Option<Generated>,
    check: Option<Result<CheckOutcome, CheckError>>,
}

impl Workbench {
    /// Start a session on `document`. A full validation is queued for the
    /// first tick.
    pub fn open(document: Document, services: Services, config: &WorkbenchConfig) -> io::Result<Self> {
        let checking = services.checker.is_some();
        let worker = Worker::spawn(Arc::new(services))?;
        let mut coordinator = Coordinator::new(config.quiescence());
        coordinator.request_full_validation();
        Ok(Workbench {
            session: EditSession::new(document),
            coordinator,
            worker,
            checking,
            in_flight: 0,
            report: None,
            generated: None,
            check: None,
        })
    }

    pub fn session(&self) -> &EditSession {
        &self.session
    }

    pub fn document(&self) -> &Document {
        self.session.document()
    }

    /// Run a mutation at `now` and schedule the follow-up work.
    pub fn edit<T>(&mut self, now: Instant, change: impl FnOnce(&mut EditSession) -> T) -> T {
        let result = change(&mut self.session);
        let edits = self.session.take_edits();
        self.coordinator.note_edits(edits, now);
        result
    }

    pub fn revalidate_all(&mut self) {
        self.coordinator.request_full_validation();
    }

    pub fn regenerate(&mut self, now: Instant) {
        self.coordinator.request_generation(now);
    }

    /// Dispatch due work and take in finished results.
    pub fn tick(&mut self, now: Instant) {
        for outcome in self.worker.drain() {
            self.receive(outcome);
        }
        for dispatch in self.coordinator.poll(now) {
            let job = match dispatch {
                Dispatch::Validate {
                    ticket,
                    edits,
                    full,
                } => Job::Validate {
                    ticket,
                    snapshot: self.session.document().clone(),
                    previous: if full { None } else { self.report.clone() },
                    edits,
                },
                Dispatch::Generate { ticket } => Job::Generate {
                    ticket,
                    snapshot: self.session.document().clone(),
                },
            };
            self.submit(job);
        }
    }

    /// Tick at `now`, then block until no job is outstanding or `timeout`
    /// runs out. Returns whether everything settled.
    pub fn settle(&mut self, now: Instant, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        self.tick(now);
        while self.in_flight > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match self.worker.wait(remaining) {
                Some(outcome) => self.receive(outcome),
                None => return false,
            }
            self.tick(now);
        }
        true
    }

    pub fn report(&self) -> Option<&Report> {
        self.report.as_ref()
    }

    pub fn generated(&self) -> Option<&Generated> {
        self.generated.as_ref()
    }

    pub fn check_result(&self) -> Option<&Result<CheckOutcome, CheckError>> {
        self.check.as_ref()
    }

    fn submit(&mut self, job: Job) {
        if self.worker.submit(job) {
            self.in_flight += 1;
        }
    }

    fn receive(&mut self, outcome: Outcome) {
        self.in_flight = self.in_flight.saturating_sub(1);
        if !self.coordinator.accept(outcome.ticket()) {
            return;
        }
        match outcome {
            Outcome::Validated { report, .. } => {
                debug!(issues = report.len(), "report updated");
                self.report = Some(report);
            }
            Outcome::Generated { generated, .. } => {
                if self.checking {
                    let ticket = self.coordinator.issue(JobKind::Check);
                    self.submit(Job::Check {
                        ticket,
                        text: generated.text.clone(),
                    });
                }
                self.generated = Some(generated);
            }
            Outcome::Checked { result, .. } => self.check = Some(result),
        }
    }
}
