use std::io;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use questscript::config::DiagnosticsConfig;
use questscript::diagnostics::{Diagnostics, Edit, Report};
use questscript::document::Document;
use questscript::generator::{Generated, Generator};
use questscript::plugin::PluginRegistry;
use tracing::{debug, warn};

use crate::checker::{CheckError, CheckOutcome, SyntaxChecker};
use crate::coordinator::Ticket;

/// Read-only collaborators every job may use.
#[derive(Debug, Default)]
pub struct Services {
    pub plugins: PluginRegistry,
    pub diagnostics: DiagnosticsConfig,
    pub checker: Option<SyntaxChecker>,
}

/// Work handed to the background thread. Documents are snapshots taken at
/// dispatch time.
#[derive(Debug)]
pub enum Job {
    Validate {
        ticket: Ticket,
        snapshot: Document,
        previous: Option<Report>,
        edits: Vec<Edit>,
    },
    Generate {
        ticket: Ticket,
        snapshot: Document,
    },
    Check {
        ticket: Ticket,
        text: String,
    },
}

#[derive(Debug)]
pub enum Outcome {
    Validated {
        ticket: Ticket,
        report: Report,
    },
    Generated {
        ticket: Ticket,
        generated: Generated,
    },
    Checked {
        ticket: Ticket,
        result: Result<CheckOutcome, CheckError>,
    },
}

impl Outcome {
    pub fn ticket(&self) -> Ticket {
        match self {
            Outcome::Validated { ticket, .. }
            | Outcome::Generated { ticket, .. }
            | Outcome::Checked { ticket, .. } => *ticket,
        }
    }
}

/// One background thread running jobs in the order they were submitted.
pub struct Worker {
    jobs: Option<Sender<Job>>,
    outcomes: Receiver<Outcome>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn spawn(services: Arc<Services>) -> io::Result<Self> {
        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let (out_tx, out_rx) = mpsc::channel::<Outcome>();
        let handle = thread::Builder::new()
            .name("questscript-worker".to_string())
            .spawn(move || {
                for job in job_rx {
                    let outcome = run(&services, job);
                    if out_tx.send(outcome).is_err() {
                        break;
                    }
                }
                debug!("worker stopped");
            })?;
        Ok(Worker {
            jobs: Some(job_tx),
            outcomes: out_rx,
            handle: Some(handle),
        })
    }

    /// Queue a job. Returns false if the worker thread has gone away.
    pub fn submit(&self, job: Job) -> bool {
        match &self.jobs {
            Some(jobs) => jobs.send(job).is_ok(),
            None => false,
        }
    }

    /// Every finished outcome, without blocking.
    pub fn drain(&self) -> Vec<Outcome> {
        self.outcomes.try_iter().collect()
    }

    /// Wait up to `timeout` for the next outcome.
    pub fn wait(&self, timeout: Duration) -> Option<Outcome> {
        match self.outcomes.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                warn!("worker thread exited unexpectedly");
                None
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // Closing the job channel ends the thread's loop.
        self.jobs.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("worker thread panicked");
            }
        }
    }
}

fn run(services: &Services, job: Job) -> Outcome {
    match job {
        Job::Validate {
            ticket,
            snapshot,
            previous,
            edits,
        } => {
            let diagnostics = Diagnostics::new(&services.diagnostics, &services.plugins);
            let report = match previous {
                Some(previous) => diagnostics.revalidate(&snapshot, &previous, &edits),
                None => diagnostics.validate(&snapshot),
            };
            Outcome::Validated { ticket, report }
        }
        Job::Generate { ticket, snapshot } => Outcome::Generated {
            ticket,
            generated: Generator::new(&services.plugins).generate(&snapshot),
        },
        Job::Check { ticket, text } => {
            let result = match &services.checker {
                Some(checker) => checker.check(&text),
                None => Err(CheckError::Unavailable {
                    tool: String::new(),
                    source: io::Error::new(io::ErrorKind::NotFound, "no syntax checker configured"),
                }),
            };
            Outcome::Checked { ticket, result }
        }
    }
}
