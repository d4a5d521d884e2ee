//! Scheduling of background validation, generation and syntax checks.
//!
//! The coordinator never touches the document or a thread. It is told about
//! edits and the current time, and answers with what should be dispatched.
//! Time is passed in so the debounce rules can be driven from tests.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use questscript::diagnostics::Edit;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Validate,
    Generate,
    Check,
}

/// Identifies one dispatch. Sequence numbers grow across all job kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    pub kind: JobKind,
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Validate the current snapshot. `edits` lists every edit since the last
    /// accepted report; `full` asks for a from-scratch pass instead.
    Validate {
        ticket: Ticket,
        edits: Vec<Edit>,
        full: bool,
    },
    Generate { ticket: Ticket },
}

#[derive(Debug)]
pub struct Coordinator {
    quiescence: Duration,
    next_seq: u64,
    latest: HashMap<JobKind, u64>,
    /// Edits not yet covered by an accepted report.
    edits: Vec<Edit>,
    /// How many of `edits` each validation in flight covers.
    covered: HashMap<u64, usize>,
    validation_due: bool,
    full_validation: bool,
    last_edit: Option<Instant>,
}

impl Coordinator {
    pub fn new(quiescence: Duration) -> Self {
        Coordinator {
            quiescence,
            next_seq: 0,
            latest: HashMap::new(),
            edits: Vec::new(),
            covered: HashMap::new(),
            validation_due: false,
            full_validation: false,
            last_edit: None,
        }
    }

    /// Record edits made at `now`. Validation becomes due at the next poll
    /// and generation is pushed back by the quiescence window.
    pub fn note_edits(&mut self, edits: Vec<Edit>, now: Instant) {
        if edits.is_empty() {
            return;
        }
        self.edits.extend(edits);
        self.validation_due = true;
        self.last_edit = Some(now);
    }

    /// Ask for a from-scratch validation at the next poll, for a freshly
    /// opened document or an explicit "revalidate all".
    pub fn request_full_validation(&mut self) {
        self.validation_due = true;
        self.full_validation = true;
    }

    /// Ask for generation at the next poll regardless of the window.
    pub fn request_generation(&mut self, now: Instant) {
        self.last_edit = Some(now.checked_sub(self.quiescence).unwrap_or(now));
    }

    /// What to dispatch now.
    pub fn poll(&mut self, now: Instant) -> Vec<Dispatch> {
        let mut out = Vec::new();
        if self.validation_due {
            let ticket = self.issue(JobKind::Validate);
            self.covered.insert(ticket.seq, self.edits.len());
            out.push(Dispatch::Validate {
                ticket,
                edits: self.edits.clone(),
                full: self.full_validation,
            });
            self.validation_due = false;
            self.full_validation = false;
        }
        if let Some(last) = self.last_edit {
            if now.saturating_duration_since(last) >= self.quiescence {
                self.last_edit = None;
                out.push(Dispatch::Generate {
                    ticket: self.issue(JobKind::Generate),
                });
            }
        }
        out
    }

    /// A new ticket, superseding every earlier ticket of the same kind.
    pub fn issue(&mut self, kind: JobKind) -> Ticket {
        self.next_seq += 1;
        self.latest.insert(kind, self.next_seq);
        Ticket {
            kind,
            seq: self.next_seq,
        }
    }

    pub fn is_latest(&self, ticket: Ticket) -> bool {
        self.latest.get(&ticket.kind) == Some(&ticket.seq)
    }

    /// Whether a finished job's result should be used. Stale results are
    /// discarded; an accepted validation retires the edits it covered.
    pub fn accept(&mut self, ticket: Ticket) -> bool {
        let covered = self.covered.remove(&ticket.seq);
        if !self.is_latest(ticket) {
            debug!(kind = ?ticket.kind, seq = ticket.seq, "discarding stale result");
            return false;
        }
        if let Some(count) = covered {
            self.edits.drain(..count.min(self.edits.len()));
            // Earlier validations can no longer be accepted.
            self.covered.clear();
        }
        true
    }

    /// Time until generation is due, if it is pending.
    pub fn generation_due_in(&self, now: Instant) -> Option<Duration> {
        self.last_edit
            .map(|last| self.quiescence.saturating_sub(now.saturating_duration_since(last)))
    }

    pub fn pending_edits(&self) -> &[Edit] {
        &self.edits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use questscript::block::Uid;

    const WINDOW: Duration = Duration::from_millis(400);

    fn edit() -> Vec<Edit> {
        vec![Edit::Changed(Uid::fresh())]
    }

    fn kinds(dispatches: &[Dispatch]) -> Vec<JobKind> {
        dispatches
            .iter()
            .map(|d| match d {
                Dispatch::Validate { ticket, .. } | Dispatch::Generate { ticket } => ticket.kind,
            })
            .collect()
    }

    #[test]
    fn validation_is_immediate_generation_waits() {
        let start = Instant::now();
        let mut c = Coordinator::new(WINDOW);
        c.note_edits(edit(), start);
        assert_eq!(kinds(&c.poll(start)), vec![JobKind::Validate]);
        assert!(c.poll(start + Duration::from_millis(100)).is_empty());
        assert_eq!(kinds(&c.poll(start + WINDOW)), vec![JobKind::Generate]);
        assert!(c.poll(start + WINDOW * 2).is_empty());
    }

    #[test]
    fn edits_push_generation_back() {
        let start = Instant::now();
        let mut c = Coordinator::new(WINDOW);
        c.note_edits(edit(), start);
        c.poll(start);
        c.note_edits(edit(), start + Duration::from_millis(300));
        assert_eq!(
            kinds(&c.poll(start + Duration::from_millis(500))),
            vec![JobKind::Validate]
        );
        assert_eq!(
            c.generation_due_in(start + Duration::from_millis(500)),
            Some(Duration::from_millis(200))
        );
        assert_eq!(
            kinds(&c.poll(start + Duration::from_millis(700))),
            vec![JobKind::Generate]
        );
    }

    #[test]
    fn edits_between_polls_coalesce() {
        let start = Instant::now();
        let mut c = Coordinator::new(WINDOW);
        c.note_edits(edit(), start);
        c.note_edits(edit(), start);
        let dispatched = c.poll(start);
        assert_eq!(dispatched.len(), 1);
        let Dispatch::Validate { edits, full, .. } = &dispatched[0] else {
            panic!("expected a validation");
        };
        assert_eq!(edits.len(), 2);
        assert!(!full);
    }

    #[test]
    fn stale_results_are_discarded() {
        let start = Instant::now();
        let mut c = Coordinator::new(WINDOW);
        c.note_edits(edit(), start);
        let first = c.poll(start);
        c.note_edits(edit(), start);
        let second = c.poll(start);
        let ticket = |d: &[Dispatch]| match &d[0] {
            Dispatch::Validate { ticket, .. } | Dispatch::Generate { ticket } => *ticket,
        };

        assert!(!c.accept(ticket(&first)));
        assert_eq!(c.pending_edits().len(), 2);
        assert!(c.accept(ticket(&second)));
        assert!(c.pending_edits().is_empty());
    }

    #[test]
    fn accepted_validation_keeps_later_edits() {
        let start = Instant::now();
        let mut c = Coordinator::new(WINDOW);
        c.note_edits(edit(), start);
        let first = c.poll(start);
        let Dispatch::Validate { ticket, .. } = &first[0] else {
            panic!("expected a validation");
        };
        c.note_edits(edit(), start);
        assert!(c.accept(*ticket));
        assert_eq!(c.pending_edits().len(), 1);
    }

    #[test]
    fn full_validation_on_request() {
        let mut c = Coordinator::new(WINDOW);
        c.request_full_validation();
        let now = Instant::now();
        let dispatched = c.poll(now);
        assert!(matches!(dispatched[0], Dispatch::Validate { full: true, .. }));
    }
}
