//! Fetch coordination: correlation tokens, timeouts, retries, dedup.
//!
//! Each provider owns a coordinator. Correlation tokens come from a
//! counter shared across the registry so a token identifies its list; the
//! registry-wide issued map lets a response carrying a foreign token be
//! recognized as such rather than silently dropped.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use marquee_core::collections::HashMap;
use marquee_core::{Scheduler, SchedulerPtr, TimerId};

use crate::error::{ErrorReason, ErrorSink, SourceError};
use crate::events::{EventQueue, FetchRequestEvent, Locator};

/// The first correlation token handed out by a registry.
pub const FIRST_CORRELATION_TOKEN: u64 = 101;

/// Which cached edge a request grows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Backward,
    Forward,
}

/// A request removed from the outstanding set, carrying what the caller
/// needs to decide on a retry.
#[derive(Clone, Debug)]
pub struct AckedRequest {
    pub token: u64,
    pub locator: Locator,
    pub side: Side,
    pub retries_left: u8,
}

struct Outstanding {
    locator: Locator,
    side: Side,
    retries_left: u8,
    timer: TimerId,
}

pub struct FetchCoordinator {
    source_type: String,
    list_id: String,
    scheduler: SchedulerPtr,
    events: EventQueue,
    errors: ErrorSink,
    tokens: Rc<Cell<u64>>,
    issued: Rc<RefCell<HashMap<u64, String>>>,
    timeout_ms: u64,
    initial_retries: u8,
    max_per_side: usize,
    // Ordered by token, so iteration finds the oldest request first.
    outstanding: RefCell<BTreeMap<u64, Outstanding>>,
    weak_self: RefCell<Weak<FetchCoordinator>>,
}

impl FetchCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source_type: String,
        list_id: String,
        scheduler: SchedulerPtr,
        events: EventQueue,
        errors: ErrorSink,
        tokens: Rc<Cell<u64>>,
        issued: Rc<RefCell<HashMap<u64, String>>>,
        timeout_ms: u64,
        initial_retries: u8,
        max_per_side: usize,
    ) -> Rc<Self> {
        let coordinator = Rc::new(Self {
            source_type,
            list_id,
            scheduler,
            events,
            errors,
            tokens,
            issued,
            timeout_ms,
            initial_retries,
            max_per_side,
            outstanding: RefCell::new(BTreeMap::new()),
            weak_self: RefCell::new(Weak::new()),
        });
        *coordinator.weak_self.borrow_mut() = Rc::downgrade(&coordinator);
        coordinator
    }

    /// Issues a request unless an overlapping one is already in flight or
    /// the side is at its concurrency cap. Returns the correlation token
    /// when issued.
    pub fn request(&self, locator: Locator, side: Side) -> Option<u64> {
        {
            let outstanding = self.outstanding.borrow();
            if outstanding.values().any(|o| o.locator.overlaps(&locator)) {
                return None;
            }
            let on_side = outstanding.values().filter(|o| o.side == side).count();
            if on_side >= self.max_per_side {
                return None;
            }
        }
        Some(self.issue(locator, side, self.initial_retries))
    }

    /// Re-issues an acknowledged request under a fresh token, or records
    /// the terminal error when its retries are spent.
    pub fn retry(&self, acked: AckedRequest) {
        if acked.retries_left > 0 {
            self.issue(acked.locator, acked.side, acked.retries_left - 1);
        } else {
            self.errors.push(SourceError::new(
                ErrorReason::InternalError,
                self.list_id.clone(),
                format!("fetch retries exhausted for request {}", acked.token),
            ));
        }
    }

    /// Resolves `token`, cancelling its timeout. `None` when the token is
    /// not outstanding here (late, retried, or foreign).
    pub fn acknowledge(&self, token: u64) -> Option<AckedRequest> {
        let entry = self.outstanding.borrow_mut().remove(&token)?;
        self.scheduler.cancel(entry.timer);
        Some(AckedRequest {
            token,
            locator: entry.locator,
            side: entry.side,
            retries_left: entry.retries_left,
        })
    }

    /// Resolves the oldest outstanding request overlapping `locator`;
    /// unsolicited responses are treated as answering that request.
    pub fn acknowledge_overlapping(&self, locator: &Locator) -> Option<AckedRequest> {
        let token = self
            .outstanding
            .borrow()
            .iter()
            .find(|(_, o)| o.locator.overlaps(locator))
            .map(|(token, _)| *token)?;
        self.acknowledge(token)
    }

    pub fn is_outstanding(&self, token: u64) -> bool {
        self.outstanding.borrow().contains_key(&token)
    }

    /// Which list a token was issued for, anywhere in this registry.
    pub fn issued_for(&self, token: u64) -> Option<String> {
        self.issued.borrow().get(&token).cloned()
    }

    pub fn outstanding_count(&self) -> usize {
        self.outstanding.borrow().len()
    }

    pub fn outstanding_on_side(&self, side: Side) -> usize {
        self.outstanding
            .borrow()
            .values()
            .filter(|o| o.side == side)
            .count()
    }

    pub fn has_overlapping(&self, locator: &Locator) -> bool {
        self.outstanding
            .borrow()
            .values()
            .any(|o| o.locator.overlaps(locator))
    }

    /// Cancels every outstanding request failing `keep`, with its timer.
    pub fn cancel_where(&self, keep: impl Fn(&Locator) -> bool) {
        let mut outstanding = self.outstanding.borrow_mut();
        let cancelled: Vec<u64> = outstanding
            .iter()
            .filter(|(_, o)| !keep(&o.locator))
            .map(|(token, _)| *token)
            .collect();
        for token in cancelled {
            if let Some(entry) = outstanding.remove(&token) {
                self.scheduler.cancel(entry.timer);
                log::debug!("cancelled fetch request {} list={}", token, self.list_id);
            }
        }
    }

    pub fn cancel_all(&self) {
        self.cancel_where(|_| false);
    }

    fn issue(&self, locator: Locator, side: Side, retries_left: u8) -> u64 {
        let token = self.tokens.get();
        self.tokens.set(token + 1);
        self.issued.borrow_mut().insert(token, self.list_id.clone());

        self.events.push(FetchRequestEvent {
            source_type: self.source_type.clone(),
            list_id: self.list_id.clone(),
            correlation_token: token,
            locator: locator.clone(),
        });

        let weak = self.weak_self.borrow().clone();
        let timer = self.scheduler.schedule(
            self.timeout_ms,
            Box::new(move || {
                if let Some(coordinator) = weak.upgrade() {
                    coordinator.handle_timeout(token);
                }
            }),
        );

        self.outstanding.borrow_mut().insert(
            token,
            Outstanding {
                locator,
                side,
                retries_left,
                timer,
            },
        );
        token
    }

    fn handle_timeout(&self, token: u64) {
        let Some(entry) = self.outstanding.borrow_mut().remove(&token) else {
            return;
        };
        self.errors.push(SourceError::new(
            ErrorReason::LoadTimeout,
            self.list_id.clone(),
            format!("request {} timed out", token),
        ));
        self.retry(AckedRequest {
            token,
            locator: entry.locator,
            side: entry.side,
            retries_left: entry.retries_left,
        });
    }
}

impl Drop for FetchCoordinator {
    fn drop(&mut self) {
        for entry in self.outstanding.borrow().values() {
            self.scheduler.cancel(entry.timer);
        }
    }
}
