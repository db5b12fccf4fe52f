//! The connection state machine (§4.5) and its lookup table.
//!
//! The original design discovers `(state, event)` handlers by reflecting
//! over annotated fields at construction time. Per Design Notes §9 this
//! port replaces that with an explicit builder, [`StateTable::builder`],
//! compiled once into a dense lookup keyed on enum ordinals. Wildcard
//! combinations (`(state, *)`, `(*, event)`, `(*, *)`) are resolved to
//! their most specific match at build time, not at dispatch time.

use crate::event::EventKind;

/// Connection status (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Virgin,
    Connect,
    Accept,
    Active,
    Closing,
    Closed,
}

impl Status {
    const ALL: [Status; 6] = [
        Status::Virgin,
        Status::Connect,
        Status::Accept,
        Status::Active,
        Status::Closing,
        Status::Closed,
    ];

    fn ordinal(self) -> usize {
        self as usize
    }
}

impl EventKind {
    const ALL: [EventKind; 11] = [
        EventKind::Connect,
        EventKind::Accept,
        EventKind::Register,
        EventKind::Close,
        EventKind::Error,
        EventKind::Execute,
        EventKind::Dispatch,
        EventKind::Op,
        EventKind::Shutdown,
        EventKind::GetConnections,
        EventKind::GetBoundAddresses,
    ];

    fn ordinal(self) -> usize {
        self as usize
    }
}

/// The cause reported to `on_closing`/`on_error` for a connection leaving
/// `ACTIVE`/`CONNECT`/`ACCEPT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCause {
    /// Peer sent end-of-stream.
    Eos,
    /// `ManagedConnection::close()` was called.
    User,
    /// `ManagedConnection::error()` was called, or an internal fault.
    Error,
}

/// A pattern over [`Status`] used when building a [`StateTable`].
#[derive(Debug, Clone, Copy)]
pub enum StatusPattern {
    Exact(Status),
    Any,
}

/// A pattern over [`EventKind`] used when building a [`StateTable`].
#[derive(Debug, Clone, Copy)]
pub enum EventPattern {
    Exact(EventKind),
    Any,
}

fn specificity(status: StatusPattern, event: EventPattern) -> u8 {
    match (status, event) {
        (StatusPattern::Exact(_), EventPattern::Exact(_)) => 3,
        (StatusPattern::Exact(_), EventPattern::Any) => 2,
        (StatusPattern::Any, EventPattern::Exact(_)) => 1,
        (StatusPattern::Any, EventPattern::Any) => 0,
    }
}

/// Dense `(status, event kind)` lookup table. Built once per selector
/// thread kind (dispatch vs. I/O) and shared (read-only) by every
/// instance of that thread kind.
#[derive(Debug, Clone)]
pub struct StateTable {
    // Row-major: status ordinal * N_EVENTS + event ordinal.
    cells: Vec<bool>,
}

impl StateTable {
    pub fn builder() -> StateTableBuilder {
        StateTableBuilder {
            rules: Vec::new(),
        }
    }

    /// Returns `true` if `(status, kind)` is a legal transition per this
    /// table. A `false` result is a protocol violation per §4.1 step 1
    /// and §4.5.
    pub fn allows(&self, status: Status, kind: EventKind) -> bool {
        self.cells[status.ordinal() * EventKind::ALL.len() + kind.ordinal()]
    }
}

/// Builds a [`StateTable`] from `(status pattern, event pattern)` rules,
/// resolving overlapping wildcards to the most specific rule at build
/// time: exact/exact > exact/any > any/exact > any/any.
pub struct StateTableBuilder {
    rules: Vec<(StatusPattern, EventPattern, u8)>,
}

impl StateTableBuilder {
    /// Registers `(status, event)` (with either side possibly `Any`) as a
    /// legal transition.
    pub fn on(mut self, status: StatusPattern, event: EventPattern) -> Self {
        let rank = specificity(status, event);
        self.rules.push((status, event, rank));
        self
    }

    pub fn build(self) -> StateTable {
        let n_events = EventKind::ALL.len();
        let mut cells = vec![false; Status::ALL.len() * n_events];
        // Lower-specificity rules first so that, conceptually, a more
        // specific rule can never be shadowed by a less specific one
        // applied afterwards; since this table only records legality
        // (not a handler value), order does not change the *result* of
        // `allows`, but we still walk from least to most specific to
        // match the priority order the spec documents, in case a future
        // handler-bearing variant of this table needs the same ordering.
        let mut rules = self.rules;
        rules.sort_by_key(|&(_, _, rank)| rank);

        for (status_pat, event_pat, _) in rules {
            let statuses: &[Status] = match status_pat {
                StatusPattern::Exact(s) => std::slice::from_ref(status_ref(s)),
                StatusPattern::Any => &Status::ALL,
            };
            let events: &[EventKind] = match event_pat {
                EventPattern::Exact(e) => std::slice::from_ref(event_ref(e)),
                EventPattern::Any => &EventKind::ALL,
            };
            for &s in statuses {
                for &e in events {
                    cells[s.ordinal() * n_events + e.ordinal()] = true;
                }
            }
        }

        StateTable { cells }
    }
}

// `Status::ALL`/`EventKind::ALL` are `const`s, not `static`s, so a single
// exact pattern cannot directly borrow one of their elements; these tiny
// helpers sidestep the issue by returning a `&'static` to the matched
// variant. Nothing is leaked — every arm borrows a const-promoted value.
fn status_ref(s: Status) -> &'static Status {
    match s {
        Status::Virgin => &Status::Virgin,
        Status::Connect => &Status::Connect,
        Status::Accept => &Status::Accept,
        Status::Active => &Status::Active,
        Status::Closing => &Status::Closing,
        Status::Closed => &Status::Closed,
    }
}

fn event_ref(e: EventKind) -> &'static EventKind {
    match e {
        EventKind::Connect => &EventKind::Connect,
        EventKind::Accept => &EventKind::Accept,
        EventKind::Register => &EventKind::Register,
        EventKind::Close => &EventKind::Close,
        EventKind::Error => &EventKind::Error,
        EventKind::Execute => &EventKind::Execute,
        EventKind::Dispatch => &EventKind::Dispatch,
        EventKind::Op => &EventKind::Op,
        EventKind::Shutdown => &EventKind::Shutdown,
        EventKind::GetConnections => &EventKind::GetConnections,
        EventKind::GetBoundAddresses => &EventKind::GetBoundAddresses,
    }
}

/// The table for [`crate::dispatch_thread::DispatchThread`]: accept,
/// connect, register, close, error and execute from any non-`Active`
/// status, plus the thread-internal kinds.
pub fn dispatch_state_table() -> StateTable {
    use EventKind::*;
    use StatusPattern::Exact as S;
    StateTable::builder()
        .on(S(Status::Virgin), EventPattern::Exact(Connect))
        .on(S(Status::Virgin), EventPattern::Exact(Accept))
        .on(S(Status::Virgin), EventPattern::Exact(Register))
        .on(S(Status::Connect), EventPattern::Exact(Op))
        .on(S(Status::Accept), EventPattern::Exact(Op))
        .on(StatusPattern::Any, EventPattern::Exact(Close))
        .on(StatusPattern::Any, EventPattern::Exact(Error))
        .on(StatusPattern::Any, EventPattern::Exact(Execute))
        .on(StatusPattern::Any, EventPattern::Exact(GetBoundAddresses))
        .on(StatusPattern::Any, EventPattern::Exact(GetConnections))
        .on(StatusPattern::Any, EventPattern::Exact(Shutdown))
        .build()
}

/// The table for [`crate::io_thread::IoThread`]: dispatch (handoff
/// landing), read/write readiness (modeled as `Op`), close, error and
/// execute.
pub fn io_state_table() -> StateTable {
    use EventKind::*;
    StateTable::builder()
        .on(StatusPattern::Exact(Status::Virgin), EventPattern::Exact(Dispatch))
        .on(StatusPattern::Exact(Status::Active), EventPattern::Exact(Op))
        .on(StatusPattern::Exact(Status::Closing), EventPattern::Exact(Op))
        .on(StatusPattern::Any, EventPattern::Exact(Close))
        .on(StatusPattern::Any, EventPattern::Exact(Error))
        .on(StatusPattern::Any, EventPattern::Exact(Execute))
        .on(StatusPattern::Any, EventPattern::Exact(GetConnections))
        .on(StatusPattern::Any, EventPattern::Exact(Shutdown))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_rule_allows_only_that_cell() {
        let table = StateTable::builder()
            .on(StatusPattern::Exact(Status::Virgin), EventPattern::Exact(EventKind::Connect))
            .build();
        assert!(table.allows(Status::Virgin, EventKind::Connect));
        assert!(!table.allows(Status::Virgin, EventKind::Accept));
        assert!(!table.allows(Status::Active, EventKind::Connect));
    }

    #[test]
    fn any_status_wildcard_covers_every_row() {
        let table = StateTable::builder()
            .on(StatusPattern::Any, EventPattern::Exact(EventKind::Shutdown))
            .build();
        for status in Status::ALL {
            assert!(table.allows(status, EventKind::Shutdown));
        }
        assert!(!table.allows(Status::Virgin, EventKind::Connect));
    }

    #[test]
    fn dispatch_table_rejects_unbound_combination() {
        let table = dispatch_state_table();
        assert!(!table.allows(Status::Active, EventKind::Connect));
        assert!(table.allows(Status::Virgin, EventKind::Connect));
        assert!(table.allows(Status::Closed, EventKind::Shutdown));
    }
}
