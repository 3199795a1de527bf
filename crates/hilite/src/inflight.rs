//! In-flight table: busy unit -> the single request it is serving.
//!
//! This is how an unordered completion finds its caller. Because a unit
//! serves one request at a time, the sending unit's id is the whole key; a
//! completion for an unbound unit means the scheduler's bookkeeping is
//! inconsistent and is reported loudly rather than swallowed.

use std::collections::HashMap;

use crate::protocol::UnitId;
use crate::request::HighlightRequest;

#[derive(Debug, Default)]
pub(crate) struct InFlightTable {
    entries: HashMap<UnitId, HighlightRequest>,
}

impl InFlightTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record that `unit` is now serving `request`.
    pub(crate) fn bind(&mut self, unit: UnitId, request: HighlightRequest) {
        let previous = self.entries.insert(unit, request);
        if let Some(stale) = previous {
            // Bug: a unit was dispatched while still bound (no multiplexing).
            debug_assert!(false, "unit {unit} bound twice");
            tracing::error!(%unit, stale = %stale.name(), "Bug: unit bound while already serving a request");
        }
    }

    /// Remove and return the request bound to a completing unit.
    ///
    /// `None` is an invariant violation on the completion path; the caller
    /// asserts and logs. Crash/teardown paths use [`Self::remove`] instead,
    /// where an unbound unit is normal.
    pub(crate) fn take_and_clear(&mut self, unit: UnitId) -> Option<HighlightRequest> {
        self.entries.remove(&unit)
    }

    /// Remove a binding if present (unit crash, timeout, shutdown).
    pub(crate) fn remove(&mut self, unit: UnitId) -> Option<HighlightRequest> {
        self.entries.remove(&unit)
    }

    pub(crate) fn contains(&self, unit: UnitId) -> bool {
        self.entries.contains_key(&unit)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Drain all bindings (shutdown path).
    pub(crate) fn drain(&mut self) -> impl Iterator<Item = (UnitId, HighlightRequest)> + '_ {
        self.entries.drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str) -> HighlightRequest {
        let (req, _rx) = HighlightRequest::new(name.to_string(), String::new());
        req
    }

    #[test]
    fn bind_and_take() {
        let mut table = InFlightTable::new();
        let unit = UnitId::new();

        table.bind(unit, request("a"));
        assert!(table.contains(unit));

        let req = table.take_and_clear(unit).unwrap();
        assert_eq!(req.name(), "a");
        assert!(!table.contains(unit));
    }

    #[test]
    fn take_unbound_unit_returns_none() {
        let mut table = InFlightTable::new();
        assert!(table.take_and_clear(UnitId::new()).is_none());
    }

    #[test]
    fn bindings_are_per_unit() {
        let mut table = InFlightTable::new();
        let u1 = UnitId::new();
        let u2 = UnitId::new();

        table.bind(u1, request("a"));
        table.bind(u2, request("b"));

        assert_eq!(table.take_and_clear(u2).unwrap().name(), "b");
        assert_eq!(table.take_and_clear(u1).unwrap().name(), "a");
    }

    #[test]
    fn drain_empties_table() {
        let mut table = InFlightTable::new();
        table.bind(UnitId::new(), request("a"));
        table.bind(UnitId::new(), request("b"));

        let drained: Vec<_> = table.drain().collect();
        assert_eq!(drained.len(), 2);
        assert_eq!(table.len(), 0);
    }
}
