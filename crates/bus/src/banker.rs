//! Deadlock prevention via the Banker's Algorithm.
//!
//! Concurrent agents acquire shared resources (file locks, shell slots,
//! network tokens) through this broker. A request is granted only when
//! the resulting state is *safe*: some completion order exists in which
//! every declared process can still obtain its worst-case demand. An
//! unsafe grant is rolled back and denied; the caller retries after other
//! processes release.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Serialize;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Resource quantities keyed by resource name.
pub type Amounts = HashMap<String, u64>;

/// Outcome of [`ResourceBroker::request`].
#[derive(Debug, Clone, Serialize)]
pub struct GrantOutcome {
    pub granted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl GrantOutcome {
    fn granted() -> Self {
        Self {
            granted: true,
            reason: None,
        }
    }

    fn denied(reason: impl Into<String>) -> Self {
        Self {
            granted: false,
            reason: Some(reason.into()),
        }
    }
}

/// Matrix snapshot for audit endpoints and tests.
#[derive(Debug, Clone, Serialize)]
pub struct BrokerSnapshot {
    pub available: Amounts,
    pub allocation: HashMap<String, Amounts>,
    pub need: HashMap<String, Amounts>,
}

#[derive(Default)]
struct BrokerState {
    total: Amounts,
    available: Amounts,
    /// Declared worst-case demand per process.
    max: HashMap<String, Amounts>,
    /// Currently held resources per process.
    allocation: HashMap<String, Amounts>,
}

impl BrokerState {
    fn need_of(&self, pid: &str) -> Amounts {
        let max = self.max.get(pid).cloned().unwrap_or_default();
        let alloc = self.allocation.get(pid).cloned().unwrap_or_default();
        max.iter()
            .map(|(r, m)| {
                let held = alloc.get(r).copied().unwrap_or(0);
                (r.clone(), m.saturating_sub(held))
            })
            .collect()
    }

    /// Greedy safety sweep: repeatedly finish any process whose remaining
    /// need fits in the work vector, absorbing its allocation. Safe iff
    /// every declared process finishes.
    fn is_safe(&self) -> bool {
        let mut work = self.available.clone();
        let mut unfinished: Vec<&String> = self.max.keys().collect();

        loop {
            let mut progressed = false;
            unfinished.retain(|pid| {
                let need = self.need_of(pid);
                let fits = need
                    .iter()
                    .all(|(r, n)| *n <= work.get(r).copied().unwrap_or(0));
                if fits {
                    if let Some(alloc) = self.allocation.get(*pid) {
                        for (r, held) in alloc {
                            *work.entry(r.clone()).or_insert(0) += held;
                        }
                    }
                    progressed = true;
                    false
                } else {
                    true
                }
            });
            if unfinished.is_empty() {
                return true;
            }
            if !progressed {
                return false;
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ResourceBroker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Banker's-Algorithm resource broker.
///
/// All operations are synchronous under one internal mutex; denials are
/// values, never errors.
#[derive(Default)]
pub struct ResourceBroker {
    state: Mutex<BrokerState>,
}

impl ResourceBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource type with a fixed total supply.
    ///
    /// Re-registering adjusts the total; newly added supply becomes
    /// available immediately.
    pub fn add_resource(&self, name: &str, total: u64) {
        let mut state = self.state.lock();
        let previous = state.total.insert(name.to_string(), total).unwrap_or(0);
        let avail = state.available.entry(name.to_string()).or_insert(0);
        *avail = (*avail + total).saturating_sub(previous);
    }

    /// Declare a process's worst-case demand. Must precede any request.
    ///
    /// Denied when the demand exceeds the total supply of any resource,
    /// or names an unknown resource.
    pub fn declare_maximum(&self, pid: &str, demand: Amounts) -> GrantOutcome {
        let mut state = self.state.lock();
        for (resource, amount) in &demand {
            match state.total.get(resource) {
                None => {
                    return GrantOutcome::denied(format!("unknown resource '{resource}'"));
                }
                Some(total) if amount > total => {
                    return GrantOutcome::denied(format!(
                        "demand {amount} for '{resource}' exceeds total {total}"
                    ));
                }
                Some(_) => {}
            }
        }
        state.max.insert(pid.to_string(), demand);
        state.allocation.entry(pid.to_string()).or_default();
        GrantOutcome::granted()
    }

    /// Request resources for `pid`.
    ///
    /// Rejects when the request exceeds the declared remaining need or
    /// the available supply. Otherwise the request is applied
    /// tentatively; if the resulting state is unsafe it is rolled back
    /// and denied with a deadlock-prevention reason.
    pub fn request(&self, pid: &str, req: Amounts) -> GrantOutcome {
        let mut state = self.state.lock();

        if !state.max.contains_key(pid) {
            return GrantOutcome::denied(format!("process '{pid}' declared no maximum"));
        }

        let need = state.need_of(pid);
        for (resource, amount) in &req {
            if !state.total.contains_key(resource) {
                return GrantOutcome::denied(format!("unknown resource '{resource}'"));
            }
            let remaining = need.get(resource).copied().unwrap_or(0);
            if *amount > remaining {
                return GrantOutcome::denied(format!(
                    "request {amount} for '{resource}' exceeds remaining need {remaining}"
                ));
            }
            let available = state.available.get(resource).copied().unwrap_or(0);
            if *amount > available {
                return GrantOutcome::denied(format!(
                    "request {amount} for '{resource}' exceeds available {available}"
                ));
            }
        }

        // Tentatively apply, then test safety.
        for (resource, amount) in &req {
            if let Some(available) = state.available.get_mut(resource) {
                *available -= amount;
            }
            *state
                .allocation
                .entry(pid.to_string())
                .or_default()
                .entry(resource.clone())
                .or_insert(0) += amount;
        }

        if state.is_safe() {
            GrantOutcome::granted()
        } else {
            // Roll back.
            for (resource, amount) in &req {
                if let Some(available) = state.available.get_mut(resource) {
                    *available += amount;
                }
                if let Some(held) = state
                    .allocation
                    .get_mut(pid)
                    .and_then(|alloc| alloc.get_mut(resource))
                {
                    *held -= amount;
                }
            }
            GrantOutcome::denied("grant would leave the system in an unsafe state")
        }
    }

    /// Return resources to the pool. Releasing more than held clamps at
    /// zero rather than underflowing.
    pub fn release(&self, pid: &str, rel: Amounts) {
        let mut state = self.state.lock();
        for (resource, amount) in &rel {
            let held = state
                .allocation
                .get(pid)
                .and_then(|a| a.get(resource).copied())
                .unwrap_or(0);
            let returned = (*amount).min(held);
            if let Some(alloc) = state.allocation.get_mut(pid) {
                if let Some(h) = alloc.get_mut(resource) {
                    *h -= returned;
                }
            }
            if let Some(avail) = state.available.get_mut(resource) {
                *avail += returned;
            }
        }
    }

    /// Release everything `pid` holds and drop its rows.
    pub fn remove_process(&self, pid: &str) {
        let mut state = self.state.lock();
        if let Some(alloc) = state.allocation.remove(pid) {
            for (resource, held) in alloc {
                if let Some(avail) = state.available.get_mut(&resource) {
                    *avail += held;
                }
            }
        }
        state.max.remove(pid);
    }

    /// Whether the current state is safe.
    pub fn is_safe_state(&self) -> bool {
        self.state.lock().is_safe()
    }

    /// Matrix snapshot for audits.
    pub fn snapshot(&self) -> BrokerSnapshot {
        let state = self.state.lock();
        BrokerSnapshot {
            available: state.available.clone(),
            allocation: state.allocation.clone(),
            need: state
                .max
                .keys()
                .map(|pid| (pid.clone(), state.need_of(pid)))
                .collect(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn amounts(pairs: &[(&str, u64)]) -> Amounts {
        pairs.iter().map(|(r, n)| (r.to_string(), *n)).collect()
    }

    /// The classic three-resource, five-process configuration.
    fn textbook_broker() -> ResourceBroker {
        let broker = ResourceBroker::new();
        broker.add_resource("A", 10);
        broker.add_resource("B", 5);
        broker.add_resource("C", 7);

        let maxima = [
            ("p0", [("A", 7), ("B", 5), ("C", 3)]),
            ("p1", [("A", 3), ("B", 2), ("C", 2)]),
            ("p2", [("A", 9), ("B", 0), ("C", 2)]),
            ("p3", [("A", 2), ("B", 2), ("C", 2)]),
            ("p4", [("A", 4), ("B", 3), ("C", 3)]),
        ];
        for (pid, max) in maxima {
            assert!(broker.declare_maximum(pid, amounts(&max)).granted);
        }

        let initial = [
            ("p0", [("A", 0), ("B", 1), ("C", 0)]),
            ("p1", [("A", 2), ("B", 0), ("C", 0)]),
            ("p2", [("A", 3), ("B", 0), ("C", 2)]),
            ("p3", [("A", 2), ("B", 1), ("C", 1)]),
            ("p4", [("A", 0), ("B", 0), ("C", 2)]),
        ];
        for (pid, alloc) in initial {
            assert!(broker.request(pid, amounts(&alloc)).granted);
        }
        broker
    }

    #[test]
    fn textbook_state_is_safe() {
        let broker = textbook_broker();
        assert!(broker.is_safe_state());
        let snap = broker.snapshot();
        assert_eq!(snap.available, amounts(&[("A", 3), ("B", 3), ("C", 2)]));
    }

    #[test]
    fn safe_request_is_granted() {
        let broker = textbook_broker();
        let outcome = broker.request("p1", amounts(&[("A", 1), ("C", 2)]));
        assert!(outcome.granted, "{:?}", outcome.reason);
        assert!(broker.is_safe_state());
    }

    #[test]
    fn unsafe_request_is_denied_and_rolled_back() {
        let broker = textbook_broker();
        assert!(broker.request("p1", amounts(&[("A", 1), ("C", 2)])).granted);

        let before = broker.snapshot();
        let outcome = broker.request("p0", amounts(&[("B", 2)]));
        assert!(!outcome.granted);
        assert!(outcome.reason.unwrap().contains("unsafe"));

        // Matrices unchanged after the rollback.
        let after = broker.snapshot();
        assert_eq!(before.available, after.available);
        assert_eq!(before.allocation, after.allocation);
        assert!(broker.is_safe_state());
    }

    #[test]
    fn request_exceeding_need_is_rejected() {
        let broker = textbook_broker();
        // p3's declared max for A is 2 and it already holds 2.
        let outcome = broker.request("p3", amounts(&[("A", 1)]));
        assert!(!outcome.granted);
        assert!(outcome.reason.unwrap().contains("need"));
    }

    #[test]
    fn request_exceeding_available_is_rejected() {
        let broker = textbook_broker();
        // Only 3 units of A are free.
        let outcome = broker.request("p2", amounts(&[("A", 4)]));
        assert!(!outcome.granted);
        assert!(outcome.reason.unwrap().contains("available"));
    }

    #[test]
    fn request_without_declared_maximum_is_rejected() {
        let broker = ResourceBroker::new();
        broker.add_resource("A", 5);
        let outcome = broker.request("ghost", amounts(&[("A", 1)]));
        assert!(!outcome.granted);
    }

    #[test]
    fn declare_maximum_beyond_total_is_rejected() {
        let broker = ResourceBroker::new();
        broker.add_resource("A", 5);
        let outcome = broker.declare_maximum("p", amounts(&[("A", 6)]));
        assert!(!outcome.granted);
    }

    #[test]
    fn release_returns_to_available_and_clamps() {
        let broker = ResourceBroker::new();
        broker.add_resource("A", 4);
        broker.declare_maximum("p", amounts(&[("A", 3)]));
        assert!(broker.request("p", amounts(&[("A", 2)])).granted);

        // Over-release clamps at what is actually held.
        broker.release("p", amounts(&[("A", 10)]));
        let snap = broker.snapshot();
        assert_eq!(snap.available["A"], 4);
        assert_eq!(snap.allocation["p"]["A"], 0);
    }

    #[test]
    fn remove_process_frees_everything() {
        let broker = ResourceBroker::new();
        broker.add_resource("A", 4);
        broker.declare_maximum("p", amounts(&[("A", 4)]));
        assert!(broker.request("p", amounts(&[("A", 3)])).granted);

        broker.remove_process("p");
        let snap = broker.snapshot();
        assert_eq!(snap.available["A"], 4);
        assert!(!snap.allocation.contains_key("p"));
        assert!(!snap.need.contains_key("p"));
    }

    #[test]
    fn granted_requests_always_preserve_safety() {
        let broker = textbook_broker();
        for (pid, req) in [
            ("p1", amounts(&[("A", 1), ("C", 2)])),
            ("p4", amounts(&[("A", 2)])),
            ("p3", amounts(&[("B", 1)])),
        ] {
            let outcome = broker.request(pid, req);
            if outcome.granted {
                assert!(broker.is_safe_state());
            }
        }
    }
}
