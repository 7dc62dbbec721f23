//! The agent forest and its liveness machinery.
//!
//! All operations are synchronous under one internal mutex; callers that
//! want fire-and-forget semantics hand off to a task. Status-change
//! callbacks and bus events are collected while the lock is held and
//! emitted after it drops, so a subscriber can safely call back into the
//! manager.
//!
//! The periodic sweep ([`LifecycleManager::heal_tree`]) is driven
//! externally (the gateway runs it on `heartbeat_interval_ms`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use ens_bus::MessageBus;
use ens_domain::config::{LifecycleConfig, OrphanPolicy, MAX_AGENT_DEPTH, MIN_CHILD_BUDGET};
use ens_domain::error::{Error, Result};

use crate::types::{
    Agent, AgentRegistration, AgentStatus, HealOutcome, HeartbeatUpdate, KillOutcome, SpawnCheck,
    SweepReport, TreeHealth,
};

/// Called with `(agent_id, from, to)` after a status transition commits.
pub type StatusCallback = Box<dyn Fn(&str, AgentStatus, AgentStatus) + Send + Sync>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Internal state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct TreeState {
    agents: HashMap<String, Agent>,
    /// Child ids per parent, in registration order.
    children: HashMap<String, Vec<String>>,
}

/// Deferred side effect, emitted after the tree mutex drops.
enum Event {
    Status {
        id: String,
        from: AgentStatus,
        to: AgentStatus,
    },
    Bus {
        topic: &'static str,
        payload: serde_json::Value,
    },
}

impl TreeState {
    /// Transition an agent's status, recording the change. Returns false
    /// when the agent is unknown or already in the target status.
    fn set_status(&mut self, id: &str, to: AgentStatus, events: &mut Vec<Event>) -> bool {
        let Some(agent) = self.agents.get_mut(id) else {
            return false;
        };
        let from = agent.status;
        if from == to {
            return false;
        }
        agent.status = to;
        events.push(Event::Status {
            id: id.to_string(),
            from,
            to,
        });
        events.push(Event::Bus {
            topic: "agent:status",
            payload: serde_json::json!({
                "id": id,
                "from": from,
                "to": to,
            }),
        });
        true
    }

    /// Whether `ancestor` appears strictly above `descendant` in the
    /// parent chain. The walk is bounded at `MAX_AGENT_DEPTH + 1` links
    /// as a safety net; edges are immutable so cycles cannot form.
    fn is_proper_ancestor(&self, ancestor: &str, descendant: &str) -> bool {
        let mut current = self
            .agents
            .get(descendant)
            .and_then(|a| a.parent_id.clone());
        for _ in 0..=MAX_AGENT_DEPTH {
            match current {
                Some(id) if id == ancestor => return true,
                Some(id) => current = self.agents.get(&id).and_then(|a| a.parent_id.clone()),
                None => return false,
            }
        }
        false
    }

    /// Ids of the subtree rooted at `root`, children before parents.
    fn subtree_postorder(&self, root: &str) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_postorder(root, &mut out);
        out
    }

    fn collect_postorder(&self, id: &str, out: &mut Vec<String>) {
        if let Some(child_ids) = self.children.get(id) {
            for child in child_ids.clone() {
                self.collect_postorder(&child, out);
            }
        }
        if self.agents.contains_key(id) {
            out.push(id.to_string());
        }
    }

    /// Children currently in a non-terminal state.
    fn living_children(&self, id: &str) -> usize {
        self.children
            .get(id)
            .map(|kids| {
                kids.iter()
                    .filter(|c| {
                        self.agents
                            .get(*c)
                            .map(|a| !a.status.is_terminal())
                            .unwrap_or(false)
                    })
                    .count()
            })
            .unwrap_or(0)
    }

    /// Remove an agent and detach it from its parent's child list.
    fn remove(&mut self, id: &str) -> Option<Agent> {
        let agent = self.agents.remove(id)?;
        self.children.remove(id);
        if let Some(parent_id) = &agent.parent_id {
            if let Some(kids) = self.children.get_mut(parent_id) {
                kids.retain(|c| c != id);
            }
        }
        Some(agent)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LifecycleManager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct LifecycleManager {
    state: Mutex<TreeState>,
    config: RwLock<LifecycleConfig>,
    callbacks: RwLock<Vec<StatusCallback>>,
    bus: Option<Arc<MessageBus>>,
    disposed: AtomicBool,
}

impl LifecycleManager {
    pub fn new(config: LifecycleConfig) -> Self {
        Self::with_bus(config, None)
    }

    /// A manager that mirrors status transitions onto the message bus
    /// (`agent:status`, `agent:killed`, `agent:healed`, `agent:reaped`).
    pub fn with_bus(config: LifecycleConfig, bus: Option<Arc<MessageBus>>) -> Self {
        Self {
            state: Mutex::new(TreeState::default()),
            config: RwLock::new(config),
            callbacks: RwLock::new(Vec::new()),
            bus,
            disposed: AtomicBool::new(false),
        }
    }

    /// Register a status-change observer.
    pub fn on_status_change(&self, callback: StatusCallback) {
        self.callbacks.write().push(callback);
    }

    /// Replace the runtime config. `max_agent_depth` is clamped to the
    /// system ceiling.
    pub fn set_config(&self, mut config: LifecycleConfig) {
        config.max_agent_depth = config.max_agent_depth.min(MAX_AGENT_DEPTH);
        *self.config.write() = config;
    }

    pub fn config(&self) -> LifecycleConfig {
        self.config.read().clone()
    }

    /// Refuse all further operations.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }

    fn check_disposed(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            Err(Error::Disposed("lifecycle manager"))
        } else {
            Ok(())
        }
    }

    fn now_ms() -> u64 {
        chrono::Utc::now().timestamp_millis() as u64
    }

    /// Fire callbacks and bus events collected during an operation.
    /// Runs with no lock held; a panicking callback is contained.
    fn emit(&self, events: Vec<Event>) {
        if events.is_empty() {
            return;
        }
        let callbacks = self.callbacks.read();
        for event in events {
            match event {
                Event::Status { id, from, to } => {
                    for callback in callbacks.iter() {
                        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(
                            || callback(&id, from, to),
                        ));
                        if result.is_err() {
                            tracing::error!(agent_id = %id, "status-change callback panicked");
                        }
                    }
                }
                Event::Bus { topic, payload } => {
                    if let Some(bus) = &self.bus {
                        if let Err(e) = bus.publish(topic, payload, Some("lifecycle")) {
                            tracing::warn!(topic, error = %e, "lifecycle bus publish failed");
                        }
                    }
                }
            }
        }
    }

    // ── Registration & heartbeats ──────────────────────────────────

    /// Insert a new agent into the forest.
    ///
    /// Fails when the id is taken, the parent is unknown or terminal, or
    /// the child would exceed the depth ceiling.
    pub fn register_agent(&self, registration: AgentRegistration) -> Result<Agent> {
        self.check_disposed()?;
        let now = Self::now_ms();
        // Config is read before the tree lock; every operation takes the
        // two in this order.
        let max_depth = self.config.read().effective_max_depth();
        let mut events = Vec::new();

        let snapshot = {
            let mut state = self.state.lock();
            if state.agents.contains_key(&registration.id) {
                return Err(Error::Lifecycle(format!(
                    "agent '{}' is already registered",
                    registration.id
                )));
            }

            let depth = match &registration.parent_id {
                None => 0,
                Some(parent_id) => {
                    let parent = state.agents.get(parent_id).ok_or_else(|| {
                        Error::Lifecycle(format!("unknown parent '{parent_id}'"))
                    })?;
                    if parent.status.is_terminal() {
                        return Err(Error::Lifecycle(format!(
                            "parent '{}' is {:?} and cannot adopt children",
                            parent_id, parent.status
                        )));
                    }
                    parent.depth + 1
                }
            };
            if depth > max_depth {
                return Err(Error::Lifecycle(format!(
                    "depth {depth} exceeds the limit of {max_depth}"
                )));
            }

            let agent = Agent {
                id: registration.id.clone(),
                parent_id: registration.parent_id.clone(),
                depth,
                status: AgentStatus::Alive,
                last_beat_ms: now,
                started_at_ms: now,
                turn_count: 0,
                token_usage: 0,
                token_budget: registration.token_budget,
                purpose: registration.purpose,
                stuck_reason: None,
            };
            if let Some(parent_id) = &registration.parent_id {
                state
                    .children
                    .entry(parent_id.clone())
                    .or_default()
                    .push(registration.id.clone());
            }
            let snapshot = agent.clone();
            state.agents.insert(registration.id.clone(), agent);

            events.push(Event::Bus {
                topic: "agent:registered",
                payload: serde_json::json!({
                    "id": snapshot.id,
                    "parent_id": snapshot.parent_id,
                    "depth": snapshot.depth,
                    "token_budget": snapshot.token_budget,
                }),
            });
            snapshot
        };

        self.emit(events);
        Ok(snapshot)
    }

    /// Record a heartbeat. Unknown ids are a no-op; a stale agent
    /// recovers to alive. Terminal agents are left untouched.
    pub fn record_heartbeat(&self, id: &str, update: HeartbeatUpdate) -> Result<()> {
        self.check_disposed()?;
        let now = Self::now_ms();
        let mut events = Vec::new();

        {
            let mut state = self.state.lock();
            let Some(agent) = state.agents.get_mut(id) else {
                return Ok(());
            };
            if agent.status.is_terminal() {
                return Ok(());
            }

            agent.last_beat_ms = now;
            if let Some(turns) = update.turn_count {
                agent.turn_count = turns;
            }
            if let Some(tokens) = update.token_usage {
                agent.token_usage = tokens;
            }
            if agent.status == AgentStatus::Stale {
                agent.stuck_reason = None;
                state.set_status(id, AgentStatus::Alive, &mut events);
            }
        }

        self.emit(events);
        Ok(())
    }

    /// Explicit terminal transition. Idempotent; absorbing states are
    /// never left.
    pub fn mark_completed(&self, id: &str) -> Result<()> {
        self.terminal_transition(id, AgentStatus::Completed)
    }

    /// Explicit error transition. Idempotent; only alive or stale agents
    /// move to error.
    pub fn mark_error(&self, id: &str) -> Result<()> {
        self.terminal_transition(id, AgentStatus::Error)
    }

    fn terminal_transition(&self, id: &str, to: AgentStatus) -> Result<()> {
        self.check_disposed()?;
        let mut events = Vec::new();
        {
            let mut state = self.state.lock();
            let Some(agent) = state.agents.get(id) else {
                return Err(Error::Lifecycle(format!("unknown agent '{id}'")));
            };
            if agent.status == to {
                return Ok(());
            }
            if agent.status.is_terminal() {
                // Absorbing; silently keep the existing terminal status.
                return Ok(());
            }
            state.set_status(id, to, &mut events);
        }
        self.emit(events);
        Ok(())
    }

    /// Move an alive agent to stale with a recorded reason. No-op from
    /// any other state.
    pub fn report_stuck(&self, id: &str, reason: Option<&str>) -> Result<()> {
        self.check_disposed()?;
        let mut events = Vec::new();
        {
            let mut state = self.state.lock();
            let Some(agent) = state.agents.get_mut(id) else {
                return Ok(());
            };
            if agent.status != AgentStatus::Alive {
                return Ok(());
            }
            agent.stuck_reason = reason.map(String::from);
            state.set_status(id, AgentStatus::Stale, &mut events);
        }
        self.emit(events);
        Ok(())
    }

    // ── Heal & kill ────────────────────────────────────────────────

    /// Heal a stale or errored descendant back to alive.
    ///
    /// Allowed only when `healer_id` is a proper ancestor of `target_id`.
    pub fn heal_agent(
        &self,
        healer_id: &str,
        target_id: &str,
        reason: Option<&str>,
    ) -> Result<HealOutcome> {
        self.check_disposed()?;
        let now = Self::now_ms();
        let mut events = Vec::new();

        let outcome = {
            let mut state = self.state.lock();
            if !state.agents.contains_key(healer_id) {
                return Ok(HealOutcome::denied(format!("unknown healer '{healer_id}'")));
            }
            let Some(target) = state.agents.get(target_id) else {
                return Ok(HealOutcome::denied(format!("unknown target '{target_id}'")));
            };
            if !matches!(target.status, AgentStatus::Stale | AgentStatus::Error) {
                return Ok(HealOutcome::denied(format!(
                    "target is {:?}, only stale or errored agents can be healed",
                    target.status
                )));
            }
            if !state.is_proper_ancestor(healer_id, target_id) {
                return Ok(HealOutcome::denied(format!(
                    "'{healer_id}' is not an ancestor of '{target_id}'"
                )));
            }

            if let Some(agent) = state.agents.get_mut(target_id) {
                agent.last_beat_ms = now;
                agent.stuck_reason = None;
            }
            state.set_status(target_id, AgentStatus::Alive, &mut events);
            events.push(Event::Bus {
                topic: "agent:healed",
                payload: serde_json::json!({
                    "id": target_id,
                    "healer": healer_id,
                    "reason": reason,
                }),
            });
            HealOutcome::healed()
        };

        self.emit(events);
        Ok(outcome)
    }

    /// Kill a descendant and its whole subtree, bottom-up.
    ///
    /// Allowed only when `killer_id` is a proper ancestor and the target
    /// is not already killed. Agents already in an absorbing state are
    /// skipped; the freed-token total covers only the agents actually
    /// transitioned.
    pub fn kill_agent(&self, killer_id: &str, target_id: &str) -> Result<KillOutcome> {
        self.check_disposed()?;
        let mut events = Vec::new();

        let outcome = {
            let mut state = self.state.lock();
            if !state.agents.contains_key(killer_id) {
                return Ok(KillOutcome::denied(format!("unknown killer '{killer_id}'")));
            }
            let Some(target) = state.agents.get(target_id) else {
                return Ok(KillOutcome::denied(format!("unknown target '{target_id}'")));
            };
            if target.status == AgentStatus::Killed {
                return Ok(KillOutcome::denied("target is already killed"));
            }
            if !state.is_proper_ancestor(killer_id, target_id) {
                return Ok(KillOutcome::denied(format!(
                    "'{killer_id}' is not an ancestor of '{target_id}'"
                )));
            }

            let (killed_ids, freed_tokens) =
                kill_subtree(&mut state, target_id, &mut events);
            events.push(Event::Bus {
                topic: "agent:killed",
                payload: serde_json::json!({
                    "target": target_id,
                    "killer": killer_id,
                    "killed_ids": killed_ids,
                    "freed_tokens": freed_tokens,
                }),
            });
            KillOutcome {
                success: true,
                killed_ids,
                freed_tokens,
                reason: None,
            }
        };

        self.emit(events);
        Ok(outcome)
    }

    /// Operator-initiated kill: same cascade semantics as
    /// [`Self::kill_agent`] but with no in-tree killer — the control
    /// plane sits outside the forest, so the ancestor check does not
    /// apply.
    pub fn system_kill(&self, target_id: &str) -> Result<KillOutcome> {
        self.check_disposed()?;
        let mut events = Vec::new();

        let outcome = {
            let mut state = self.state.lock();
            let Some(target) = state.agents.get(target_id) else {
                return Ok(KillOutcome::denied(format!("unknown target '{target_id}'")));
            };
            if target.status == AgentStatus::Killed {
                return Ok(KillOutcome::denied("target is already killed"));
            }
            let (killed_ids, freed_tokens) = kill_subtree(&mut state, target_id, &mut events);
            events.push(Event::Bus {
                topic: "agent:killed",
                payload: serde_json::json!({
                    "target": target_id,
                    "killer": "system",
                    "killed_ids": killed_ids,
                    "freed_tokens": freed_tokens,
                }),
            });
            KillOutcome {
                success: true,
                killed_ids,
                freed_tokens,
                reason: None,
            }
        };

        self.emit(events);
        Ok(outcome)
    }

    // ── Spawn admission ────────────────────────────────────────────

    /// Whether `parent_id` may spawn another child right now.
    pub fn can_spawn(&self, parent_id: &str) -> Result<SpawnCheck> {
        self.check_disposed()?;
        let config = self.config.read().clone();
        let state = self.state.lock();

        let Some(parent) = state.agents.get(parent_id) else {
            return Ok(SpawnCheck::denied(format!("unknown parent '{parent_id}'")));
        };
        if parent.status != AgentStatus::Alive {
            return Ok(SpawnCheck::denied(format!(
                "parent is {:?}, only alive agents can spawn",
                parent.status
            )));
        }
        if parent.depth + 1 > config.effective_max_depth() {
            return Ok(SpawnCheck::denied(format!(
                "children would exceed the depth limit of {}",
                config.effective_max_depth()
            )));
        }
        let living = state.living_children(parent_id);
        if living >= config.max_sub_agents {
            return Ok(SpawnCheck::denied(format!(
                "parent already has {living} living children (limit {})",
                config.max_sub_agents
            )));
        }
        let remaining = parent.token_budget.saturating_sub(parent.token_usage);
        if remaining < MIN_CHILD_BUDGET {
            return Ok(SpawnCheck::denied(format!(
                "remaining budget {remaining} is below the child minimum {MIN_CHILD_BUDGET}"
            )));
        }
        Ok(SpawnCheck::allowed())
    }

    /// The budget a new child of `parent_id` would receive:
    /// `floor(parent.token_budget × decay_factor)`, or 0 for an unknown
    /// parent.
    pub fn compute_child_budget(&self, parent_id: &str) -> Result<u64> {
        self.check_disposed()?;
        let decay = self.config.read().decay_factor;
        let state = self.state.lock();
        Ok(state
            .agents
            .get(parent_id)
            .map(|p| (p.token_budget as f64 * decay).floor() as u64)
            .unwrap_or(0))
    }

    // ── Sweep ──────────────────────────────────────────────────────

    /// Run the periodic sweep against the current wall clock.
    pub fn heal_tree(&self) -> Result<SweepReport> {
        self.heal_tree_at(Self::now_ms())
    }

    /// Sweep with an explicit clock (the gateway passes `now`; tests use
    /// this to step time).
    ///
    /// For each agent: past `dead_threshold_ms` of silence it is marked
    /// dead and reaped; past `stale_threshold_ms` an alive agent turns
    /// stale. Agents over their token budget are killed with their
    /// subtree. Orphans are handled per the configured policy.
    pub fn heal_tree_at(&self, now_ms: u64) -> Result<SweepReport> {
        self.check_disposed()?;
        let config = self.config.read().clone();
        let mut events = Vec::new();
        let mut report = SweepReport::default();

        {
            let mut state = self.state.lock();
            let ids: Vec<String> = state.agents.keys().cloned().collect();

            // Liveness transitions.
            let mut dead: Vec<String> = Vec::new();
            for id in &ids {
                let Some(agent) = state.agents.get(id) else {
                    continue;
                };
                if agent.status.is_terminal() {
                    continue;
                }
                let silence = now_ms.saturating_sub(agent.last_beat_ms);
                if silence > config.dead_threshold_ms {
                    state.set_status(id, AgentStatus::Dead, &mut events);
                    dead.push(id.clone());
                } else if silence > config.stale_threshold_ms
                    && state.agents.get(id).map(|a| a.status) == Some(AgentStatus::Alive)
                {
                    state.set_status(id, AgentStatus::Stale, &mut events);
                    report.marked_stale.push(id.clone());
                }
            }

            // Budget enforcement: kill over-budget agents with their
            // subtrees.
            for id in &ids {
                let over = state
                    .agents
                    .get(id)
                    .map(|a| !a.status.is_terminal() && a.token_usage > a.token_budget)
                    .unwrap_or(false);
                if over {
                    let (killed, _) = kill_subtree(&mut state, id, &mut events);
                    report.budget_killed.extend(killed);
                }
            }

            // Reap the dead along with their subtrees' orphans.
            for id in &dead {
                if state.agents.contains_key(id) {
                    reap_with_orphans(&mut state, id, config.orphan_policy, &mut events, &mut report);
                    report.reaped.push(id.clone());
                }
            }

            // Stray orphans (parent vanished outside this sweep).
            let stray: Vec<String> = state
                .agents
                .values()
                .filter(|a| {
                    a.parent_id
                        .as_ref()
                        .map(|p| !state.agents.contains_key(p))
                        .unwrap_or(false)
                })
                .map(|a| a.id.clone())
                .collect();
            for id in stray {
                handle_orphan(&mut state, &id, config.orphan_policy, &mut events, &mut report);
            }
        }

        for id in &report.reaped {
            events.push(Event::Bus {
                topic: "agent:reaped",
                payload: serde_json::json!({"id": id}),
            });
        }

        self.emit(events);
        if !report.is_quiet() {
            tracing::info!(
                stale = report.marked_stale.len(),
                reaped = report.reaped.len(),
                budget_killed = report.budget_killed.len(),
                orphans = report.orphans_handled.len(),
                "lifecycle sweep"
            );
        }
        Ok(report)
    }

    // ── Introspection ──────────────────────────────────────────────

    pub fn get(&self, id: &str) -> Option<Agent> {
        self.state.lock().agents.get(id).cloned()
    }

    pub fn list(&self) -> Vec<Agent> {
        let state = self.state.lock();
        let mut agents: Vec<Agent> = state.agents.values().cloned().collect();
        agents.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.id.cmp(&b.id)));
        agents
    }

    /// Child ids of `id`, in registration order.
    pub fn children_of(&self, id: &str) -> Vec<String> {
        self.state
            .lock()
            .children
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn tree_health(&self) -> Result<TreeHealth> {
        self.check_disposed()?;
        let agents = self.list();
        Ok(TreeHealth {
            total_agents: agents.len(),
            alive_agents: agents
                .iter()
                .filter(|a| a.status == AgentStatus::Alive)
                .count(),
            max_depth: agents.iter().map(|a| a.depth).max().unwrap_or(0),
            highest_token_usage: agents.iter().map(|a| a.token_usage).max().unwrap_or(0),
            agents,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Subtree helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Mark every non-absorbing agent in the subtree killed, children first.
/// Returns the transitioned ids and the freed-token total.
fn kill_subtree(
    state: &mut TreeState,
    root: &str,
    events: &mut Vec<Event>,
) -> (Vec<String>, u64) {
    let mut killed_ids = Vec::new();
    let mut freed_tokens: u64 = 0;

    for id in state.subtree_postorder(root) {
        let Some(agent) = state.agents.get(&id) else {
            continue;
        };
        if agent.status.is_absorbing() {
            continue;
        }
        freed_tokens += agent.token_budget.saturating_sub(agent.token_usage);
        state.set_status(&id, AgentStatus::Killed, events);
        killed_ids.push(id);
    }
    (killed_ids, freed_tokens)
}

/// Remove a dead agent; its direct children become orphans handled per
/// policy.
fn reap_with_orphans(
    state: &mut TreeState,
    id: &str,
    policy: OrphanPolicy,
    events: &mut Vec<Event>,
    report: &mut SweepReport,
) {
    let orphaned: Vec<String> = state.children.get(id).cloned().unwrap_or_default();
    state.remove(id);
    for orphan in orphaned {
        handle_orphan(state, &orphan, policy, events, report);
    }
}

fn handle_orphan(
    state: &mut TreeState,
    id: &str,
    policy: OrphanPolicy,
    events: &mut Vec<Event>,
    report: &mut SweepReport,
) {
    if !state.agents.contains_key(id) {
        return;
    }
    match policy {
        OrphanPolicy::Cascade => {
            // Remove the whole orphaned subtree.
            for sub_id in state.subtree_postorder(id) {
                state.remove(&sub_id);
                report.orphans_handled.push(sub_id);
            }
        }
        OrphanPolicy::PromoteToRoot => {
            // Re-root the orphan; descendant depths shift accordingly.
            let shift = state.agents.get(id).map(|a| a.depth).unwrap_or(0);
            if let Some(agent) = state.agents.get_mut(id) {
                agent.parent_id = None;
                agent.depth = 0;
            }
            for sub_id in state.subtree_postorder(id) {
                if sub_id != id {
                    if let Some(agent) = state.agents.get_mut(&sub_id) {
                        agent.depth = agent.depth.saturating_sub(shift);
                    }
                }
            }
            report.orphans_handled.push(id.to_string());
        }
        OrphanPolicy::Kill => {
            let (killed, _) = kill_subtree(state, id, events);
            // Detach from the vanished parent so the next sweep does not
            // see them as orphans again.
            if let Some(agent) = state.agents.get_mut(id) {
                agent.parent_id = None;
            }
            report.orphans_handled.extend(killed);
        }
    }
}
