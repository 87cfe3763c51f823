//! Joins scanned process instances with the active log sessions of the same
//! project.

use std::collections::HashMap;

use monitor_core::models::{AgentNode, ProcessInstance, SessionNode};
use monitor_core::project::normalize_project_key;
use serde::Serialize;

use crate::process_scanner::sort_instances;

/// One instance with what the event log knows about its project.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceView {
    pub instance: ProcessInstance,
    /// Model of the matching active session, if one was found.
    pub session_model: Option<String>,
    pub running_agents: Vec<AgentNode>,
}

/// Active sessions keyed by [`normalize_project_key`]. A later session
/// replaces an earlier one with the same key.
pub fn active_sessions_by_key(sessions: &[SessionNode]) -> HashMap<String, &SessionNode> {
    sessions
        .iter()
        .filter(|s| s.is_active)
        .map(|s| (normalize_project_key(&s.project), s))
        .collect()
}

/// One instance per project (case-insensitive), keeping the highest CPU.
/// The result is in display order.
pub fn dedupe_by_project(instances: &[ProcessInstance]) -> Vec<ProcessInstance> {
    let mut by_project: HashMap<String, &ProcessInstance> = HashMap::new();
    for inst in instances {
        let key = inst.project_name.to_lowercase();
        match by_project.get(&key) {
            Some(prev) if prev.cpu_percent >= inst.cpu_percent => {}
            _ => {
                by_project.insert(key, inst);
            }
        }
    }
    let mut out: Vec<ProcessInstance> = by_project.into_values().cloned().collect();
    sort_instances(&mut out);
    out
}

/// Attach session data to every instance, one view per pid, keeping the
/// input order.
pub fn attach_sessions(instances: &[ProcessInstance], sessions: &[SessionNode]) -> Vec<InstanceView> {
    let active = active_sessions_by_key(sessions);
    instances
        .iter()
        .cloned()
        .map(|instance| {
            let session = active.get(&normalize_project_key(&instance.project_name));
            InstanceView {
                session_model: session.and_then(|s| s.model.clone()),
                running_agents: session
                    .map(|s| s.running_agents().cloned().collect())
                    .unwrap_or_default(),
                instance,
            }
        })
        .collect()
}

/// Deduplicate `instances` per project and attach session data to each.
pub fn correlate(instances: &[ProcessInstance], sessions: &[SessionNode]) -> Vec<InstanceView> {
    attach_sessions(&dedupe_by_project(instances), sessions)
}
