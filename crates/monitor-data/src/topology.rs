//! Session / agent reconstruction from the flat event stream.
//!
//! The log carries no explicit hierarchy: sessions are bounded by start and
//! end markers per project, and agents by spawn and finish markers keyed by
//! a short id. Each [`TopologyBuilder::build`] call replays the records it
//! is given into a fresh [`BuildState`] and returns the resulting sessions.
//!
//! Agents are attached flat to the open session of their project. The log
//! has no parent signal, so several agents running in parallel would be
//! mis-nested by any stack-based inference.

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{Local, NaiveDateTime};
use monitor_core::models::{AgentNode, EventRecord, SessionNode};
use monitor_core::time_utils::{resolve_log_timestamp, time_diff_minutes};
use regex::{Captures, Regex};
use tracing::debug;

/// Agents running longer than this without a finish event are expired.
pub const STALE_AGENT_SECS: i64 = 600;

/// Type label used when a spawn line names no type.
pub const DEFAULT_AGENT_TYPE: &str = "Agent";

// ── Transition table ──────────────────────────────────────────────────────────

/// What a matched record does to the topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    SessionStart { model: Option<String> },
    SessionEnd,
    AgentSpawn { agent_type: String, agent_id: String },
    AgentFinish { agent_id: String },
    /// Close the latest running agent of this type in the owning session.
    AgentCompletedBy { agent_type: String },
    /// A spawn or finish line whose agent id could not be read. Changes
    /// nothing, not even session activity.
    Unidentified,
}

/// One row of the transition table: an optional marker that must be
/// present, a pattern over the event body, and how to read its captures.
///
/// With `claims` set, a record carrying the marker and that phrase belongs
/// to the rule even when the pattern yields nothing.
struct TransitionRule {
    marker: Option<&'static str>,
    claims: Option<&'static str>,
    pattern: &'static str,
    extract: fn(&Captures<'_>) -> Option<Transition>,
}

fn group(caps: &Captures<'_>, i: usize) -> Option<String> {
    caps.get(i).map(|m| m.as_str().to_string())
}

const TRANSITION_RULES: &[TransitionRule] = &[
    TransitionRule {
        marker: Some("🟢"),
        claims: None,
        pattern: r"Session started(?:.*?\[([^\]]+)\])?",
        extract: |c| Some(Transition::SessionStart { model: group(c, 1) }),
    },
    TransitionRule {
        marker: Some("🔴"),
        claims: None,
        pattern: r"Session ended",
        extract: |_| Some(Transition::SessionEnd),
    },
    TransitionRule {
        marker: Some("🚀"),
        claims: Some("Spawned agent"),
        pattern: r"Spawned agent:?\s*(?:(\S+)\s+)?\(?(\w+)\)?",
        extract: |c| {
            Some(Transition::AgentSpawn {
                agent_type: group(c, 1).unwrap_or_else(|| DEFAULT_AGENT_TYPE.to_string()),
                agent_id: group(c, 2)?,
            })
        },
    },
    TransitionRule {
        marker: Some("🛬"),
        claims: Some("Agent finished"),
        pattern: r"Agent finished:?\s*(?:\S+\s+)?\(?(\w+)\)?",
        extract: |c| {
            Some(Transition::AgentFinish {
                agent_id: group(c, 1)?,
            })
        },
    },
    TransitionRule {
        marker: None,
        claims: None,
        pattern: r"Task completed by:?\s+(\w[\w-]*)",
        extract: |c| {
            Some(Transition::AgentCompletedBy {
                agent_type: group(c, 1)?,
            })
        },
    },
];

fn compiled_rules() -> &'static [(&'static TransitionRule, Regex)] {
    static RULES: OnceLock<Vec<(&'static TransitionRule, Regex)>> = OnceLock::new();
    RULES.get_or_init(|| {
        TRANSITION_RULES
            .iter()
            .map(|r| (r, Regex::new(r.pattern).expect("regex is valid")))
            .collect()
    })
}

/// Classify an event body against the transition table.
///
/// Returns `None` for records that only count as session activity.
/// Spawn and finish lines whose id cannot be extracted classify as
/// [`Transition::Unidentified`].
pub fn classify(event: &str) -> Option<Transition> {
    compiled_rules().iter().find_map(|(rule, re)| {
        if let Some(marker) = rule.marker {
            if !event.contains(marker) {
                return None;
            }
        }
        let transition = re.captures(event).and_then(|c| (rule.extract)(&c));
        match rule.claims {
            Some(phrase) if transition.is_none() && event.contains(phrase) => {
                Some(Transition::Unidentified)
            }
            _ => transition,
        }
    })
}

// ── Build state ───────────────────────────────────────────────────────────────

/// Session under construction; agents are indices into the agent arena.
#[derive(Debug)]
struct PendingSession {
    node: SessionNode,
    agents: Vec<usize>,
}

/// Mutable state for one build invocation.
#[derive(Debug, Default)]
pub struct BuildState {
    agents: Vec<AgentNode>,
    by_id: HashMap<String, usize>,
    /// Open sessions in opening order, at most one per project.
    open: Vec<PendingSession>,
    closed: Vec<PendingSession>,
}

impl BuildState {
    fn open_index(&self, project: &str) -> Option<usize> {
        self.open.iter().position(|s| s.node.project == project)
    }

    fn touch(&mut self, project: &str, timestamp: &str) {
        if let Some(i) = self.open_index(project) {
            self.open[i].node.last_event_time = timestamp.to_string();
        }
    }

    fn close(&mut self, project: &str) -> bool {
        match self.open_index(project) {
            Some(i) => {
                let session = self.open.remove(i);
                self.closed.push(session);
                true
            }
            None => false,
        }
    }

    fn finish_agent(&mut self, idx: usize, timestamp: &str) {
        let agent = &mut self.agents[idx];
        agent.is_running = false;
        agent.end_time = Some(timestamp.to_string());
        agent.duration_minutes = time_diff_minutes(&agent.start_time, timestamp);
    }

    fn apply(&mut self, record: &EventRecord) {
        let project = record.project.as_str();
        let ts = record.timestamp.as_str();

        match classify(&record.event) {
            Some(Transition::SessionStart { model }) => {
                if self.close(project) {
                    debug!(project, "session restarted without end marker");
                }
                self.open.push(PendingSession {
                    node: SessionNode::new(project, ts, model),
                    agents: Vec::new(),
                });
            }
            Some(Transition::SessionEnd) => {
                self.close(project);
            }
            Some(Transition::AgentSpawn {
                agent_type,
                agent_id,
            }) => {
                let idx = self.agents.len();
                self.agents.push(AgentNode::new(agent_type, agent_id.clone(), ts));
                self.by_id.insert(agent_id, idx);
                if let Some(i) = self.open_index(project) {
                    self.open[i].agents.push(idx);
                    self.open[i].node.last_event_time = ts.to_string();
                }
            }
            Some(Transition::AgentFinish { agent_id }) => {
                if let Some(&idx) = self.by_id.get(&agent_id) {
                    self.finish_agent(idx, ts);
                }
                self.touch(project, ts);
            }
            Some(Transition::AgentCompletedBy { agent_type }) => {
                let target = self.open_index(project).and_then(|i| {
                    self.open[i].agents.iter().rev().copied().find(|&a| {
                        let agent = &self.agents[a];
                        agent.is_running && agent.agent_type.eq_ignore_ascii_case(&agent_type)
                    })
                });
                if let Some(idx) = target {
                    self.finish_agent(idx, ts);
                }
                self.touch(project, ts);
            }
            Some(Transition::Unidentified) => {
                debug!(project, event = %record.event, "agent line without id ignored");
            }
            None => self.touch(project, ts),
        }
    }

    /// Closed sessions in closing order, then still-open sessions marked
    /// active in opening order.
    fn finish(mut self) -> Vec<SessionNode> {
        for s in &mut self.open {
            s.node.is_active = true;
        }
        let agents = self.agents;
        self.closed
            .into_iter()
            .chain(self.open)
            .map(|mut pending| {
                pending.node.agents = pending.agents.iter().map(|&i| agents[i].clone()).collect();
                pending.node
            })
            .collect()
    }
}

// ── TopologyBuilder ───────────────────────────────────────────────────────────

/// Stateless entry point for topology reconstruction.
pub struct TopologyBuilder;

impl TopologyBuilder {
    /// Build against the current local wall-clock time.
    pub fn build(records: &[EventRecord]) -> Vec<SessionNode> {
        Self::build_at(records, Local::now().naive_local())
    }

    /// Build, expiring agents relative to `now`.
    pub fn build_at(records: &[EventRecord], now: NaiveDateTime) -> Vec<SessionNode> {
        let mut state = BuildState::default();
        for record in records {
            state.apply(record);
        }
        let mut sessions = state.finish();
        expire_stale_agents(&mut sessions, now);
        sessions
    }
}

/// Stop reporting agents as running once they are older than
/// [`STALE_AGENT_SECS`]; the log has no heartbeat to tell lost finish
/// events from long runs.
pub fn expire_stale_agents(sessions: &mut [SessionNode], now: NaiveDateTime) {
    for agent in sessions
        .iter_mut()
        .flat_map(|s| s.agents.iter_mut())
        .filter(|a| a.is_running)
    {
        if let Some(started) = resolve_log_timestamp(&agent.start_time, now) {
            if (now - started).num_seconds() > STALE_AGENT_SECS {
                agent.is_running = false;
            }
        }
    }
}

/// Number of sessions still open at the end of the stream.
pub fn count_active_sessions(sessions: &[SessionNode]) -> usize {
    sessions.iter().filter(|s| s.is_active).count()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_log_line;
    use chrono::NaiveDate;

    fn records(lines: &[&str]) -> Vec<EventRecord> {
        lines.iter().map(|l| parse_log_line(l)).collect()
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 10)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    // ── classify ──────────────────────────────────────────────────────────

    #[test]
    fn test_classify_session_start_with_and_without_model() {
        assert_eq!(
            classify("🟢 Session started [claude-opus-4-6]"),
            Some(Transition::SessionStart {
                model: Some("claude-opus-4-6".to_string())
            })
        );
        assert_eq!(
            classify("🟢 Session started"),
            Some(Transition::SessionStart { model: None })
        );
    }

    #[test]
    fn test_classify_requires_marker() {
        assert_eq!(classify("Session started [x]"), None);
        assert_eq!(classify("Spawned agent Explore (a1)"), None);
    }

    #[test]
    fn test_classify_spawn_variants() {
        assert_eq!(
            classify("🚀 Spawned agent Explore (a1)"),
            Some(Transition::AgentSpawn {
                agent_type: "Explore".to_string(),
                agent_id: "a1".to_string()
            })
        );
        assert_eq!(
            classify("🚀 Spawned agent: (b2)"),
            Some(Transition::AgentSpawn {
                agent_type: DEFAULT_AGENT_TYPE.to_string(),
                agent_id: "b2".to_string()
            })
        );
    }

    #[test]
    fn test_classify_finish_and_completed_by() {
        assert_eq!(
            classify("🛬 Agent finished Explore (a1)"),
            Some(Transition::AgentFinish {
                agent_id: "a1".to_string()
            })
        );
        assert_eq!(
            classify("✅ Task completed by Plan"),
            Some(Transition::AgentCompletedBy {
                agent_type: "Plan".to_string()
            })
        );
        assert_eq!(classify("🔧 Bash"), None);
    }

    #[test]
    fn test_classify_agent_line_without_id() {
        assert_eq!(classify("🚀 Spawned agent"), Some(Transition::Unidentified));
        assert_eq!(classify("🛬 Agent finished: ()"), Some(Transition::Unidentified));
    }

    // ── build ─────────────────────────────────────────────────────────────

    #[test]
    fn test_end_to_end_single_session() {
        let rs = records(&[
            "09:00 AM │ demo │ main │ 🟢 Session started [claude-opus-4-6]",
            "09:05 AM │ demo │ main │ 🚀 Spawned agent Explore (a1)",
            "09:10 AM │ demo │ main │ 🛬 Agent finished Explore (a1)",
            "09:15 AM │ demo │ main │ 🔴 Session ended",
        ]);
        let sessions = TopologyBuilder::build_at(&rs, at(9, 20, 0));

        assert_eq!(sessions.len(), 1);
        let s = &sessions[0];
        assert_eq!(s.project, "demo");
        assert_eq!(s.model.as_deref(), Some("claude-opus-4-6"));
        assert!(!s.is_active);
        assert_eq!(s.agents.len(), 1);
        let a = &s.agents[0];
        assert_eq!(a.agent_type, "Explore");
        assert_eq!(a.agent_id, "a1");
        assert!((a.duration_minutes - 5.0).abs() < 1e-9);
        assert!(!a.is_running);
        assert_eq!(a.end_time.as_deref(), Some("09:10 AM"));
        assert!(a.children.is_empty());
    }

    #[test]
    fn test_agent_line_without_id_leaves_session_untouched() {
        let rs = records(&[
            "09:00 AM │ demo │ main │ 🟢 Session started",
            "09:04 AM │ demo │ main │ 🔧 Bash",
            "09:08 AM │ demo │ main │ 🚀 Spawned agent",
            "09:09 AM │ demo │ main │ 🛬 Agent finished",
        ]);
        let sessions = TopologyBuilder::build_at(&rs, at(9, 10, 0));

        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].agents.is_empty());
        assert_eq!(sessions[0].last_event_time, "09:04 AM");
    }

    #[test]
    fn test_restart_force_closes_previous_session() {
        let rs = records(&[
            "09:00 AM │ A │ main │ 🟢 Session started",
            "09:01 AM │ A │ main │ 🚀 Spawned agent Explore (id1)",
            "09:02 AM │ A │ main │ 🟢 Session started",
            "09:03 AM │ A │ main │ 🔴 Session ended",
        ]);
        let sessions = TopologyBuilder::build_at(&rs, at(9, 4, 0));

        assert_eq!(sessions.len(), 2);
        assert!(sessions.iter().all(|s| s.project == "A" && !s.is_active));
        assert_eq!(sessions[0].start_time, "09:00 AM");
        assert_eq!(sessions[0].agents.len(), 1);
        assert_eq!(sessions[1].start_time, "09:02 AM");
        assert!(sessions[1].agents.is_empty());
    }

    #[test]
    fn test_unclosed_session_is_active_and_last() {
        let rs = records(&[
            "09:00 AM │ a │ main │ 🟢 Session started",
            "09:00 AM │ b │ main │ 🟢 Session started",
            "09:01 AM │ a │ main │ 🔴 Session ended",
            "09:02 AM │ b │ main │ 🔧 Bash",
        ]);
        let sessions = TopologyBuilder::build_at(&rs, at(9, 3, 0));
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].project, "a");
        assert!(!sessions[0].is_active);
        assert_eq!(sessions[1].project, "b");
        assert!(sessions[1].is_active);
        assert_eq!(sessions[1].last_event_time, "09:02 AM");
        assert_eq!(count_active_sessions(&sessions), 1);
    }

    #[test]
    fn test_end_without_open_session_is_noop() {
        let rs = records(&["09:00 AM │ a │ main │ 🔴 Session ended"]);
        assert!(TopologyBuilder::build_at(&rs, at(9, 1, 0)).is_empty());
    }

    #[test]
    fn test_parallel_agents_stay_flat() {
        let rs = records(&[
            "09:00 AM │ a │ main │ 🟢 Session started",
            "09:01 AM │ a │ main │ 🚀 Spawned agent Explore (e1)",
            "09:01 AM │ a │ main │ 🚀 Spawned agent Explore (e2)",
            "09:01 AM │ a │ main │ 🚀 Spawned agent Explore (e3)",
            "09:03 AM │ a │ main │ 🛬 Agent finished Explore (e2)",
        ]);
        let sessions = TopologyBuilder::build_at(&rs, at(9, 4, 0));
        let s = &sessions[0];
        assert_eq!(s.agents.len(), 3);
        assert!(s.agents.iter().all(|a| a.children.is_empty()));
        let running: Vec<_> = s.running_agents().map(|a| a.agent_id.as_str()).collect();
        assert_eq!(running, vec!["e1", "e3"]);
    }

    #[test]
    fn test_completed_by_closes_latest_matching_running_agent() {
        let rs = records(&[
            "09:00 AM │ a │ main │ 🟢 Session started",
            "09:01 AM │ a │ main │ 🚀 Spawned agent Plan (p1)",
            "09:02 AM │ a │ main │ 🚀 Spawned agent Explore (x1)",
            "09:03 AM │ a │ main │ 🚀 Spawned agent Plan (p2)",
            "09:06 AM │ a │ main │ ✅ Task completed by Plan",
        ]);
        let sessions = TopologyBuilder::build_at(&rs, at(9, 7, 0));
        let agents = &sessions[0].agents;
        assert!(agents[0].is_running, "older Plan agent still running");
        assert!(agents[1].is_running);
        assert!(!agents[2].is_running);
        assert!((agents[2].duration_minutes - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_finish_in_other_session_still_resolves_by_id() {
        let rs = records(&[
            "09:00 AM │ a │ main │ 🟢 Session started",
            "09:01 AM │ a │ main │ 🚀 Spawned agent Explore (z9)",
            "09:04 AM │ b │ main │ 🛬 Agent finished Explore (z9)",
        ]);
        let sessions = TopologyBuilder::build_at(&rs, at(9, 5, 0));
        assert!(!sessions[0].agents[0].is_running);
    }

    #[test]
    fn test_stale_agent_expires_after_window() {
        let rs = records(&[
            "09:00 AM │ a │ main │ 🟢 Session started",
            "09:00 AM │ a │ main │ 🚀 Spawned agent Explore (s1)",
        ]);

        let fresh = TopologyBuilder::build_at(&rs, at(9, 10, 0));
        assert!(fresh[0].agents[0].is_running, "600s exactly is not stale");

        let stale = TopologyBuilder::build_at(&rs, at(9, 10, 1));
        assert!(!stale[0].agents[0].is_running);
    }

    #[test]
    fn test_midnight_wrap_duration() {
        let rs = records(&[
            "11:55 PM │ a │ main │ 🟢 Session started",
            "11:55 PM │ a │ main │ 🚀 Spawned agent Explore (m1)",
            "12:05 AM │ a │ main │ 🛬 Agent finished Explore (m1)",
        ]);
        let sessions = TopologyBuilder::build_at(&rs, at(0, 6, 0));
        assert!((sessions[0].agents[0].duration_minutes - 10.0).abs() < 1e-9);
    }
}
