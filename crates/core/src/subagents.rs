use std::collections::{HashMap, HashSet};

use crate::types::SessionStats;

/// Partitions sessions into parent sessions with combined metrics and a
/// lookup map of parent id -> original subagent sessions.
///
/// Subagent tokens, costs, and model rollups are merged into an enriched
/// copy of their parent; the inputs are never mutated. Orphaned subagents
/// (no matching parent in the set) are kept as standalone entries.
pub fn group_subagents(
    sessions: &[SessionStats],
) -> (Vec<SessionStats>, HashMap<String, Vec<SessionStats>>) {
    let parent_ids: HashSet<&str> = sessions
        .iter()
        .filter(|s| !s.is_subagent)
        .map(|s| s.session_id.as_str())
        .collect();

    let mut sub_map: HashMap<String, Vec<SessionStats>> = HashMap::new();
    let mut parents: Vec<SessionStats> = Vec::new();

    for s in sessions {
        if s.is_subagent {
            match s.parent_session.as_deref() {
                Some(parent) if parent_ids.contains(parent) => {
                    sub_map.entry(parent.to_string()).or_default().push(s.clone());
                }
                // Orphan: parent absent from the set, keep standalone.
                _ => parents.push(s.clone()),
            }
        } else {
            parents.push(s.clone());
        }
    }

    for parent in &mut parents {
        let Some(subs) = sub_map.get(&parent.session_id) else {
            continue;
        };

        for sub in subs {
            parent.api_calls += sub.api_calls;
            parent.input_tokens += sub.input_tokens;
            parent.output_tokens += sub.output_tokens;
            parent.cache_creation_5m_tokens += sub.cache_creation_5m_tokens;
            parent.cache_creation_1h_tokens += sub.cache_creation_1h_tokens;
            parent.cache_read_tokens += sub.cache_read_tokens;
            parent.estimated_cost += sub.estimated_cost;

            for (model, usage) in &sub.models {
                parent
                    .models
                    .entry(model.clone())
                    .or_default()
                    .add(usage);
            }
        }

        parent.cache_hit_rate = parent.compute_cache_hit_rate();
    }

    (parents, sub_map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ModelUsage;

    fn parent(id: &str, cost: f64) -> SessionStats {
        let mut models = HashMap::new();
        models.insert(
            "claude-opus-4-5".to_string(),
            ModelUsage {
                api_calls: 1,
                input_tokens: 100,
                estimated_cost: cost,
                ..ModelUsage::default()
            },
        );
        SessionStats {
            session_id: id.to_string(),
            api_calls: 1,
            input_tokens: 100,
            models,
            estimated_cost: cost,
            ..SessionStats::default()
        }
    }

    fn subagent(parent_id: &str, agent: &str, cost: f64) -> SessionStats {
        let mut models = HashMap::new();
        models.insert(
            "claude-haiku-4-5".to_string(),
            ModelUsage {
                api_calls: 2,
                cache_read_tokens: 300,
                estimated_cost: cost,
                ..ModelUsage::default()
            },
        );
        SessionStats {
            session_id: format!("{parent_id}/{agent}"),
            is_subagent: true,
            parent_session: Some(parent_id.to_string()),
            api_calls: 2,
            cache_read_tokens: 300,
            models,
            estimated_cost: cost,
            ..SessionStats::default()
        }
    }

    #[test]
    fn merges_subagent_metrics_into_parent_copy() {
        let sessions = vec![
            parent("p1", 1.0),
            subagent("p1", "agent-a", 0.30),
            subagent("p1", "agent-b", 0.20),
        ];

        let (parents, sub_map) = group_subagents(&sessions);

        assert_eq!(parents.len(), 1);
        let enriched = &parents[0];
        assert!((enriched.estimated_cost - 1.50).abs() < 1e-9);
        assert_eq!(enriched.api_calls, 5);
        assert_eq!(enriched.cache_read_tokens, 600);
        assert_eq!(enriched.models.len(), 2);
        assert_eq!(
            enriched.models["claude-haiku-4-5"].api_calls,
            4,
        );
        // Hit rate recomputed from combined totals: 600 reads / (600 + 100).
        assert!((enriched.cache_hit_rate - 600.0 / 700.0).abs() < 1e-9);

        assert_eq!(sub_map["p1"].len(), 2);
        // Originals unchanged.
        assert!((sessions[0].estimated_cost - 1.0).abs() < 1e-9);
        assert_eq!(sessions[0].models.len(), 1);
    }

    #[test]
    fn orphan_subagents_stay_standalone() {
        let sessions = vec![parent("p1", 1.0), subagent("missing", "agent-a", 0.5)];

        let (parents, sub_map) = group_subagents(&sessions);

        assert_eq!(parents.len(), 2);
        assert!(sub_map.is_empty());
        assert!(parents.iter().any(|s| s.is_subagent));
    }
}
