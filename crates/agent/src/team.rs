//! A team owns every agent; relations between agents are names resolved here.

use std::collections::BTreeMap;
use std::sync::Arc;

use cadre_config::DEFAULT_AGENT;
use tracing::debug;

use crate::agent::Agent;
use crate::error::TeamError;

pub struct Team {
    agents: BTreeMap<String, Arc<Agent>>,
    default: Arc<Agent>,
}

impl Team {
    /// Validate relations and derive each agent's parents from the
    /// sub-agent links pointing at it.
    pub fn new(agents: Vec<Agent>) -> Result<Self, TeamError> {
        if agents.is_empty() {
            return Err(TeamError::Empty);
        }

        let mut by_name: BTreeMap<String, Agent> = BTreeMap::new();
        for agent in agents {
            let name = agent.name().to_string();
            if by_name.contains_key(&name) {
                return Err(TeamError::DuplicateAgent(name));
            }
            by_name.insert(name, agent);
        }

        let mut parents: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for agent in by_name.values() {
            for (relation, targets) in [("sub-agent", agent.sub_agents()), ("handoff", agent.handoffs())] {
                if let Some(target) = targets.iter().find(|t| !by_name.contains_key(t.as_str())) {
                    return Err(TeamError::UnknownRelation {
                        agent: agent.name().to_string(),
                        relation,
                        target: target.clone(),
                    });
                }
            }
            for sub in agent.sub_agents() {
                parents
                    .entry(sub.clone())
                    .or_default()
                    .push(agent.name().to_string());
            }
        }

        for (name, agent_parents) in parents {
            if let Some(agent) = by_name.get_mut(&name) {
                agent.parents = agent_parents;
            }
        }

        debug!(agents = by_name.len(), "Team assembled");
        let agents: BTreeMap<String, Arc<Agent>> = by_name
            .into_iter()
            .map(|(name, agent)| (name, Arc::new(agent)))
            .collect();
        let default = agents
            .get(DEFAULT_AGENT)
            .or_else(|| agents.values().next())
            .cloned()
            .ok_or(TeamError::Empty)?;
        Ok(Self { agents, default })
    }

    pub fn agent(&self, name: &str) -> Result<Arc<Agent>, TeamError> {
        self.agents
            .get(name)
            .cloned()
            .ok_or_else(|| TeamError::UnknownAgent(name.to_string()))
    }

    /// `root` when present, else the first agent by name.
    pub fn default_agent(&self) -> Arc<Agent> {
        Arc::clone(&self.default)
    }

    pub fn agent_names(&self) -> Vec<&str> {
        self.agents.keys().map(String::as_str).collect()
    }

    pub fn agents(&self) -> impl Iterator<Item = &Arc<Agent>> {
        self.agents.values()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    fn resolve(&self, names: &[String]) -> Vec<Arc<Agent>> {
        names
            .iter()
            .filter_map(|name| self.agents.get(name).cloned())
            .collect()
    }

    pub fn sub_agents_of(&self, agent: &Agent) -> Vec<Arc<Agent>> {
        self.resolve(agent.sub_agents())
    }

    pub fn parents_of(&self, agent: &Agent) -> Vec<Arc<Agent>> {
        self.resolve(agent.parents())
    }

    pub fn handoffs_of(&self, agent: &Agent) -> Vec<Arc<Agent>> {
        self.resolve(agent.handoffs())
    }

    /// Sub-agents then parents, each agent once.
    pub fn peers_of(&self, agent: &Agent) -> Vec<Arc<Agent>> {
        let mut peers: Vec<Arc<Agent>> = Vec::new();
        for peer in self
            .sub_agents_of(agent)
            .into_iter()
            .chain(self.parents_of(agent))
        {
            if !peers.iter().any(|p| p.name() == peer.name()) {
                peers.push(peer);
            }
        }
        peers
    }

    /// Warnings from every agent, tagged with the agent's name.
    pub fn drain_warnings(&self) -> Vec<(String, String)> {
        self.agents
            .values()
            .flat_map(|agent| {
                agent
                    .drain_warnings()
                    .into_iter()
                    .map(|w| (agent.name().to_string(), w))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Stop every agent's toolsets; the first failure aborts.
    pub async fn stop_toolsets(&self) -> Result<(), TeamError> {
        for agent in self.agents.values() {
            agent
                .stop_toolsets()
                .await
                .map_err(|source| TeamError::Stop {
                    agent: agent.name().to_string(),
                    source,
                })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MockToolSet;
    use std::sync::atomic::Ordering;

    fn team() -> Team {
        Team::new(vec![
            Agent::new("root", "").with_sub_agents(vec!["helper".into(), "writer".into()]),
            Agent::new("helper", "").with_handoffs(vec!["root".into()]),
            Agent::new("writer", "").with_sub_agents(vec!["helper".into()]),
        ])
        .unwrap()
    }

    #[test]
    fn parents_are_derived_from_sub_agents() {
        let team = team();
        let helper = team.agent("helper").unwrap();
        assert_eq!(helper.parents(), ["root", "writer"]);
        assert!(team.agent("root").unwrap().parents().is_empty());
    }

    #[test]
    fn unknown_relation_is_rejected() {
        let err = Team::new(vec![Agent::new("root", "").with_handoffs(vec!["ghost".into()])])
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "agent 'root' references unknown handoff 'ghost'");
        assert!(matches!(Team::new(vec![]), Err(TeamError::Empty)));
    }

    #[test]
    fn duplicate_agent_names_are_rejected() {
        let err = Team::new(vec![Agent::new("root", "a"), Agent::new("root", "b")])
            .err()
            .unwrap();
        assert!(matches!(err, TeamError::DuplicateAgent(ref name) if name == "root"));
    }

    #[test]
    fn lookup_and_default() {
        let team = team();
        assert_eq!(team.default_agent().name(), "root");
        assert!(matches!(team.agent("nope"), Err(TeamError::UnknownAgent(_))));
        assert_eq!(team.agent_names(), vec!["helper", "root", "writer"]);

        let solo = Team::new(vec![Agent::new("solo", "")]).unwrap();
        assert_eq!(solo.default_agent().name(), "solo");
    }

    #[test]
    fn peers_are_deduplicated() {
        let team = Team::new(vec![
            Agent::new("a", "").with_sub_agents(vec!["b".into()]),
            Agent::new("b", "").with_sub_agents(vec!["a".into()]),
        ])
        .unwrap();
        let a = team.agent("a").unwrap();
        let peers: Vec<_> = team.peers_of(&a).iter().map(|p| p.name().to_string()).collect();
        assert_eq!(peers, vec!["b"]);
    }

    #[tokio::test]
    async fn stop_toolsets_reports_failing_agent() {
        let bad = Arc::new(MockToolSet::new("bad").fail_stop());
        let team = Team::new(vec![Agent::new("root", "").with_toolset(bad.clone())]).unwrap();

        team.agent("root").unwrap().tools().await;
        let err = team.stop_toolsets().await.unwrap_err();
        assert!(matches!(err, TeamError::Stop { ref agent, .. } if agent == "root"));
        assert_eq!(bad.stops.load(Ordering::SeqCst), 1);
    }
}
