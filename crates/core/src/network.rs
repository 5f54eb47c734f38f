// Multi-Agent Network
//
// A named registry of agents, an adjacency list of allowed delegation edges
// and one designated supervisor. Every delegation starts a fresh conversation
// on the target agent's own loop; runs share nothing but the registry.

use std::collections::{BTreeMap, BTreeSet};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use strand_schemas::AgentResult;
use tracing::{info, warn};

use crate::error::{Result, RuntimeError};
use crate::executor::Agent;

/// Capability descriptor advertised by an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCard {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl AgentCard {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            capabilities: Vec::new(),
        }
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }
}

struct NetworkNode {
    agent: Agent,
    card: AgentCard,
}

/// A completed delegation
#[derive(Debug, Clone)]
pub struct Delegation {
    pub agent_name: String,
    pub result: AgentResult,
}

/// One agent's outcome in a broadcast
#[derive(Debug)]
pub struct BroadcastOutcome {
    pub agent_name: String,
    pub outcome: Result<AgentResult>,
}

/// Graph of agents with delegation edges and an optional supervisor
#[derive(Default)]
pub struct AgentNetwork {
    // BTreeMap keeps listing, routing ties and broadcasts in name order
    nodes: BTreeMap<String, NetworkNode>,
    edges: BTreeMap<String, BTreeSet<String>>,
    supervisor: Option<String>,
}

impl AgentNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> AgentNetworkBuilder {
        AgentNetworkBuilder::default()
    }

    /// Register an agent under its configured name. Replaces an agent of the same name.
    pub fn add_agent(&mut self, agent: Agent, card: AgentCard) {
        let name = agent.name().to_string();
        let card = AgentCard { name: name.clone(), ..card };
        self.nodes.insert(name, NetworkNode { agent, card });
    }

    /// Remove an agent and every edge touching it
    pub fn remove_agent(&mut self, name: &str) -> Option<Agent> {
        let node = self.nodes.remove(name)?;
        self.edges.remove(name);
        for targets in self.edges.values_mut() {
            targets.remove(name);
        }
        if self.supervisor.as_deref() == Some(name) {
            self.supervisor = None;
        }
        Some(node.agent)
    }

    /// Allow `from` to delegate to `to`
    pub fn connect(&mut self, from: &str, to: &str) -> Result<()> {
        self.require(from)?;
        self.require(to)?;
        self.edges
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
        Ok(())
    }

    pub fn set_supervisor(&mut self, name: &str) -> Result<()> {
        self.require(name)?;
        self.supervisor = Some(name.to_string());
        Ok(())
    }

    pub fn supervisor(&self) -> Option<&str> {
        self.supervisor.as_deref()
    }

    pub fn agent(&self, name: &str) -> Option<&Agent> {
        self.nodes.get(name).map(|node| &node.agent)
    }

    /// Cards of all registered agents, by name
    pub fn cards(&self) -> Vec<&AgentCard> {
        self.nodes.values().map(|node| &node.card).collect()
    }

    /// Agents `name` may delegate to
    pub fn connections(&self, name: &str) -> Vec<&str> {
        self.edges
            .get(name)
            .map(|targets| targets.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn can_delegate(&self, from: &str, to: &str) -> bool {
        self.edges.get(from).is_some_and(|targets| targets.contains(to))
    }

    fn require(&self, name: &str) -> Result<&NetworkNode> {
        self.nodes
            .get(name)
            .ok_or_else(|| RuntimeError::AgentNotFound(name.to_string()))
    }

    /// Run `prompt` as a fresh conversation on the named agent
    pub async fn delegate(&self, name: &str, prompt: &str) -> Result<AgentResult> {
        let node = self.require(name)?;
        info!(agent = %name, "Delegating task");
        node.agent.run(prompt).await
    }

    /// Delegate along an edge; fails unless `from` is connected to `to`
    pub async fn delegate_from(&self, from: &str, to: &str, prompt: &str) -> Result<AgentResult> {
        self.require(from)?;
        self.require(to)?;
        if !self.can_delegate(from, to) {
            return Err(RuntimeError::DelegationNotAllowed {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        self.delegate(to, prompt).await
    }

    /// Agent whose card matches the most requested capabilities
    /// (case-insensitive). Ties go to the first name alphabetically.
    pub fn route(&self, capabilities: &[&str]) -> Option<&str> {
        let wanted: Vec<String> = capabilities.iter().map(|c| c.to_lowercase()).collect();
        let mut best: Option<(&str, usize)> = None;

        for (name, node) in &self.nodes {
            let score = node
                .card
                .capabilities
                .iter()
                .filter(|c| wanted.contains(&c.to_lowercase()))
                .count();
            if score > 0 && best.map_or(true, |(_, top)| score > top) {
                best = Some((name.as_str(), score));
            }
        }
        best.map(|(name, _)| name)
    }

    /// Ask the supervisor which connected agent should handle `prompt`, then
    /// delegate to it
    pub async fn run_supervised(&self, prompt: &str) -> Result<Delegation> {
        let supervisor = self
            .supervisor
            .as_deref()
            .ok_or_else(|| RuntimeError::configuration("no supervisor configured"))?;
        let supervisor_node = self.require(supervisor)?;

        let candidates = self.connections(supervisor);
        if candidates.is_empty() {
            return Err(RuntimeError::configuration(format!(
                "supervisor '{supervisor}' has no delegation edges"
            )));
        }

        let roster: Vec<String> = candidates
            .iter()
            .filter_map(|name| self.nodes.get(*name))
            .map(|node| {
                format!(
                    "- {}: {} (capabilities: {})",
                    node.card.name,
                    node.card.description,
                    node.card.capabilities.join(", ")
                )
            })
            .collect();
        // The roster rides in the user turn so the supervisor keeps its own instructions
        let routing_prompt = format!(
            "Available sub-agents:\n{}\n\n\
             Respond with ONLY the name of the best sub-agent for this request:\n{prompt}",
            roster.join("\n")
        );

        let decision = supervisor_node.agent.run(routing_prompt).await?;

        let chosen = pick_candidate(&decision.text, &candidates).ok_or_else(|| {
            warn!(supervisor = %supervisor, answer = %decision.text, "Supervisor chose an unknown agent");
            RuntimeError::AgentNotFound(decision.text.trim().to_string())
        })?;
        info!(supervisor = %supervisor, target = %chosen, "Supervisor routed task");

        let result = self.delegate_from(supervisor, chosen, prompt).await?;
        Ok(Delegation {
            agent_name: chosen.to_string(),
            result,
        })
    }

    /// Run `prompt` on every agent except the supervisor, concurrently.
    /// Outcomes are in name order.
    pub async fn broadcast(&self, prompt: &str) -> Vec<BroadcastOutcome> {
        let targets: Vec<&String> = self
            .nodes
            .keys()
            .filter(|name| self.supervisor.as_deref() != Some(name.as_str()))
            .collect();

        let runs = targets.iter().map(|name| async move {
            BroadcastOutcome {
                agent_name: (*name).clone(),
                outcome: self.delegate(name, prompt).await,
            }
        });
        join_all(runs).await
    }
}

/// Exact (case-insensitive, punctuation-trimmed) match first, then the longest
/// candidate name mentioned anywhere in the answer
fn pick_candidate<'a>(answer: &str, candidates: &[&'a str]) -> Option<&'a str> {
    let cleaned = answer
        .trim()
        .trim_matches(|c: char| !c.is_alphanumeric() && c != '_' && c != '-')
        .to_lowercase();

    if let Some(exact) = candidates.iter().find(|c| c.to_lowercase() == cleaned) {
        return Some(*exact);
    }

    let lowered = answer.to_lowercase();
    candidates
        .iter()
        .filter(|c| lowered.contains(&c.to_lowercase()))
        .max_by_key(|c| c.len())
        .copied()
}

impl std::fmt::Debug for AgentNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentNetwork")
            .field("agents", &self.nodes.keys().collect::<Vec<_>>())
            .field("edges", &self.edges)
            .field("supervisor", &self.supervisor)
            .finish()
    }
}

/// Fluent construction of an AgentNetwork
#[derive(Default)]
pub struct AgentNetworkBuilder {
    agents: Vec<(Agent, AgentCard)>,
    edges: Vec<(String, String)>,
    supervisor: Option<String>,
}

impl AgentNetworkBuilder {
    pub fn agent(mut self, agent: Agent, card: AgentCard) -> Self {
        self.agents.push((agent, card));
        self
    }

    pub fn connect(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push((from.into(), to.into()));
        self
    }

    pub fn supervisor(mut self, name: impl Into<String>) -> Self {
        self.supervisor = Some(name.into());
        self
    }

    /// Fails if an edge or the supervisor names an unregistered agent
    pub fn build(self) -> Result<AgentNetwork> {
        let mut network = AgentNetwork::new();
        for (agent, card) in self.agents {
            network.add_agent(agent, card);
        }
        for (from, to) in &self.edges {
            network.connect(from, to)?;
        }
        if let Some(supervisor) = &self.supervisor {
            network.set_supervisor(supervisor)?;
        }
        Ok(network)
    }
}
