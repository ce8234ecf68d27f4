//! Agent adapters used by the node.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;
use vigil_core::{AgentRole, Manifest, WorldState};
use vigil_runtime::{Agent, AgentContext, AgentOutcome, AgentSet};

/// Request body sent to an external collaborator.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest<'a> {
    pub run_id: Uuid,
    pub agent_id: &'a str,
    pub role: AgentRole,
    pub segment: u32,
    pub state: &'a WorldState,
}

/// Agent implemented by an HTTP endpoint.
///
/// The endpoint receives an [`AgentRequest`] and answers with an
/// `AgentOutcome` JSON body. Transport errors and non-2xx responses become
/// failed outcomes.
pub struct HttpAgent {
    url: String,
    client: reqwest::Client,
}

impl HttpAgent {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn call(&self, ctx: &AgentContext) -> AgentOutcome {
        let body = AgentRequest {
            run_id: ctx.run_id,
            agent_id: &ctx.agent_id,
            role: ctx.role,
            segment: ctx.segment,
            state: &ctx.state,
        };

        let response = match self.client.post(&self.url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => return AgentOutcome::failure(format!("HTTP request failed: {}", e)),
        };

        let status = response.status();
        if !status.is_success() {
            return AgentOutcome::failure(format!("{} answered {}", self.url, status));
        }

        match response.json::<AgentOutcome>().await {
            Ok(outcome) => outcome,
            Err(e) => AgentOutcome::failure(format!("Invalid agent response: {}", e)),
        }
    }
}

#[async_trait]
impl Agent for HttpAgent {
    async fn execute(&self, ctx: AgentContext) -> AgentOutcome {
        debug!("POST {} for {}", self.url, ctx.agent_id);
        tokio::select! {
            outcome = self.call(&ctx) => outcome,
            _ = ctx.cancellation.cancelled() => AgentOutcome::failure("cancelled"),
        }
    }
}

/// Stand-in for manifest entries without an endpoint.
pub struct SimulatedAgent {
    latency: Duration,
}

impl SimulatedAgent {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl Agent for SimulatedAgent {
    async fn execute(&self, ctx: AgentContext) -> AgentOutcome {
        tokio::select! {
            _ = tokio::time::sleep(self.latency) => {}
            _ = ctx.cancellation.cancelled() => return AgentOutcome::failure("cancelled"),
        }
        AgentOutcome::success(serde_json::json!({
            "simulated": true,
            "role": ctx.role,
            "segment": ctx.segment,
        }))
    }
}

/// Bind every manifest entry: HTTP when it names an endpoint, simulated
/// otherwise.
pub fn bind_manifest(manifest: &Manifest, simulated_latency: Duration) -> AgentSet {
    let endpoints = manifest.endpoints();
    let mut agents = AgentSet::new();
    for id in manifest.agents.keys() {
        match endpoints.get(id) {
            Some(url) => agents.bind(id.clone(), HttpAgent::new(url.clone())),
            None => agents.bind(id.clone(), SimulatedAgent::new(simulated_latency)),
        }
    }
    agents
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_runtime::CancellationToken;

    fn context() -> AgentContext {
        AgentContext {
            run_id: Uuid::new_v4(),
            agent_id: "explain".to_string(),
            role: AgentRole::Reasoning,
            segment: 1,
            state: WorldState::from_iter([("hasResult", true)]),
            cancellation: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_simulated_agent_succeeds() {
        let outcome = SimulatedAgent::new(Duration::ZERO).execute(context()).await;
        assert!(outcome.success);
        assert_eq!(outcome.output["role"], "reasoning");
        assert_eq!(outcome.output["segment"], 1);
    }

    #[tokio::test]
    async fn test_http_agent_unreachable_fails() {
        let agent = HttpAgent::new("http://127.0.0.1:9/agent");
        let outcome = agent.execute(context()).await;
        assert!(!outcome.success);
        assert!(outcome.error.is_some());
    }

    #[test]
    fn test_request_body_shape() {
        let ctx = context();
        let body = AgentRequest {
            run_id: ctx.run_id,
            agent_id: &ctx.agent_id,
            role: ctx.role,
            segment: ctx.segment,
            state: &ctx.state,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["agentId"], "explain");
        assert_eq!(json["state"]["hasResult"], true);
    }

    #[test]
    fn test_bind_manifest() {
        let manifest = Manifest::from_json(
            r#"{
                "agents": {
                    "intake": {"role": "intake", "effects": {"hasImage": true}},
                    "classify": {
                        "role": "classification",
                        "preconditions": {"hasImage": true},
                        "effects": {"hasResult": true},
                        "endpoint": "http://localhost:8081/classify"
                    }
                }
            }"#,
        )
        .unwrap();

        let agents = bind_manifest(&manifest, Duration::ZERO);
        assert_eq!(agents.len(), 2);
        assert!(agents.contains("intake"));
        assert!(agents.contains("classify"));
    }
}
