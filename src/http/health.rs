use actix_web::{web, HttpResponse};
use std::time::Instant;

use crate::models::AgentType;

#[derive(Clone)]
pub struct HealthState {
    pub agent_id: String,
    pub agent_type: AgentType,
    pub started_at: Instant,
}

impl HealthState {
    pub fn new(agent_id: impl Into<String>, agent_type: AgentType) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_type,
            started_at: Instant::now(),
        }
    }
}

pub async fn health_check(state: web::Data<HealthState>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "agent_id": state.agent_id,
        "agent_type": state.agent_type,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
