use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use parity_league::agents::{Referee, RefereeConfig};
use parity_league::config::RefereeSettings;
use parity_league::http::health::HealthState;
use parity_league::models::{AgentIdentity, AgentType, ScoringConfig};
use parity_league::protocol::MessageDispatcher;
use parity_league::service::{EvenOddRules, HttpTransport, RpcClient, SecureDraw};
use parity_league::storage::Repository;

#[actix_web::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = RefereeSettings::from_env();
    info!(referee_id = %settings.referee_id, port = settings.port, "starting referee");

    let identity = AgentIdentity::new(AgentType::Referee, settings.referee_id.clone());
    let client = Arc::new(RpcClient::new(Arc::new(HttpTransport::new()), identity));
    let repo = Arc::new(Repository::new(&settings.data_dir));
    let referee = Arc::new(Referee::new(
        RefereeConfig {
            referee_id: settings.referee_id.clone(),
            lm_endpoint: settings.lm_endpoint.clone(),
            contact_endpoint: settings.contact_endpoint.clone(),
            max_concurrent_matches: settings.max_concurrent_matches,
            ..RefereeConfig::default()
        },
        client,
        repo,
        Arc::new(EvenOddRules::default()),
        Arc::new(SecureDraw),
        ScoringConfig::default(),
    ));

    match referee.recover_stale_matches(&ScoringConfig::default()).await {
        Ok(0) => {}
        Ok(n) => warn!(count = n, "failed stale matches from a previous run"),
        Err(e) => warn!("stale match recovery failed: {e}"),
    }

    // Keep trying until the league manager is up; its own retry policy and
    // breaker pace the attempts.
    loop {
        match referee.register().await {
            Ok(_) => break,
            Err(e) => {
                warn!(error_code = %e.code(), "registration failed, retrying: {e}");
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
    referee.spawn_outbox_loop();

    let dispatcher: Arc<dyn MessageDispatcher> = referee.clone();
    let health = HealthState::new(settings.referee_id.clone(), AgentType::Referee);
    parity_league::http::run_server(&settings.bind_addr, settings.port, dispatcher, health).await?;
    Ok(())
}
