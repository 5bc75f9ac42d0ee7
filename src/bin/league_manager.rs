use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use parity_league::agents::{LeagueManager, LeagueManagerConfig};
use parity_league::config::LeagueManagerSettings;
use parity_league::http::health::HealthState;
use parity_league::models::{AgentIdentity, AgentType};
use parity_league::protocol::MessageDispatcher;
use parity_league::service::{HttpTransport, RpcClient};
use parity_league::storage::Repository;

#[actix_web::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = LeagueManagerSettings::from_env();
    info!(league_id = %settings.league_id, port = settings.port, "starting league manager");

    let identity = AgentIdentity::new(AgentType::LeagueManager, "LM01");
    let client = Arc::new(
        RpcClient::new(Arc::new(HttpTransport::new()), identity)
            .with_auth_token(uuid::Uuid::new_v4().to_string()),
    );
    let repo = Arc::new(Repository::new(&settings.data_dir));
    let manager = Arc::new(LeagueManager::new(
        LeagueManagerConfig {
            league_id: settings.league_id.clone(),
            game_type: settings.game_type.clone(),
            min_players: settings.min_players,
            max_players: settings.max_players,
            ..LeagueManagerConfig::default()
        },
        repo,
        client,
    ));

    // Hourly token-expiry sweep drops agents whose registrations lapsed.
    let registry = manager.registry();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(3600));
        loop {
            ticker.tick().await;
            let purged = registry.purge_expired().await;
            if purged > 0 {
                info!(count = purged, "purged expired registrations");
            }
        }
    });

    let dispatcher: Arc<dyn MessageDispatcher> = manager.clone();
    let health = HealthState::new("LM01", AgentType::LeagueManager);
    let served = parity_league::http::run_server(&settings.bind_addr, settings.port, dispatcher, health).await;

    manager.shutdown().await;
    served?;
    Ok(())
}
