use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use parity_league::agents::{FixedStrategy, ParityStrategy, Player, PlayerConfig, RandomStrategy};
use parity_league::config::PlayerSettings;
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

    let settings = PlayerSettings::from_env();
    info!(player_id = %settings.player_id, strategy = %settings.strategy, "starting player");

    let strategy: Arc<dyn ParityStrategy> = match settings.fixed_parity() {
        Some(parity) => Arc::new(FixedStrategy(parity)),
        None => Arc::new(RandomStrategy),
    };
    let identity = AgentIdentity::new(AgentType::Player, settings.player_id.clone());
    let client = Arc::new(RpcClient::new(Arc::new(HttpTransport::new()), identity));
    let repo = Arc::new(Repository::new(&settings.data_dir));
    let player = Arc::new(Player::new(
        PlayerConfig {
            player_id: settings.player_id.clone(),
            lm_endpoint: settings.lm_endpoint.clone(),
            contact_endpoint: settings.contact_endpoint.clone(),
        },
        client,
        repo,
        strategy,
    ));

    loop {
        match player.register().await {
            Ok(_) => break,
            Err(e) => {
                warn!(error_code = %e.code(), "registration failed, retrying: {e}");
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }

    let dispatcher: Arc<dyn MessageDispatcher> = player.clone();
    let health = HealthState::new(settings.player_id.clone(), AgentType::Player);
    parity_league::http::run_server(&settings.bind_addr, settings.port, dispatcher, health).await?;
    Ok(())
}
