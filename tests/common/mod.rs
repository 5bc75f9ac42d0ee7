//! In-process test harness: every agent is wired to the same deterministic
//! in-memory transport instead of HTTP.
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;

use parity_league::agents::{
    LeagueManager, LeagueManagerConfig, ParityStrategy, Player, PlayerConfig, Referee,
    RefereeConfig,
};
use parity_league::error::LeagueError;
use parity_league::models::{AgentIdentity, AgentType, LeagueStatus, ScoringConfig};
use parity_league::protocol::{ingress, MessageDispatcher};
use parity_league::service::{
    EvenOddRules, NumberDraw, RetryConfig, RpcClient, ScriptedDraw, Transport,
};
use parity_league::storage::Repository;

type Rewriter = Box<dyn Fn(Value) -> Value + Send + Sync>;

/// Routes endpoints straight to dispatchers, with per-(endpoint, method)
/// fault injection and response rewriting.
pub struct InMemoryNetwork {
    routes: RwLock<HashMap<String, Arc<dyn MessageDispatcher>>>,
    dead_methods: Mutex<HashSet<(String, String)>>,
    rewriters: Mutex<HashMap<(String, String), Rewriter>>,
}

impl InMemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            routes: RwLock::new(HashMap::new()),
            dead_methods: Mutex::new(HashSet::new()),
            rewriters: Mutex::new(HashMap::new()),
        })
    }

    pub async fn route(&self, endpoint: &str, dispatcher: Arc<dyn MessageDispatcher>) {
        self.routes
            .write()
            .await
            .insert(endpoint.to_string(), dispatcher);
    }

    /// Make `method` towards `endpoint` time out, as if the peer went
    /// silent.
    pub fn drop_method(&self, endpoint: &str, method: &str) {
        self.dead_methods
            .lock()
            .unwrap()
            .insert((endpoint.to_string(), method.to_string()));
    }

    /// Rewrite the JSON-RPC response of `method` towards `endpoint`.
    pub fn rewrite_response(
        &self,
        endpoint: &str,
        method: &str,
        rewriter: impl Fn(Value) -> Value + Send + Sync + 'static,
    ) {
        self.rewriters.lock().unwrap().insert(
            (endpoint.to_string(), method.to_string()),
            Box::new(rewriter),
        );
    }
}

#[async_trait]
impl Transport for InMemoryNetwork {
    async fn send(
        &self,
        endpoint: &str,
        body: Value,
        _deadline: Duration,
    ) -> Result<Value, LeagueError> {
        let method = body
            .get("method")
            .and_then(|m| m.as_str())
            .unwrap_or("")
            .to_string();
        if self
            .dead_methods
            .lock()
            .unwrap()
            .contains(&(endpoint.to_string(), method.clone()))
        {
            return Err(LeagueError::Timeout(format!(
                "{endpoint} did not answer {method}"
            )));
        }
        let dispatcher = self
            .routes
            .read()
            .await
            .get(endpoint)
            .cloned()
            .ok_or_else(|| LeagueError::AgentUnavailable(endpoint.to_string()))?;
        let bytes = serde_json::to_vec(&body)?;
        let mut response = ingress::handle_request(dispatcher.as_ref(), &bytes)
            .await
            .unwrap_or(Value::Null);
        if let Some(rewriter) = self
            .rewriters
            .lock()
            .unwrap()
            .get(&(endpoint.to_string(), method))
        {
            response = rewriter(response);
        }
        Ok(response)
    }
}

pub const LM_ENDPOINT: &str = "http://lm";

pub fn player_endpoint(player_id: &str) -> String {
    format!("http://{}", player_id.to_lowercase())
}

pub fn referee_endpoint(referee_id: &str) -> String {
    format!("http://{}", referee_id.to_lowercase())
}

pub struct TestLeague {
    pub network: Arc<InMemoryNetwork>,
    pub lm: Arc<LeagueManager>,
    pub lm_repo: Arc<Repository>,
    pub referee_repos: HashMap<String, Arc<Repository>>,
    pub player_repos: HashMap<String, Arc<Repository>>,
    pub referee_clients: HashMap<String, Arc<RpcClient>>,
    pub operator: Arc<RpcClient>,
    _dir: tempfile::TempDir,
}

fn test_client(
    network: &Arc<InMemoryNetwork>,
    agent_type: AgentType,
    agent_id: &str,
) -> Arc<RpcClient> {
    Arc::new(
        RpcClient::new(
            network.clone() as Arc<dyn Transport>,
            AgentIdentity::new(agent_type, agent_id),
        )
        .with_retry_config(RetryConfig::immediate()),
    )
}

/// Build a league with the given players and referees, register everyone
/// and leave the league PENDING.
pub async fn setup_league(
    players: Vec<(&str, Arc<dyn ParityStrategy>)>,
    referee_ids: &[&str],
    draws: Vec<u8>,
) -> TestLeague {
    let dir = tempfile::tempdir().unwrap();
    let network = InMemoryNetwork::new();
    let draw: Arc<dyn NumberDraw> = Arc::new(ScriptedDraw::new(draws));

    let lm_repo = Arc::new(Repository::new(dir.path().join("lm")));
    let lm_client = Arc::new(
        RpcClient::new(
            network.clone() as Arc<dyn Transport>,
            AgentIdentity::new(AgentType::LeagueManager, "LM01"),
        )
        .with_retry_config(RetryConfig::immediate())
        .with_auth_token("lm-boot-token"),
    );
    let lm = Arc::new(LeagueManager::new(
        LeagueManagerConfig {
            min_players: 2,
            ..LeagueManagerConfig::default()
        },
        lm_repo.clone(),
        lm_client,
    ));
    network.route(LM_ENDPOINT, lm.clone()).await;

    let mut referee_repos = HashMap::new();
    let mut referee_clients = HashMap::new();
    for referee_id in referee_ids {
        let repo = Arc::new(Repository::new(dir.path().join(referee_id)));
        let client = test_client(&network, AgentType::Referee, referee_id);
        let referee = Arc::new(Referee::new(
            RefereeConfig {
                referee_id: referee_id.to_string(),
                lm_endpoint: LM_ENDPOINT.to_string(),
                contact_endpoint: referee_endpoint(referee_id),
                max_concurrent_matches: 50,
                outbox_interval: Duration::from_millis(20),
                ..RefereeConfig::default()
            },
            client.clone(),
            repo.clone(),
            Arc::new(EvenOddRules::default()),
            draw.clone(),
            ScoringConfig::default(),
        ));
        network
            .route(&referee_endpoint(referee_id), referee.clone())
            .await;
        referee.register().await.expect("referee registers");
        referee_repos.insert(referee_id.to_string(), repo);
        referee_clients.insert(referee_id.to_string(), client);
    }

    let mut player_repos = HashMap::new();
    for (player_id, strategy) in players {
        let repo = Arc::new(Repository::new(dir.path().join(player_id)));
        let client = test_client(&network, AgentType::Player, player_id);
        let player = Arc::new(Player::new(
            PlayerConfig {
                player_id: player_id.to_string(),
                lm_endpoint: LM_ENDPOINT.to_string(),
                contact_endpoint: player_endpoint(player_id),
            },
            client,
            repo.clone(),
            strategy,
        ));
        network
            .route(&player_endpoint(player_id), player.clone())
            .await;
        player.register().await.expect("player registers");
        player_repos.insert(player_id.to_string(), repo);
    }

    let operator = test_client(&network, AgentType::LeagueManager, "operator");
    TestLeague {
        network,
        lm,
        lm_repo,
        referee_repos,
        player_repos,
        referee_clients,
        operator,
        _dir: dir,
    }
}

impl TestLeague {
    pub async fn start(&self) -> Result<Value, LeagueError> {
        self.operator
            .call(
                LM_ENDPOINT,
                parity_league::protocol::messages::START_LEAGUE,
                "operator-conv",
                serde_json::json!({}),
            )
            .await
    }

    /// Poll until the league completes or the timeout elapses.
    pub async fn wait_until_completed(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.lm.league_status().await == LeagueStatus::Completed {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

/// Poll for a concluded match record. A record appears as soon as
/// conduction starts, so wait for the final write carrying the outcome.
pub async fn wait_for_record(
    repo: &Repository,
    match_id: &str,
    timeout: Duration,
) -> parity_league::models::MatchRecord {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(record) = repo.load_match_record(match_id).await.unwrap() {
            if record.outcome.is_some() {
                return record;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "no concluded transcript for {match_id}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
