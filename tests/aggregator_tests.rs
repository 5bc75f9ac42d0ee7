//! Concurrent report aggregation: at-most-once accounting under
//! retransmission, and drain-on-shutdown semantics.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use common::InMemoryNetwork;
use parity_league::error::ErrorCode;
use parity_league::models::{
    AgentIdentity, AgentType, League, LeagueStatus, MatchOutcome, MatchState, Parity,
    PlayerStatus, Round, RoundStatus, RoundsFile, ScheduledMatch, ScheduledMatchStatus,
};
use parity_league::protocol::messages::MatchResultReportParams;
use parity_league::service::registry_service::{RegistryConfig, RegistryService};
use parity_league::service::standings_service::{AggregatorConfig, StandingsAggregator};
use parity_league::service::{RetryConfig, RpcClient, Transport};
use parity_league::storage::Repository;

struct AggregatorFixture {
    aggregator: Arc<StandingsAggregator>,
    repo: Arc<Repository>,
    league: Arc<RwLock<League>>,
    _events: tokio::sync::mpsc::UnboundedReceiver<parity_league::service::RoundEvent>,
    _dir: tempfile::TempDir,
}

fn win_report(i: usize) -> MatchResultReportParams {
    let winner = format!("A{i:03}");
    let loser = format!("B{i:03}");
    MatchResultReportParams {
        match_id: format!("R1M{i}"),
        round_id: 1,
        league_id: "league-1".to_string(),
        state: MatchState::Finished,
        outcome: MatchOutcome {
            winner_player_id: winner.clone(),
            statuses: HashMap::from([
                (winner.clone(), PlayerStatus::Win),
                (loser.clone(), PlayerStatus::Loss),
            ]),
            drawn_number: Some(4),
            number_parity: Some(Parity::Even),
            points_awarded: HashMap::from([(winner, 3), (loser, 0)]),
        },
    }
}

async fn fixture(match_count: usize, queue_capacity: usize) -> AggregatorFixture {
    let dir = tempfile::tempdir().unwrap();
    let repo = Arc::new(Repository::new(dir.path()));

    let matches = (1..=match_count)
        .map(|i| ScheduledMatch {
            match_id: format!("R1M{i}"),
            players: [format!("A{i:03}"), format!("B{i:03}")],
            referee_id: if i % 2 == 0 { "REF02" } else { "REF01" }.to_string(),
            status: ScheduledMatchStatus::Scheduled,
        })
        .collect();
    repo.save_rounds(&RoundsFile {
        league_id: "league-1".to_string(),
        rounds: vec![Round {
            round_id: 1,
            status: RoundStatus::Pending,
            matches,
        }],
    })
    .await
    .unwrap();

    let mut league = League::new("league-1", "even_odd");
    league.status = LeagueStatus::Active;
    let league = Arc::new(RwLock::new(league));

    let network = InMemoryNetwork::new();
    let client = Arc::new(
        RpcClient::new(
            network as Arc<dyn Transport>,
            AgentIdentity::new(AgentType::LeagueManager, "LM01"),
        )
        .with_retry_config(RetryConfig::immediate()),
    );
    let registry = Arc::new(RegistryService::new(RegistryConfig::default()));

    let (aggregator, events) = StandingsAggregator::spawn(
        AggregatorConfig {
            queue_capacity,
            drain_timeout: Duration::from_secs(10),
        },
        repo.clone(),
        league.clone(),
        registry,
        client,
    );
    AggregatorFixture {
        aggregator,
        repo,
        league,
        _events: events,
        _dir: dir,
    }
}

async fn enqueue_with_retries(aggregator: &StandingsAggregator, report: MatchResultReportParams) {
    loop {
        match aggregator.enqueue(report.clone()).await {
            Ok(_) => return,
            Err(e) if e.code() == ErrorCode::E014 => {
                // Queue full: back off like a referee would and retry.
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            Err(e) => panic!("unexpected enqueue failure: {e}"),
        }
    }
}

#[tokio::test]
async fn s6_concurrent_reports_count_exactly_once() {
    let fx = fixture(200, 100).await;

    // Two referees, 100 distinct matches each, every report retransmitted.
    let agg_a = fx.aggregator.clone();
    let ref_a = tokio::spawn(async move {
        for i in 1..=100 {
            for _ in 0..2 {
                enqueue_with_retries(&agg_a, win_report(i)).await;
            }
        }
    });
    let agg_b = fx.aggregator.clone();
    let ref_b = tokio::spawn(async move {
        for i in 101..=200 {
            for _ in 0..2 {
                enqueue_with_retries(&agg_b, win_report(i)).await;
            }
        }
    });
    ref_a.await.unwrap();
    ref_b.await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while fx.aggregator.processed_count().await < 200 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "aggregator did not process all reports"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let standings = fx.repo.load_standings("league-1").await.unwrap();
    let total_points: u32 = standings.rows.values().map(|r| r.points).sum();
    let total_games: u32 = standings.rows.values().map(|r| r.games_played).sum();
    assert_eq!(total_points, 600, "200 wins at 3 points each");
    assert_eq!(total_games, 400, "every match counts two games");
    for i in 1..=200 {
        assert_eq!(standings.rows[&format!("A{i:03}")].wins, 1);
        assert_eq!(standings.rows[&format!("B{i:03}")].losses, 1);
    }

    // All matches processed closes the round and the league.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while fx.league.read().await.status != LeagueStatus::Completed {
        assert!(tokio::time::Instant::now() < deadline, "league never completed");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn shutdown_drains_then_refuses() {
    let fx = fixture(10, 100).await;
    for i in 1..=10 {
        enqueue_with_retries(&fx.aggregator, win_report(i)).await;
    }
    fx.aggregator.shutdown().await;
    assert_eq!(fx.aggregator.processed_count().await, 10);

    let err = fx.aggregator.enqueue(win_report(11)).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::E009);
}

#[tokio::test]
async fn duplicate_enqueues_apply_once() {
    let fx = fixture(3, 100).await;
    // The same report queued twice back-to-back, before the consumer can
    // possibly have processed the first copy.
    for _ in 0..2 {
        enqueue_with_retries(&fx.aggregator, win_report(1)).await;
    }
    fx.aggregator.shutdown().await;
    let standings = fx.repo.load_standings("league-1").await.unwrap();
    assert_eq!(standings.rows["A001"].wins, 1);
    assert_eq!(standings.rows["A001"].games_played, 1);
}
