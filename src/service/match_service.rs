//! Match conduction: the referee-side state machine driving one match
//! against two players under strict deadlines.

use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ErrorCode, LeagueError};
use crate::models::{
    MatchOutcome, MatchRecord, MatchState, Parity, PlayerStatus, ScoringConfig, OUTCOME_DRAW,
};
use crate::protocol::messages::{
    self, ChooseParityCallParams, ChooseParityResponse, GameInvitationParams, GameJoinAck,
    GameOverParams, MatchResultReportParams, StartMatchParams,
};
use crate::service::communication::RpcClient;
use crate::service::game_service::{GameRules, NumberDraw};
use crate::storage::Repository;

pub struct MatchConductor {
    client: Arc<RpcClient>,
    repo: Arc<Repository>,
    rules: Arc<dyn GameRules>,
    draw: Arc<dyn NumberDraw>,
    scoring: ScoringConfig,
    referee_id: String,
    lm_endpoint: String,
}

/// Why a player picked up a technical loss, for the GAME_OVER consequence
/// line.
#[derive(Debug, Clone)]
struct Offence {
    code: ErrorCode,
    rule: &'static str,
}

impl MatchConductor {
    pub fn new(
        client: Arc<RpcClient>,
        repo: Arc<Repository>,
        rules: Arc<dyn GameRules>,
        draw: Arc<dyn NumberDraw>,
        scoring: ScoringConfig,
        referee_id: impl Into<String>,
        lm_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            client,
            repo,
            rules,
            draw,
            scoring,
            referee_id: referee_id.into(),
            lm_endpoint: lm_endpoint.into(),
        }
    }

    /// Run one match to a terminal state. The returned record has been
    /// persisted; whether the result reached the league manager is visible
    /// in its state (FINISHED vs REPORTED plus an outbox entry).
    pub async fn conduct(&self, assignment: StartMatchParams) -> Result<MatchRecord, LeagueError> {
        if assignment.players.len() != 2 {
            return Err(LeagueError::Validation(format!(
                "match {} needs exactly 2 players",
                assignment.match_id
            )));
        }
        let conversation_id = Uuid::new_v4().to_string();
        let player_a = assignment.players[0].clone();
        let player_b = assignment.players[1].clone();
        let mut record = MatchRecord::new(
            &assignment.match_id,
            assignment.round_id,
            &assignment.league_id,
            &assignment.game_type,
            &player_a.player_id,
            &player_b.player_id,
            &self.referee_id,
            &conversation_id,
        );
        // Persist before the first outbound call so a crash mid-match
        // leaves evidence for restart recovery.
        self.repo.save_match_record(&record).await?;
        let mut offences: [Option<Offence>; 2] = [None, None];

        // Step 1/2: invite both players in parallel; the join ack is the
        // invitation's RPC response.
        record.state = MatchState::Invited;
        let (join_a, join_b) = tokio::join!(
            self.invite(&assignment, &conversation_id, 0),
            self.invite(&assignment, &conversation_id, 1),
        );
        let joins = [join_a, join_b];
        for (i, join) in joins.iter().enumerate() {
            let player = &assignment.players[i].player_id;
            match join {
                Ok(_) => record.log("out", messages::GAME_INVITATION, player, Some("joined".into())),
                Err(e) => {
                    warn!(
                        match_id = %record.match_id,
                        conversation_id = %conversation_id,
                        player = %player,
                        error_code = %e.code(),
                        "player failed to join"
                    );
                    record.log(
                        "out",
                        messages::GAME_INVITATION,
                        player,
                        Some(format!("join failed: {}", e.code())),
                    );
                    offences[i] = Some(Offence {
                        code: ErrorCode::E001,
                        rule: "join deadline missed",
                    });
                }
            }
        }

        let joined = [joins[0].is_ok(), joins[1].is_ok()];
        let mut choices: [Option<Parity>; 2] = [None, None];

        if joined == [false, false] {
            // Nobody showed up; there is no game to decide.
            record.state = MatchState::Failed;
        } else if joined == [true, true] {
            record.state = MatchState::Joined;
            // Step 3/4: one 30s window each, no transport retries.
            record.state = MatchState::Choosing;
            let (choice_a, choice_b) = tokio::join!(
                self.request_choice(&assignment, &conversation_id, 0),
                self.request_choice(&assignment, &conversation_id, 1),
            );
            for (i, choice) in [choice_a, choice_b].into_iter().enumerate() {
                let player = assignment.players[i].player_id.clone();
                match choice {
                    Ok(parity) => {
                        choices[i] = Some(parity);
                        record.choices.insert(player, parity);
                    }
                    Err(offence) => {
                        warn!(
                            match_id = %record.match_id,
                            conversation_id = %conversation_id,
                            player = %player,
                            error_code = %offence.code,
                            "technical loss: {}",
                            offence.rule
                        );
                        offences[i] = Some(offence);
                    }
                }
            }
            record.state = MatchState::Decided;
        } else {
            // One join failure: skip the choosing phase, the survivor wins
            // by forfeit.
            record.state = MatchState::Decided;
        }

        let outcome = self.decide(&record, joined, choices);
        record.outcome = Some(outcome.clone());

        // Step 6: GAME_OVER to both players, best-effort and non-blocking
        // for finalization; then the report that must reach the LM.
        if record.state != MatchState::Failed {
            record.state = MatchState::Reported;
        }
        let (over_a, over_b) = tokio::join!(
            self.send_game_over(&assignment, &conversation_id, 0, &outcome, &offences[0]),
            self.send_game_over(&assignment, &conversation_id, 1, &outcome, &offences[1]),
        );
        for (i, sent) in [over_a, over_b].into_iter().enumerate() {
            let detail = if sent { "delivered" } else { "undeliverable" };
            record.log(
                "out",
                messages::GAME_OVER,
                &assignment.players[i].player_id,
                Some(detail.into()),
            );
        }

        let report = MatchResultReportParams {
            match_id: record.match_id.clone(),
            round_id: record.round_id,
            league_id: record.league_id.clone(),
            state: if record.state == MatchState::Failed {
                MatchState::Failed
            } else {
                MatchState::Finished
            },
            outcome,
        };
        match self
            .client
            .call(
                &self.lm_endpoint,
                messages::MATCH_RESULT_REPORT,
                &conversation_id,
                serde_json::to_value(&report)?,
            )
            .await
        {
            Ok(_) => {
                if record.state != MatchState::Failed {
                    record.state = MatchState::Finished;
                }
                record.finished_at = Some(chrono::Utc::now());
                record.log("out", messages::MATCH_RESULT_REPORT, "league_manager", None);
                self.repo.remove_outbox_entry(&record.match_id).await?;
                info!(
                    match_id = %record.match_id,
                    conversation_id = %conversation_id,
                    winner = %record.outcome.as_ref().map(|o| o.winner_player_id.as_str()).unwrap_or("-"),
                    "match finished"
                );
            }
            Err(e) => {
                warn!(
                    match_id = %record.match_id,
                    conversation_id = %conversation_id,
                    error_code = %e.code(),
                    "league manager unreachable, parking report in outbox"
                );
                record.log(
                    "out",
                    messages::MATCH_RESULT_REPORT,
                    "league_manager",
                    Some(format!("undelivered: {}", e.code())),
                );
                self.repo.save_outbox_entry(&report).await?;
            }
        }

        self.repo.save_match_record(&record).await?;
        Ok(record)
    }

    async fn invite(
        &self,
        assignment: &StartMatchParams,
        conversation_id: &str,
        index: usize,
    ) -> Result<GameJoinAck, LeagueError> {
        let me = &assignment.players[index];
        let opponent = &assignment.players[1 - index];
        let invitation = GameInvitationParams {
            match_id: assignment.match_id.clone(),
            league_id: assignment.league_id.clone(),
            round_id: assignment.round_id,
            game_type: assignment.game_type.clone(),
            role_in_match: if index == 0 { "player_a" } else { "player_b" }.to_string(),
            opponent_id: opponent.player_id.clone(),
            opponent_endpoint: opponent.endpoint.clone(),
        };
        let result = self
            .client
            .call(
                &me.endpoint,
                messages::GAME_INVITATION,
                conversation_id,
                serde_json::to_value(&invitation)?,
            )
            .await?;
        let ack: GameJoinAck = serde_json::from_value(result)
            .map_err(|e| LeagueError::Validation(format!("malformed join ack: {e}")))?;
        if ack.match_id != assignment.match_id {
            return Err(LeagueError::ConversationMismatch(format!(
                "join ack for {} inside match {}",
                ack.match_id, assignment.match_id
            )));
        }
        Ok(ack)
    }

    async fn request_choice(
        &self,
        assignment: &StartMatchParams,
        conversation_id: &str,
        index: usize,
    ) -> Result<Parity, Offence> {
        let me = &assignment.players[index];
        let call = ChooseParityCallParams {
            match_id: assignment.match_id.clone(),
            league_id: assignment.league_id.clone(),
            round_id: assignment.round_id,
        };
        let body = match serde_json::to_value(&call) {
            Ok(body) => body,
            Err(_) => {
                return Err(Offence {
                    code: ErrorCode::E002,
                    rule: "internal encoding failure",
                })
            }
        };
        let result = self
            .client
            .call(
                &me.endpoint,
                messages::CHOOSE_PARITY_CALL,
                conversation_id,
                body,
            )
            .await;
        let value = match result {
            Ok(value) => value,
            Err(e) => {
                return Err(Offence {
                    code: e.code(),
                    rule: "choice deadline missed",
                })
            }
        };
        let response: ChooseParityResponse = match serde_json::from_value(value) {
            Ok(response) => response,
            Err(_) => {
                return Err(Offence {
                    code: ErrorCode::E010,
                    rule: "malformed choice response",
                })
            }
        };
        match Parity::parse(&response.parity_choice) {
            Some(parity) => Ok(parity),
            None => Err(Offence {
                code: ErrorCode::E010,
                rule: "parity_choice must be \"even\" or \"odd\"",
            }),
        }
    }

    fn decide(
        &self,
        record: &MatchRecord,
        joined: [bool; 2],
        choices: [Option<Parity>; 2],
    ) -> MatchOutcome {
        let players = [record.player_a_id.clone(), record.player_b_id.clone()];
        let (winner, statuses, drawn_number, number_parity) = match joined {
            [false, false] => (
                None,
                [PlayerStatus::TechnicalLoss, PlayerStatus::TechnicalLoss],
                None,
                None,
            ),
            [true, false] => (Some(0), [PlayerStatus::Win, PlayerStatus::TechnicalLoss], None, None),
            [false, true] => (Some(1), [PlayerStatus::TechnicalLoss, PlayerStatus::Win], None, None),
            [true, true] => {
                let decision =
                    self.rules
                        .determine_outcome(choices[0], choices[1], self.draw.as_ref());
                (
                    decision.winner,
                    decision.statuses,
                    decision.drawn_number,
                    decision.number_parity,
                )
            }
        };
        let mut outcome = MatchOutcome {
            winner_player_id: winner
                .map(|i| players[i].clone())
                .unwrap_or_else(|| OUTCOME_DRAW.to_string()),
            statuses: players
                .iter()
                .cloned()
                .zip(statuses.iter().copied())
                .collect(),
            drawn_number,
            number_parity,
            points_awarded: Default::default(),
        };
        outcome.award_points(&self.scoring);
        outcome
    }

    async fn send_game_over(
        &self,
        assignment: &StartMatchParams,
        conversation_id: &str,
        index: usize,
        outcome: &MatchOutcome,
        offence: &Option<Offence>,
    ) -> bool {
        let me = &assignment.players[index];
        let params = GameOverParams {
            match_id: assignment.match_id.clone(),
            league_id: assignment.league_id.clone(),
            outcome: outcome.clone(),
            consequence: offence
                .as_ref()
                .map(|o| format!("technical loss: {} ({})", o.rule, o.code)),
        };
        let body = match serde_json::to_value(&params) {
            Ok(body) => body,
            Err(_) => return false,
        };
        self.client
            .call(&me.endpoint, messages::GAME_OVER, conversation_id, body)
            .await
            .is_ok()
    }
}

/// Restart recovery: declare any match left non-terminal for longer than
/// `grace` FAILED with technical losses on both sides, and park its report
/// in the outbox for the resend loop. Returns how many matches were
/// failed.
pub async fn fail_stale_matches(
    repo: &Repository,
    scoring: &ScoringConfig,
    grace: std::time::Duration,
) -> Result<usize, LeagueError> {
    let grace = chrono::Duration::from_std(grace)
        .map_err(|e| LeagueError::Validation(format!("grace out of range: {e}")))?;
    let cutoff = chrono::Utc::now() - grace;
    let mut failed = 0;
    for mut record in repo.list_match_records().await? {
        if matches!(record.state, MatchState::Finished | MatchState::Failed) {
            continue;
        }
        if record.started_at > cutoff {
            continue;
        }
        warn!(
            match_id = %record.match_id,
            state = ?record.state,
            "declaring stale match failed after restart"
        );
        let mut outcome = MatchOutcome {
            winner_player_id: OUTCOME_DRAW.to_string(),
            statuses: [
                (record.player_a_id.clone(), PlayerStatus::TechnicalLoss),
                (record.player_b_id.clone(), PlayerStatus::TechnicalLoss),
            ]
            .into_iter()
            .collect(),
            drawn_number: None,
            number_parity: None,
            points_awarded: Default::default(),
        };
        outcome.award_points(scoring);
        record.state = MatchState::Failed;
        record.finished_at = Some(chrono::Utc::now());
        record.outcome = Some(outcome.clone());
        repo.save_outbox_entry(&MatchResultReportParams {
            match_id: record.match_id.clone(),
            round_id: record.round_id,
            league_id: record.league_id.clone(),
            state: MatchState::Failed,
            outcome,
        })
        .await?;
        repo.save_match_record(&record).await?;
        failed += 1;
    }
    Ok(failed)
}

/// Resend loop for reports that could not reach the league manager. Sweeps
/// the outbox forever, backing off while deliveries keep failing and
/// resetting on progress.
pub async fn flush_outbox(
    client: Arc<RpcClient>,
    repo: Arc<Repository>,
    lm_endpoint: String,
    base_interval: std::time::Duration,
) {
    let max_interval = base_interval * 16;
    let mut interval = base_interval;
    loop {
        let pending = match repo.list_outbox().await {
            Ok(pending) => pending,
            Err(e) => {
                warn!("outbox scan failed: {e}");
                tokio::time::sleep(interval).await;
                continue;
            }
        };
        if pending.is_empty() {
            interval = base_interval;
            tokio::time::sleep(base_interval).await;
            continue;
        }
        let mut delivered_any = false;
        for report in pending {
            let conversation_id = Uuid::new_v4().to_string();
            let body = match serde_json::to_value(&report) {
                Ok(body) => body,
                Err(e) => {
                    warn!(match_id = %report.match_id, "unreadable outbox entry: {e}");
                    continue;
                }
            };
            match client
                .call(
                    &lm_endpoint,
                    messages::MATCH_RESULT_REPORT,
                    &conversation_id,
                    body,
                )
                .await
            {
                Ok(_) => {
                    info!(match_id = %report.match_id, "parked report delivered");
                    delivered_any = true;
                    if let Err(e) = repo.remove_outbox_entry(&report.match_id).await {
                        warn!(match_id = %report.match_id, "failed to clear outbox entry: {e}");
                    }
                }
                Err(e) => {
                    warn!(
                        match_id = %report.match_id,
                        error_code = %e.code(),
                        "parked report still undeliverable"
                    );
                }
            }
        }
        interval = if delivered_any {
            base_interval
        } else {
            (interval * 2).min(max_interval)
        };
        tokio::time::sleep(interval).await;
    }
}
