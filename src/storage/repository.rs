//! File-backed repository. Every write goes through the temp-file +
//! atomic-rename idiom so readers never observe partial JSON.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::LeagueError;
use crate::models::{MatchRecord, PlayerHistory, PlayerHistoryEntry, RoundsFile, Standings};
use crate::protocol::messages::MatchResultReportParams;

#[derive(Debug, Clone)]
pub struct Repository {
    base: PathBuf,
}

impl Repository {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn standings_path(&self, league_id: &str) -> PathBuf {
        self.base.join("leagues").join(league_id).join("standings.json")
    }

    fn rounds_path(&self, league_id: &str) -> PathBuf {
        self.base.join("leagues").join(league_id).join("rounds.json")
    }

    fn match_path(&self, match_id: &str) -> PathBuf {
        self.base.join("matches").join(format!("{match_id}.json"))
    }

    fn history_path(&self, player_id: &str) -> PathBuf {
        self.base.join("players").join(player_id).join("history.json")
    }

    fn outbox_path(&self, match_id: &str) -> PathBuf {
        self.base.join("outbox").join(format!("{match_id}.json"))
    }

    /// Absent file reads as empty standings.
    pub async fn load_standings(&self, league_id: &str) -> Result<Standings, LeagueError> {
        match self.read_json(&self.standings_path(league_id)).await? {
            Some(standings) => Ok(standings),
            None => Ok(Standings::empty(league_id)),
        }
    }

    pub async fn save_standings(&self, standings: &Standings) -> Result<(), LeagueError> {
        self.write_atomic(&self.standings_path(&standings.league_id), standings)
            .await
    }

    pub async fn load_rounds(&self, league_id: &str) -> Result<Option<RoundsFile>, LeagueError> {
        self.read_json(&self.rounds_path(league_id)).await
    }

    pub async fn save_rounds(&self, rounds: &RoundsFile) -> Result<(), LeagueError> {
        self.write_atomic(&self.rounds_path(&rounds.league_id), rounds)
            .await
    }

    pub async fn save_match_record(&self, record: &MatchRecord) -> Result<(), LeagueError> {
        self.write_atomic(&self.match_path(&record.match_id), record)
            .await
    }

    pub async fn load_match_record(
        &self,
        match_id: &str,
    ) -> Result<Option<MatchRecord>, LeagueError> {
        self.read_json(&self.match_path(match_id)).await
    }

    pub async fn list_match_records(&self) -> Result<Vec<MatchRecord>, LeagueError> {
        let dir = self.base.join("matches");
        let mut records = Vec::new();
        let mut read_dir = match fs::read_dir(&dir).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = read_dir.next_entry().await? {
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(record) = self.read_json(&entry.path()).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    pub async fn load_player_history(&self, player_id: &str) -> Result<PlayerHistory, LeagueError> {
        match self.read_json(&self.history_path(player_id)).await? {
            Some(history) => Ok(history),
            None => Ok(PlayerHistory::empty(player_id)),
        }
    }

    pub async fn append_player_history(
        &self,
        player_id: &str,
        entry: PlayerHistoryEntry,
    ) -> Result<(), LeagueError> {
        let mut history = self.load_player_history(player_id).await?;
        history.append(entry);
        self.write_atomic(&self.history_path(player_id), &history)
            .await
    }

    /// Park an undeliverable result report for the resend loop.
    pub async fn save_outbox_entry(
        &self,
        report: &MatchResultReportParams,
    ) -> Result<(), LeagueError> {
        self.write_atomic(&self.outbox_path(&report.match_id), report)
            .await
    }

    pub async fn list_outbox(&self) -> Result<Vec<MatchResultReportParams>, LeagueError> {
        let dir = self.base.join("outbox");
        let mut entries = Vec::new();
        let mut read_dir = match fs::read_dir(&dir).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = read_dir.next_entry().await? {
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(report) = self.read_json(&entry.path()).await? {
                entries.push(report);
            }
        }
        Ok(entries)
    }

    pub async fn remove_outbox_entry(&self, match_id: &str) -> Result<(), LeagueError> {
        match fs::remove_file(self.outbox_path(match_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, LeagueError> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_atomic<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), LeagueError> {
        let parent = path
            .parent()
            .ok_or_else(|| LeagueError::ResourceExhausted("path has no parent".into()))?;
        fs::create_dir_all(parent).await?;
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(value)?;
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MatchOutcome, Parity, PlayerStatus};
    use std::collections::HashMap;

    fn repo() -> (tempfile::TempDir, Repository) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::new(dir.path());
        (dir, repo)
    }

    #[tokio::test]
    async fn absent_standings_read_as_empty() {
        let (_dir, repo) = repo();
        let standings = repo.load_standings("L1").await.unwrap();
        assert!(standings.rows.is_empty());
        assert_eq!(standings.league_id, "L1");
    }

    #[tokio::test]
    async fn standings_round_trip() {
        let (_dir, repo) = repo();
        let mut standings = Standings::empty("L1");
        standings.apply(&MatchOutcome {
            winner_player_id: "P01".into(),
            statuses: HashMap::from([
                ("P01".to_string(), PlayerStatus::Win),
                ("P02".to_string(), PlayerStatus::Loss),
            ]),
            drawn_number: Some(4),
            number_parity: Some(Parity::Even),
            points_awarded: HashMap::from([("P01".to_string(), 3), ("P02".to_string(), 0)]),
        });
        repo.save_standings(&standings).await.unwrap();
        let loaded = repo.load_standings("L1").await.unwrap();
        assert_eq!(loaded.rows["P01"].points, 3);
        assert_eq!(loaded.rows["P02"].losses, 1);
    }

    #[tokio::test]
    async fn no_temp_residue_after_write() {
        let (dir, repo) = repo();
        repo.save_standings(&Standings::empty("L1")).await.unwrap();
        let league_dir = dir.path().join("leagues").join("L1");
        let names: Vec<String> = std::fs::read_dir(&league_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["standings.json"]);
    }

    #[tokio::test]
    async fn outbox_survives_listing_and_removal() {
        let (_dir, repo) = repo();
        let report = MatchResultReportParams {
            match_id: "R1M1".into(),
            round_id: 1,
            league_id: "L1".into(),
            state: crate::models::MatchState::Finished,
            outcome: MatchOutcome {
                winner_player_id: "P01".into(),
                statuses: HashMap::new(),
                drawn_number: None,
                number_parity: None,
                points_awarded: HashMap::new(),
            },
        };
        repo.save_outbox_entry(&report).await.unwrap();
        let listed = repo.list_outbox().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].match_id, "R1M1");
        repo.remove_outbox_entry("R1M1").await.unwrap();
        assert!(repo.list_outbox().await.unwrap().is_empty());
        // Removing twice is harmless.
        repo.remove_outbox_entry("R1M1").await.unwrap();
    }
}
