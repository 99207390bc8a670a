use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, Result};

pub type TeamId = u32;
pub type CompetitionId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureStatus {
    Finished,
    Scheduled,
}

impl FixtureStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FixtureStatus::Finished => "finished",
            FixtureStatus::Scheduled => "scheduled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "finished" | "ft" => Some(FixtureStatus::Finished),
            "scheduled" | "ns" => Some(FixtureStatus::Scheduled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fixture {
    pub id: u64,
    #[serde(default)]
    pub kickoff: String,
    pub home_id: TeamId,
    pub away_id: TeamId,
    pub status: FixtureStatus,
    #[serde(default)]
    pub home_goals: Option<u8>,
    #[serde(default)]
    pub away_goals: Option<u8>,
}

impl Fixture {
    pub fn scheduled(id: u64, home_id: TeamId, away_id: TeamId) -> Self {
        Self {
            id,
            kickoff: String::new(),
            home_id,
            away_id,
            status: FixtureStatus::Scheduled,
            home_goals: None,
            away_goals: None,
        }
    }

    pub fn finished(id: u64, home_id: TeamId, away_id: TeamId, home: u8, away: u8) -> Self {
        Self {
            id,
            kickoff: String::new(),
            home_id,
            away_id,
            status: FixtureStatus::Finished,
            home_goals: Some(home),
            away_goals: Some(away),
        }
    }

    pub fn with_kickoff(mut self, kickoff: impl Into<String>) -> Self {
        self.kickoff = kickoff.into();
        self
    }

    pub fn is_finished(&self) -> bool {
        self.status == FixtureStatus::Finished
    }

    /// Final score of a finished fixture. A finished fixture without both scores is malformed.
    pub fn final_score(&self) -> Result<(u8, u8)> {
        match (self.home_goals, self.away_goals) {
            (Some(h), Some(a)) => Ok((h, a)),
            _ => Err(ForecastError::malformed(
                self.id,
                "finished fixture is missing its score",
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    #[serde(default)]
    pub name: String,
    // League-imposed deduction (negative) or bonus. Counts in the table, not in the rating.
    #[serde(default)]
    pub points_adjustment: i32,
}

impl Team {
    pub fn new(id: TeamId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            points_adjustment: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompetitionRules {
    #[serde(default = "default_relegation_slots")]
    pub relegation_slots: usize,
    #[serde(default = "default_qualification_slots")]
    pub qualification_slots: usize,
    #[serde(default = "default_points_for_win")]
    pub points_for_win: u32,
    #[serde(default = "default_points_for_draw")]
    pub points_for_draw: u32,
}

fn default_relegation_slots() -> usize {
    3
}

fn default_qualification_slots() -> usize {
    4
}

fn default_points_for_win() -> u32 {
    3
}

fn default_points_for_draw() -> u32 {
    1
}

impl Default for CompetitionRules {
    fn default() -> Self {
        Self {
            relegation_slots: default_relegation_slots(),
            qualification_slots: default_qualification_slots(),
            points_for_win: default_points_for_win(),
            points_for_draw: default_points_for_draw(),
        }
    }
}

impl CompetitionRules {
    pub fn validate(&self, team_count: usize) -> Result<()> {
        if self.relegation_slots >= team_count {
            return Err(ForecastError::InvalidRequest(format!(
                "relegation slots ({}) must be fewer than teams ({team_count})",
                self.relegation_slots
            )));
        }
        if self.qualification_slots > team_count {
            return Err(ForecastError::InvalidRequest(format!(
                "qualification slots ({}) exceed teams ({team_count})",
                self.qualification_slots
            )));
        }
        if self.points_for_win == 0 || self.points_for_draw > self.points_for_win {
            return Err(ForecastError::InvalidRequest(format!(
                "points for win/draw ({}/{}) are inconsistent",
                self.points_for_win, self.points_for_draw
            )));
        }
        Ok(())
    }

    pub fn is_relegated(&self, rank: usize, team_count: usize) -> bool {
        self.relegation_slots > 0 && rank + self.relegation_slots > team_count
    }

    pub fn is_qualified(&self, rank: usize) -> bool {
        rank <= self.qualification_slots
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompetitionSnapshot {
    pub competition_id: CompetitionId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub rules: CompetitionRules,
    #[serde(default)]
    pub teams: Vec<Team>,
    #[serde(default)]
    pub fixtures: Vec<Fixture>,
}

impl CompetitionSnapshot {
    pub fn new(competition_id: CompetitionId, name: impl Into<String>) -> Self {
        Self {
            competition_id,
            name: name.into(),
            rules: CompetitionRules::default(),
            teams: Vec::new(),
            fixtures: Vec::new(),
        }
    }

    pub fn finished(&self) -> impl Iterator<Item = &Fixture> {
        self.fixtures.iter().filter(|f| f.is_finished())
    }

    /// Unplayed fixtures in simulation order: kickoff, then id.
    pub fn remaining(&self) -> Vec<Fixture> {
        let mut out: Vec<Fixture> = self
            .fixtures
            .iter()
            .filter(|f| !f.is_finished())
            .cloned()
            .collect();
        out.sort_by(|a, b| a.kickoff.cmp(&b.kickoff).then(a.id.cmp(&b.id)));
        out
    }

    pub fn team(&self, id: TeamId) -> Option<&Team> {
        self.teams.iter().find(|t| t.id == id)
    }
}

/// Source of per-competition teams and fixtures, finished and upcoming.
pub trait FixtureFeed {
    fn load_competition(
        &self,
        competition_id: CompetitionId,
    ) -> Result<Option<CompetitionSnapshot>>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryFeed {
    competitions: HashMap<CompetitionId, CompetitionSnapshot>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FeedFile {
    Many(Vec<CompetitionSnapshot>),
    One(CompetitionSnapshot),
}

impl InMemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, snapshot: CompetitionSnapshot) {
        self.competitions.insert(snapshot.competition_id, snapshot);
    }

    /// Accepts a single snapshot object or an array of them.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let parsed: FeedFile = serde_json::from_str(raw.trim())?;
        let mut feed = Self::new();
        match parsed {
            FeedFile::Many(items) => items.into_iter().for_each(|s| feed.insert(s)),
            FeedFile::One(item) => feed.insert(item),
        }
        Ok(feed)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn snapshots(&self) -> impl Iterator<Item = &CompetitionSnapshot> {
        self.competitions.values()
    }
}

impl FixtureFeed for InMemoryFeed {
    fn load_competition(
        &self,
        competition_id: CompetitionId,
    ) -> Result<Option<CompetitionSnapshot>> {
        Ok(self.competitions.get(&competition_id).cloned())
    }
}
