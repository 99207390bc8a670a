use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, Result};
use crate::fixtures::{CompetitionRules, CompetitionSnapshot, Fixture, TeamId};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamSeasonState {
    pub team_id: TeamId,
    pub points: i32,
    pub played: u32,
    pub won: u32,
    pub drawn: u32,
    pub lost: u32,
    pub goals_for: u32,
    pub goals_against: u32,
}

impl TeamSeasonState {
    pub fn new(team_id: TeamId, points_adjustment: i32) -> Self {
        Self {
            team_id,
            points: points_adjustment,
            ..Self::default()
        }
    }

    pub fn goal_difference(&self) -> i32 {
        self.goals_for as i32 - self.goals_against as i32
    }

    fn record(&mut self, scored: u8, conceded: u8, rules: &CompetitionRules) {
        self.played += 1;
        self.goals_for += scored as u32;
        self.goals_against += conceded as u32;
        match scored.cmp(&conceded) {
            Ordering::Greater => {
                self.won += 1;
                self.points += rules.points_for_win as i32;
            }
            Ordering::Equal => {
                self.drawn += 1;
                self.points += rules.points_for_draw as i32;
            }
            Ordering::Less => self.lost += 1,
        }
    }
}

/// League order: points, goal difference, goals scored, then the lower team id.
pub fn table_order(a: &TeamSeasonState, b: &TeamSeasonState) -> Ordering {
    b.points
        .cmp(&a.points)
        .then_with(|| b.goal_difference().cmp(&a.goal_difference()))
        .then_with(|| b.goals_for.cmp(&a.goals_for))
        .then_with(|| a.team_id.cmp(&b.team_id))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Standings {
    rules: CompetitionRules,
    teams: BTreeMap<TeamId, TeamSeasonState>,
}

impl Standings {
    pub fn empty(team_ids: impl IntoIterator<Item = (TeamId, i32)>, rules: CompetitionRules) -> Self {
        let teams = team_ids
            .into_iter()
            .map(|(id, adj)| (id, TeamSeasonState::new(id, adj)))
            .collect();
        Self { rules, teams }
    }

    /// Current table after replaying every finished fixture of the snapshot.
    pub fn from_snapshot(snapshot: &CompetitionSnapshot) -> Result<Self> {
        let mut standings = Self::empty(
            snapshot.teams.iter().map(|t| (t.id, t.points_adjustment)),
            snapshot.rules,
        );
        for fixture in snapshot.finished() {
            let (h, a) = fixture.final_score()?;
            standings.apply(fixture, h, a)?;
        }
        Ok(standings)
    }

    pub fn apply(&mut self, fixture: &Fixture, home_goals: u8, away_goals: u8) -> Result<()> {
        if fixture.home_id == fixture.away_id {
            return Err(ForecastError::malformed(
                fixture.id,
                format!("team {} is listed against itself", fixture.home_id),
            ));
        }
        self.check_team(fixture, fixture.away_id)?;
        let rules = self.rules;
        let home = self.team_mut(fixture, fixture.home_id)?;
        home.record(home_goals, away_goals, &rules);
        let away = self.team_mut(fixture, fixture.away_id)?;
        away.record(away_goals, home_goals, &rules);
        Ok(())
    }

    fn check_team(&self, fixture: &Fixture, team_id: TeamId) -> Result<()> {
        if self.teams.contains_key(&team_id) {
            Ok(())
        } else {
            Err(unknown_team(fixture, team_id))
        }
    }

    fn team_mut(&mut self, fixture: &Fixture, team_id: TeamId) -> Result<&mut TeamSeasonState> {
        self.teams
            .get_mut(&team_id)
            .ok_or_else(|| unknown_team(fixture, team_id))
    }

    pub fn rules(&self) -> &CompetitionRules {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.teams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.teams.is_empty()
    }

    pub fn team_ids(&self) -> Vec<TeamId> {
        self.teams.keys().copied().collect()
    }

    pub fn get(&self, team_id: TeamId) -> Option<&TeamSeasonState> {
        self.teams.get(&team_id)
    }

    pub fn into_table(self) -> FinalTable {
        let mut rows: Vec<TeamSeasonState> = self.teams.into_values().collect();
        rows.sort_by(table_order);
        FinalTable { rows }
    }

    pub fn table(&self) -> FinalTable {
        self.clone().into_table()
    }
}

fn unknown_team(fixture: &Fixture, team_id: TeamId) -> ForecastError {
    ForecastError::malformed(
        fixture.id,
        format!("team {team_id} is not part of the competition"),
    )
}

/// One trial's end state for one team.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialOutcome {
    pub team_id: TeamId,
    pub final_points: i32,
    pub final_goal_difference: i32,
    pub final_rank: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalTable {
    rows: Vec<TeamSeasonState>,
}

impl FinalTable {
    pub fn rows(&self) -> &[TeamSeasonState] {
        &self.rows
    }

    pub fn rank_of(&self, team_id: TeamId) -> Option<usize> {
        self.rows
            .iter()
            .position(|r| r.team_id == team_id)
            .map(|idx| idx + 1)
    }

    pub fn outcomes(&self) -> impl Iterator<Item = TrialOutcome> + '_ {
        self.rows.iter().enumerate().map(|(idx, row)| TrialOutcome {
            team_id: row.team_id,
            final_points: row.points,
            final_goal_difference: row.goal_difference(),
            final_rank: idx + 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> CompetitionRules {
        CompetitionRules {
            relegation_slots: 1,
            qualification_slots: 1,
            ..CompetitionRules::default()
        }
    }

    #[test]
    fn goal_difference_is_derived() {
        let mut s = Standings::empty([(1, 0), (2, 0)], rules());
        s.apply(&Fixture::finished(1, 1, 2, 3, 1), 3, 1).unwrap();
        let a = s.get(1).unwrap();
        assert_eq!(a.goal_difference(), 2);
        assert_eq!(a.points, 3);
        assert_eq!(s.get(2).unwrap().goal_difference(), -2);
        assert_eq!(s.get(2).unwrap().lost, 1);
    }

    #[test]
    fn tiebreak_order_is_points_gd_goals_then_id() {
        let mk = |id, points, gf, ga| TeamSeasonState {
            team_id: id,
            points,
            goals_for: gf,
            goals_against: ga,
            ..TeamSeasonState::default()
        };
        let mut rows = vec![
            mk(4, 10, 5, 5),
            mk(3, 10, 8, 8),
            mk(2, 10, 9, 4),
            mk(1, 10, 8, 8),
            mk(5, 12, 0, 9),
        ];
        rows.sort_by(table_order);
        let ids: Vec<u32> = rows.iter().map(|r| r.team_id).collect();
        assert_eq!(ids, vec![5, 2, 1, 3, 4]);
    }

    #[test]
    fn points_adjustment_counts_in_table() {
        let s = Standings::empty([(1, -6), (2, 0)], rules());
        let table = s.table();
        assert_eq!(table.rank_of(2), Some(1));
        assert_eq!(table.rows()[1].points, -6);
    }

    #[test]
    fn unknown_team_and_self_match_are_rejected() {
        let mut s = Standings::empty([(1, 0), (2, 0)], rules());
        let err = s.apply(&Fixture::finished(8, 1, 9, 1, 0), 1, 0).unwrap_err();
        assert!(matches!(err, ForecastError::MalformedFixture { fixture_id: 8, .. }));
        // Nothing was half-applied.
        assert_eq!(s.get(1).unwrap().played, 0);
        assert!(s.apply(&Fixture::finished(9, 2, 2, 1, 1), 1, 1).is_err());
    }
}
