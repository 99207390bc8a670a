use rand::Rng;

use crate::error::{ForecastError, Result};
use crate::fixtures::{Fixture, TeamId};
use crate::rating::Ratings;
use crate::sampler::MatchOutcomeSampler;
use crate::standings::{FinalTable, Standings};

/// Replays the unplayed part of a season once.
#[derive(Debug, Clone, Copy)]
pub struct SeasonSimulator<'a> {
    base: &'a Standings,
    remaining: &'a [Fixture],
    ratings: &'a Ratings,
    sampler: MatchOutcomeSampler<'a>,
}

impl<'a> SeasonSimulator<'a> {
    pub fn new(
        base: &'a Standings,
        remaining: &'a [Fixture],
        ratings: &'a Ratings,
        sampler: MatchOutcomeSampler<'a>,
    ) -> Self {
        Self {
            base,
            remaining,
            ratings,
            sampler,
        }
    }

    pub fn base(&self) -> &Standings {
        self.base
    }

    pub fn remaining(&self) -> &[Fixture] {
        self.remaining
    }

    /// One trial. Works on a private copy of the base standings, so the same simulator can be
    /// shared by any number of workers, each with its own RNG.
    pub fn simulate<R: Rng>(&self, rng: &mut R) -> Result<FinalTable> {
        let mut table = self.base.clone();
        for fixture in self.remaining {
            let home = self.rating_of(fixture, fixture.home_id)?;
            let away = self.rating_of(fixture, fixture.away_id)?;
            let result = self.sampler.sample(home, away, rng);
            table.apply(fixture, result.home_goals, result.away_goals)?;
        }
        Ok(table.into_table())
    }

    fn rating_of(&self, fixture: &Fixture, team_id: TeamId) -> Result<f64> {
        self.ratings
            .get(&team_id)
            .map(|r| r.rating)
            .ok_or_else(|| {
                ForecastError::malformed(fixture.id, format!("no rating for team {team_id}"))
            })
    }
}
