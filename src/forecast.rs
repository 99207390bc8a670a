use std::collections::HashSet;
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{info, warn};
use serde::Serialize;

use crate::aggregate::{
    Aggregate, TeamPrediction, TrialAggregator, TrialBudget, default_parallelism,
};
use crate::error::{ForecastError, Result};
use crate::fixtures::{CompetitionId, CompetitionSnapshot, FixtureFeed};
use crate::params::ModelParams;
use crate::rating::{Ratings, TeamRating, compute_ratings};
use crate::sampler::MatchOutcomeSampler;
use crate::season::SeasonSimulator;
use crate::standings::Standings;
use crate::store::{NewSimulationRun, ResultStore, SimulationRun};

#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub competition_id: CompetitionId,
    pub trial_count: u32,
    // Drawn from the clock when absent; the seed used is always reported and stored.
    pub seed: Option<u64>,
    pub timeout: Option<Duration>,
    pub threads: Option<usize>,
    pub budget: Option<TrialBudget>,
}

impl RunRequest {
    pub fn new(competition_id: CompetitionId, trial_count: u32) -> Self {
        Self {
            competition_id,
            trial_count,
            ..Self::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Explicit budget (e.g. with a cancel flag); takes precedence over `timeout`.
    pub fn with_budget(mut self, budget: TrialBudget) -> Self {
        self.budget = Some(budget);
        self
    }

    fn budget(&self) -> TrialBudget {
        match (&self.budget, self.timeout) {
            (Some(budget), _) => budget.clone(),
            (None, Some(timeout)) => TrialBudget::with_timeout(timeout),
            (None, None) => TrialBudget::unbounded(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub simulation_id: i64,
    pub competition_id: CompetitionId,
    pub duration: Duration,
    pub seed: u64,
    pub trial_count: u32,
    pub params_version: String,
    pub ratings: Vec<TeamRating>,
    pub predictions: Vec<TeamPrediction>,
}

/// Result of one in-memory forecast, before it is persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Forecast {
    pub ratings: Ratings,
    pub aggregate: Aggregate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LatestSimulation {
    Ready(SimulationRun),
    NoSimulationYet,
}

/// Rates the teams and runs `trial_count` seasons. Persists nothing.
pub fn simulate_competition(
    snapshot: &CompetitionSnapshot,
    params: &ModelParams,
    trial_count: u32,
    seed: u64,
    threads: usize,
    budget: &TrialBudget,
) -> Result<Forecast> {
    validate_snapshot(snapshot)?;
    params.validate()?;

    let base = Standings::from_snapshot(snapshot)?;
    let ratings = compute_ratings(snapshot, &params.rating)?;
    let remaining = snapshot.remaining();
    let simulator = SeasonSimulator::new(
        &base,
        &remaining,
        &ratings,
        MatchOutcomeSampler::new(&params.sampler),
    );
    let aggregate = TrialAggregator::new(simulator, threads).run(trial_count, seed, budget)?;
    Ok(Forecast { ratings, aggregate })
}

/// Loads, simulates and stores one run as the competition's latest.
///
/// Nothing is written unless every trial succeeded.
pub fn run_simulation(
    feed: &dyn FixtureFeed,
    store: &mut ResultStore,
    params: &ModelParams,
    req: &RunRequest,
) -> Result<RunReport> {
    let started = Instant::now();
    let snapshot = feed
        .load_competition(req.competition_id)?
        .ok_or(ForecastError::CompetitionNotFound(req.competition_id))?;
    if snapshot.teams.is_empty() {
        return Err(ForecastError::NoTeams(req.competition_id));
    }

    let seed = req.seed.unwrap_or_else(clock_seed);
    let threads = req.threads.unwrap_or_else(default_parallelism);
    let params_version = params.version();
    info!(
        "simulating competition {} ({}): {} trials, seed {seed}, params {params_version}",
        snapshot.competition_id, snapshot.name, req.trial_count
    );

    let forecast = match simulate_competition(
        &snapshot,
        params,
        req.trial_count,
        seed,
        threads,
        &req.budget(),
    ) {
        Ok(forecast) => forecast,
        Err(err) => {
            warn!(
                "competition {} run aborted, nothing stored: {err}",
                snapshot.competition_id
            );
            return Err(err);
        }
    };

    let duration = started.elapsed();
    let ratings: Vec<TeamRating> = forecast.ratings.into_values().collect();
    let predictions = forecast.aggregate.predictions;
    let simulation_id = store.save(&NewSimulationRun {
        competition_id: snapshot.competition_id,
        created_at: Utc::now().to_rfc3339(),
        trial_count: req.trial_count,
        seed,
        params_version: params_version.clone(),
        params: *params,
        ratings: ratings.clone(),
        predictions: predictions.clone(),
        duration_ms: duration.as_millis() as u64,
    })?;

    info!(
        "competition {} simulation {simulation_id} done in {} ms",
        snapshot.competition_id,
        duration.as_millis()
    );
    Ok(RunReport {
        simulation_id,
        competition_id: snapshot.competition_id,
        duration,
        seed,
        trial_count: req.trial_count,
        params_version,
        ratings,
        predictions,
    })
}

pub fn get_latest(store: &ResultStore, competition_id: CompetitionId) -> Result<LatestSimulation> {
    Ok(match store.get_latest(competition_id)? {
        Some(run) => LatestSimulation::Ready(run),
        None => LatestSimulation::NoSimulationYet,
    })
}

fn validate_snapshot(snapshot: &CompetitionSnapshot) -> Result<()> {
    if snapshot.teams.is_empty() {
        return Err(ForecastError::NoTeams(snapshot.competition_id));
    }
    let mut seen = HashSet::new();
    for team in &snapshot.teams {
        if !seen.insert(team.id) {
            return Err(ForecastError::InvalidRequest(format!(
                "team {} is listed twice",
                team.id
            )));
        }
    }
    snapshot.rules.validate(snapshot.teams.len())?;

    let mut fixture_ids = HashSet::new();
    for f in &snapshot.fixtures {
        if !fixture_ids.insert(f.id) {
            return Err(ForecastError::malformed(f.id, "duplicate fixture id"));
        }
        if f.home_id == f.away_id {
            return Err(ForecastError::malformed(
                f.id,
                format!("team {} is listed against itself", f.home_id),
            ));
        }
        for team_id in [f.home_id, f.away_id] {
            if !seen.contains(&team_id) {
                return Err(ForecastError::malformed(
                    f.id,
                    format!("team {team_id} is not in the competition"),
                ));
            }
        }
        if f.is_finished() {
            f.final_score()?;
        }
    }
    Ok(())
}

fn clock_seed() -> u64 {
    Utc::now().timestamp_micros() as u64
}
