use std::env;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};

use log::debug;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, Result};
use crate::fixtures::{CompetitionRules, TeamId};
use crate::season::SeasonSimulator;
use crate::standings::FinalTable;

pub const MAX_TRIALS: u32 = 100_000;
pub const PARALLELISM_ENV: &str = "FORECAST_PARALLELISM";

/// Wall-clock and cancellation limits for one batch of trials.
#[derive(Debug, Clone, Default)]
pub struct TrialBudget {
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    cancel: Option<Arc<AtomicBool>>,
}

impl TrialBudget {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            deadline: Some(Instant::now() + timeout),
            cancel: None,
        }
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn check(&self) -> Result<()> {
        if let Some(flag) = &self.cancel
            && flag.load(AtomicOrdering::Relaxed)
        {
            return Err(ForecastError::Cancelled);
        }
        if let (Some(deadline), Some(timeout)) = (self.deadline, self.timeout)
            && Instant::now() >= deadline
        {
            return Err(ForecastError::TimedOut(timeout));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamPrediction {
    pub team_id: TeamId,
    pub current_points: i32,
    pub title_probability: f64,
    pub qualification_probability: f64,
    pub relegation_probability: f64,
    pub average_position: f64,
    pub average_points: f64,
    // Index 0 is first place; values in percent.
    pub position_distribution: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub trial_count: u32,
    // 1 when the season is already complete and every trial would be identical.
    pub simulated_trials: u32,
    pub predictions: Vec<TeamPrediction>,
}

#[derive(Debug, Clone, Default)]
struct TeamTally {
    champion: u64,
    qualified: u64,
    relegated: u64,
    position_sum: u64,
    points_sum: i64,
    histogram: Vec<u64>,
}

#[derive(Debug, Clone)]
struct Accumulator {
    trials: u64,
    tallies: Vec<TeamTally>,
}

impl Accumulator {
    fn new(team_count: usize) -> Self {
        Self {
            trials: 0,
            tallies: (0..team_count)
                .map(|_| TeamTally {
                    histogram: vec![0; team_count],
                    ..TeamTally::default()
                })
                .collect(),
        }
    }

    fn record(
        &mut self,
        table: &FinalTable,
        team_ids: &[TeamId],
        rules: &CompetitionRules,
        weight: u64,
    ) -> Result<()> {
        let team_count = team_ids.len();
        for outcome in table.outcomes() {
            let idx = team_ids.binary_search(&outcome.team_id).map_err(|_| {
                ForecastError::InvalidRequest(format!(
                    "team {} appeared in a trial table but not in the competition",
                    outcome.team_id
                ))
            })?;
            let tally = &mut self.tallies[idx];
            let rank = outcome.final_rank;
            if rank == 1 {
                tally.champion += weight;
            }
            if rules.is_qualified(rank) {
                tally.qualified += weight;
            }
            if rules.is_relegated(rank, team_count) {
                tally.relegated += weight;
            }
            tally.position_sum += rank as u64 * weight;
            tally.points_sum += outcome.final_points as i64 * weight as i64;
            tally.histogram[rank - 1] += weight;
        }
        self.trials += weight;
        Ok(())
    }

    fn merge(mut self, other: Self) -> Self {
        self.trials += other.trials;
        for (mine, theirs) in self.tallies.iter_mut().zip(other.tallies) {
            mine.champion += theirs.champion;
            mine.qualified += theirs.qualified;
            mine.relegated += theirs.relegated;
            mine.position_sum += theirs.position_sum;
            mine.points_sum += theirs.points_sum;
            for (a, b) in mine.histogram.iter_mut().zip(theirs.histogram) {
                *a += b;
            }
        }
        self
    }

    fn finish(self, team_ids: &[TeamId], current_points: &[i32]) -> Vec<TeamPrediction> {
        let n = self.trials.max(1) as f64;
        let pct = |count: u64| count as f64 / n * 100.0;

        let mut out: Vec<TeamPrediction> = self
            .tallies
            .into_iter()
            .zip(team_ids.iter().zip(current_points))
            .map(|(tally, (team_id, points))| TeamPrediction {
                team_id: *team_id,
                current_points: *points,
                title_probability: pct(tally.champion),
                qualification_probability: pct(tally.qualified),
                relegation_probability: pct(tally.relegated),
                average_position: tally.position_sum as f64 / n,
                average_points: tally.points_sum as f64 / n,
                position_distribution: tally.histogram.into_iter().map(pct).collect(),
            })
            .collect();

        out.sort_by(|a, b| {
            a.average_position
                .total_cmp(&b.average_position)
                .then_with(|| b.title_probability.total_cmp(&a.title_probability))
                .then(a.team_id.cmp(&b.team_id))
        });
        out
    }
}

/// Runs many independent trials and folds them into per-team distributions.
#[derive(Debug, Clone, Copy)]
pub struct TrialAggregator<'a> {
    simulator: SeasonSimulator<'a>,
    threads: usize,
}

impl<'a> TrialAggregator<'a> {
    pub fn new(simulator: SeasonSimulator<'a>, threads: usize) -> Self {
        Self {
            simulator,
            threads: threads.clamp(1, 64),
        }
    }

    pub fn run(&self, trial_count: u32, seed: u64, budget: &TrialBudget) -> Result<Aggregate> {
        if trial_count == 0 || trial_count > MAX_TRIALS {
            return Err(ForecastError::InvalidRequest(format!(
                "trial count must be in 1..={MAX_TRIALS}, got {trial_count}"
            )));
        }
        budget.check()?;

        let base = self.simulator.base();
        let rules = base.rules();
        let team_ids = base.team_ids();
        let current_points: Vec<i32> = team_ids
            .iter()
            .map(|id| base.get(*id).map(|s| s.points).unwrap_or_default())
            .collect();

        if self.simulator.remaining().is_empty() {
            debug!("no fixtures left, {trial_count} trials collapse to one deterministic table");
            let table = self.simulator.simulate(&mut trial_rng(seed, 0))?;
            let mut acc = Accumulator::new(team_ids.len());
            acc.record(&table, &team_ids, rules, trial_count as u64)?;
            return Ok(Aggregate {
                trial_count,
                simulated_trials: 1,
                predictions: acc.finish(&team_ids, &current_points),
            });
        }

        debug!(
            "running {trial_count} trials over {} fixtures on {} workers",
            self.simulator.remaining().len(),
            self.threads
        );
        let simulator = self.simulator;
        let acc = with_trial_pool(self.threads, || {
            (0..trial_count)
                .into_par_iter()
                .try_fold(
                    || Accumulator::new(team_ids.len()),
                    |mut acc, trial| -> Result<Accumulator> {
                        budget.check()?;
                        let table = simulator.simulate(&mut trial_rng(seed, trial))?;
                        acc.record(&table, &team_ids, rules, 1)?;
                        Ok(acc)
                    },
                )
                .try_reduce(|| Accumulator::new(team_ids.len()), |a, b| Ok(a.merge(b)))
        })?;

        Ok(Aggregate {
            trial_count,
            simulated_trials: trial_count,
            predictions: acc.finish(&team_ids, &current_points),
        })
    }
}

/// Independent, reproducible stream per trial: same run seed, one ChaCha stream per index.
pub fn trial_rng(seed: u64, trial: u32) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(trial as u64);
    rng
}

pub fn default_parallelism() -> usize {
    env::var(PARALLELISM_ENV)
        .ok()
        .and_then(|val| val.trim().parse::<usize>().ok())
        .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
        .unwrap_or(4)
        .clamp(1, 64)
}

fn with_trial_pool<T>(threads: usize, action: impl FnOnce() -> T + Send) -> T
where
    T: Send,
{
    match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
        Ok(pool) => pool.install(action),
        Err(_) => action(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{CompetitionSnapshot, Fixture, Team};
    use crate::params::ModelParams;
    use crate::rating::compute_ratings;
    use crate::sampler::MatchOutcomeSampler;
    use crate::standings::Standings;
    use rand::Rng;

    fn league() -> CompetitionSnapshot {
        let mut s = CompetitionSnapshot::new(1, "L");
        s.rules = CompetitionRules {
            relegation_slots: 2,
            qualification_slots: 2,
            ..CompetitionRules::default()
        };
        s.teams = (1..=6).map(|id| Team::new(id, format!("T{id}"))).collect();
        let mut id = 0;
        for h in 1..=6 {
            for a in 1..=6 {
                if h != a {
                    id += 1;
                    s.fixtures.push(Fixture::scheduled(id, h, a));
                }
            }
        }
        s
    }

    fn run(snap: &CompetitionSnapshot, trials: u32, seed: u64, threads: usize) -> Aggregate {
        let params = ModelParams::default();
        let base = Standings::from_snapshot(snap).unwrap();
        let ratings = compute_ratings(snap, &params.rating).unwrap();
        let remaining = snap.remaining();
        let sim = SeasonSimulator::new(
            &base,
            &remaining,
            &ratings,
            MatchOutcomeSampler::new(&params.sampler),
        );
        TrialAggregator::new(sim, threads)
            .run(trials, seed, &TrialBudget::unbounded())
            .unwrap()
    }

    #[test]
    fn result_does_not_depend_on_worker_count() {
        let snap = league();
        let one = run(&snap, 400, 11, 1);
        let many = run(&snap, 400, 11, 8);
        assert_eq!(one, many);
    }

    #[test]
    fn every_trial_lands_in_the_tally() {
        let snap = league();
        let agg = run(&snap, 997, 3, 8);
        assert_eq!(agg.simulated_trials, 997);
        for rank in 0..snap.teams.len() {
            let column: f64 = agg
                .predictions
                .iter()
                .map(|p| p.position_distribution[rank] * 997.0 / 100.0)
                .sum();
            assert_eq!(column.round() as u64, 997, "position {}", rank + 1);
        }
    }

    #[test]
    fn trial_streams_are_distinct() {
        let mut a = trial_rng(5, 0);
        let mut b = trial_rng(5, 1);
        let xs: Vec<u64> = (0..4).map(|_| a.gen_range(0..u64::MAX)).collect();
        let ys: Vec<u64> = (0..4).map(|_| b.gen_range(0..u64::MAX)).collect();
        assert_ne!(xs, ys);
    }

    #[test]
    fn rejects_out_of_range_trial_counts() {
        let snap = league();
        let params = ModelParams::default();
        let base = Standings::from_snapshot(&snap).unwrap();
        let ratings = compute_ratings(&snap, &params.rating).unwrap();
        let remaining = snap.remaining();
        let sim = SeasonSimulator::new(
            &base,
            &remaining,
            &ratings,
            MatchOutcomeSampler::new(&params.sampler),
        );
        let agg = TrialAggregator::new(sim, 2);
        for n in [0, MAX_TRIALS + 1] {
            assert!(matches!(
                agg.run(n, 1, &TrialBudget::unbounded()),
                Err(ForecastError::InvalidRequest(_))
            ));
        }
    }

    #[test]
    fn raised_cancel_flag_aborts_whole_run() {
        let snap = league();
        let params = ModelParams::default();
        let base = Standings::from_snapshot(&snap).unwrap();
        let ratings = compute_ratings(&snap, &params.rating).unwrap();
        let remaining = snap.remaining();
        let sim = SeasonSimulator::new(
            &base,
            &remaining,
            &ratings,
            MatchOutcomeSampler::new(&params.sampler),
        );
        let flag = Arc::new(AtomicBool::new(true));
        let budget = TrialBudget::unbounded().with_cancel_flag(flag);
        assert!(matches!(
            TrialAggregator::new(sim, 2).run(100, 1, &budget),
            Err(ForecastError::Cancelled)
        ));
    }

    #[test]
    fn expired_deadline_times_out() {
        let budget = TrialBudget::with_timeout(Duration::ZERO);
        assert!(matches!(budget.check(), Err(ForecastError::TimedOut(_))));
    }
}
