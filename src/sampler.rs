use rand::Rng;
use rand_distr::StandardNormal;

use crate::params::SamplerParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Home,
    Draw,
    Away,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prob3 {
    pub home: f64,
    pub draw: f64,
    pub away: f64,
}

impl Prob3 {
    pub fn uniform() -> Self {
        Self {
            home: 1.0 / 3.0,
            draw: 1.0 / 3.0,
            away: 1.0 / 3.0,
        }
    }

    pub fn sum(&self) -> f64 {
        self.home + self.draw + self.away
    }

    fn pick(&self, u: f64) -> Outcome {
        if u < self.home {
            Outcome::Home
        } else if u < self.home + self.draw {
            Outcome::Draw
        } else {
            Outcome::Away
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampledResult {
    pub outcome: Outcome,
    pub home_goals: u8,
    pub away_goals: u8,
}

/// Match model for one pair of ratings with the random goal-difference noise already applied.
#[derive(Debug, Clone)]
pub struct FixtureModel {
    pub lambda_home: f64,
    pub lambda_away: f64,
    pub probs: Prob3,
    pmf_home: Vec<f64>,
    pmf_away: Vec<f64>,
}

/// Draws single match results from two Power Index ratings.
///
/// Holds only a parameter reference; all randomness comes from the RNG passed to each call,
/// so one sampler can be shared by every trial worker.
#[derive(Debug, Clone, Copy)]
pub struct MatchOutcomeSampler<'a> {
    params: &'a SamplerParams,
}

impl<'a> MatchOutcomeSampler<'a> {
    pub fn new(params: &'a SamplerParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &SamplerParams {
        self.params
    }

    /// Model for a fixture given an explicit noise term in goals (0.0 for the expected case).
    pub fn model(&self, home_rating: f64, away_rating: f64, noise: f64) -> FixtureModel {
        let p = self.params;
        let diff = p.home_advantage_goals
            + p.goals_per_rating_point * (home_rating - away_rating)
            + noise;
        let lambda_home = clamp(
            (p.goals_total_base / 2.0) + (diff / 2.0),
            p.lambda_min,
            p.lambda_max,
        );
        let lambda_away = clamp(
            (p.goals_total_base / 2.0) - (diff / 2.0),
            p.lambda_min,
            p.lambda_max,
        );

        let pmf_home = poisson_pmf(lambda_home, p.max_goals);
        let pmf_away = poisson_pmf(lambda_away, p.max_goals);
        let raw = outcome_probs(&pmf_home, &pmf_away);
        let probs = bound_probs(raw, p.prob_floor, p.prob_ceiling);

        FixtureModel {
            lambda_home,
            lambda_away,
            probs,
            pmf_home,
            pmf_away,
        }
    }

    pub fn sample<R: Rng>(&self, home_rating: f64, away_rating: f64, rng: &mut R) -> SampledResult {
        let noise = if self.params.volatility > 0.0 {
            let z: f64 = rng.sample(StandardNormal);
            z * self.params.volatility
        } else {
            0.0
        };
        let model = self.model(home_rating, away_rating, noise);
        let outcome = model.probs.pick(rng.gen_range(0.0..1.0));
        let (home_goals, away_goals) = draw_scoreline(&model, outcome, rng);
        SampledResult {
            outcome,
            home_goals,
            away_goals,
        }
    }
}

/// Maps a raw triple into `[floor, ceiling]` per outcome while keeping the sum at 1.
pub fn bound_probs(raw: Prob3, floor: f64, ceiling: f64) -> Prob3 {
    let sum = raw.sum();
    let raw = if sum > 0.0 {
        Prob3 {
            home: raw.home / sum,
            draw: raw.draw / sum,
            away: raw.away / sum,
        }
    } else {
        Prob3::uniform()
    };

    let span = 1.0 - 3.0 * floor;
    let mut p = [
        floor + span * raw.home,
        floor + span * raw.draw,
        floor + span * raw.away,
    ];

    if let Some(top) = p
        .iter()
        .enumerate()
        .filter(|(_, v)| **v > ceiling)
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
    {
        let excess = p[top] - ceiling;
        p[top] = ceiling;
        let rest: f64 = p
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != top)
            .map(|(_, v)| *v)
            .sum();
        for (i, v) in p.iter_mut().enumerate() {
            if i != top {
                *v += excess * (*v / rest);
            }
        }
    }

    Prob3 {
        home: p[0],
        draw: p[1],
        away: p[2],
    }
}

// Samples a scoreline from the Poisson grid restricted to the chosen outcome.
fn draw_scoreline<R: Rng>(model: &FixtureModel, outcome: Outcome, rng: &mut R) -> (u8, u8) {
    let in_region = |i: usize, j: usize| match outcome {
        Outcome::Home => i > j,
        Outcome::Draw => i == j,
        Outcome::Away => i < j,
    };

    let mut mass = 0.0;
    for (i, p_i) in model.pmf_home.iter().enumerate() {
        for (j, p_j) in model.pmf_away.iter().enumerate() {
            if in_region(i, j) {
                mass += p_i * p_j;
            }
        }
    }
    if mass <= 0.0 {
        return minimal_scoreline(outcome);
    }

    let target = rng.gen_range(0.0..mass);
    let mut acc = 0.0;
    let mut last = minimal_scoreline(outcome);
    for (i, p_i) in model.pmf_home.iter().enumerate() {
        for (j, p_j) in model.pmf_away.iter().enumerate() {
            if !in_region(i, j) {
                continue;
            }
            acc += p_i * p_j;
            last = (i as u8, j as u8);
            if target < acc {
                return last;
            }
        }
    }
    // Float residue at the very end of the region.
    last
}

fn minimal_scoreline(outcome: Outcome) -> (u8, u8) {
    match outcome {
        Outcome::Home => (1, 0),
        Outcome::Draw => (0, 0),
        Outcome::Away => (0, 1),
    }
}

fn outcome_probs(pmf_home: &[f64], pmf_away: &[f64]) -> Prob3 {
    let mut home = 0.0;
    let mut draw = 0.0;
    let mut away = 0.0;

    for (i, p_i) in pmf_home.iter().enumerate() {
        for (j, p_j) in pmf_away.iter().enumerate() {
            let p = p_i * p_j;
            if i > j {
                home += p;
            } else if i < j {
                away += p;
            } else {
                draw += p;
            }
        }
    }

    // Guard against tiny float drift.
    let sum = home + draw + away;
    if sum > 0.0 {
        Prob3 {
            home: home / sum,
            draw: draw / sum,
            away: away / sum,
        }
    } else {
        Prob3::uniform()
    }
}

fn poisson_pmf(lambda: f64, max_k: u32) -> Vec<f64> {
    let max_k = max_k as usize;
    let mut out = vec![0.0; max_k + 1];
    let lambda = lambda.max(0.0);

    out[0] = (-lambda).exp();
    for k in 1..=max_k {
        out[k] = out[k - 1] * lambda / k as f64;
    }

    let sum: f64 = out.iter().sum();
    if sum < 1.0 {
        out[max_k] += 1.0 - sum;
    }
    out
}

fn clamp(v: f64, lo: f64, hi: f64) -> f64 {
    v.max(lo).min(hi)
}
