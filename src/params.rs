use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ForecastError, Result};

pub const ALGORITHM_ID: &str = "power-index-poisson/1";
pub const PARAMS_ENV: &str = "FORECAST_PARAMS";
// Scorelines are stored as u8; no real match gets near this.
pub const MAX_GOALS_CAP: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingParams {
    pub min_rating: f64,
    pub max_rating: f64,
    pub neutral_rating: f64,
    pub ppg_weight: f64,
    pub gd_weight: f64,
    pub form_weight: f64,
    pub form_window: usize,
    // Weight of the k-th most recent match is form_decay^k.
    pub form_decay: f64,
    pub gd_cap: f64,
    pub shrink_matches: usize,
}

impl Default for RatingParams {
    fn default() -> Self {
        Self {
            min_rating: 20.0,
            max_rating: 90.0,
            neutral_rating: 55.0,
            ppg_weight: 0.50,
            gd_weight: 0.30,
            form_weight: 0.20,
            form_window: 5,
            form_decay: 0.85,
            gd_cap: 2.5,
            shrink_matches: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplerParams {
    pub goals_total_base: f64,
    pub home_advantage_goals: f64,
    pub goals_per_rating_point: f64,
    pub volatility: f64,
    pub prob_floor: f64,
    pub prob_ceiling: f64,
    pub lambda_min: f64,
    pub lambda_max: f64,
    pub max_goals: u32,
}

impl Default for SamplerParams {
    fn default() -> Self {
        Self {
            goals_total_base: 2.60,
            home_advantage_goals: 0.25,
            goals_per_rating_point: 0.025,
            volatility: 0.35,
            prob_floor: 0.10,
            prob_ceiling: 0.80,
            lambda_min: 0.20,
            lambda_max: 3.80,
            max_goals: 10,
        }
    }
}

/// Everything that numerically changes a run. Stamped onto every stored run via [`ModelParams::version`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelParams {
    #[serde(default)]
    pub rating: RatingParams,
    #[serde(default)]
    pub sampler: SamplerParams,
}

impl ModelParams {
    pub fn validate(&self) -> Result<()> {
        let r = &self.rating;
        let s = &self.sampler;

        let finite = [
            r.min_rating,
            r.max_rating,
            r.neutral_rating,
            r.ppg_weight,
            r.gd_weight,
            r.form_weight,
            r.form_decay,
            r.gd_cap,
            s.goals_total_base,
            s.home_advantage_goals,
            s.goals_per_rating_point,
            s.volatility,
            s.prob_floor,
            s.prob_ceiling,
            s.lambda_min,
            s.lambda_max,
        ];
        if finite.iter().any(|v| !v.is_finite()) {
            return Err(invalid("all parameters must be finite"));
        }

        if r.min_rating >= r.max_rating {
            return Err(invalid("min_rating must be below max_rating"));
        }
        if r.neutral_rating < r.min_rating || r.neutral_rating > r.max_rating {
            return Err(invalid("neutral_rating must lie inside the rating range"));
        }
        if r.ppg_weight < 0.0 || r.gd_weight < 0.0 || r.form_weight < 0.0 {
            return Err(invalid("rating weights must be non-negative"));
        }
        if r.ppg_weight + r.gd_weight + r.form_weight <= 0.0 {
            return Err(invalid("rating weights must not all be zero"));
        }
        if r.form_window == 0 {
            return Err(invalid("form_window must be at least 1"));
        }
        if !(0.0..=1.0).contains(&r.form_decay) || r.form_decay == 0.0 {
            return Err(invalid("form_decay must be in (0, 1]"));
        }
        if r.gd_cap <= 0.0 {
            return Err(invalid("gd_cap must be positive"));
        }

        if s.volatility < 0.0 {
            return Err(invalid("volatility must be non-negative"));
        }
        if s.goals_total_base <= 0.0 {
            return Err(invalid("goals_total_base must be positive"));
        }
        if s.lambda_min <= 0.0 || s.lambda_min >= s.lambda_max {
            return Err(invalid("need 0 < lambda_min < lambda_max"));
        }
        if s.max_goals == 0 || s.max_goals > MAX_GOALS_CAP {
            return Err(invalid(&format!(
                "max_goals must be in 1..={MAX_GOALS_CAP}"
            )));
        }
        if s.prob_floor <= 0.0 || s.prob_floor >= 1.0 / 3.0 {
            return Err(invalid("prob_floor must be in (0, 1/3)"));
        }
        // One redistribution pass keeps every outcome inside the band only for these ceilings.
        let lowest_ceiling = (1.0 - s.prob_floor) / 2.0;
        let highest_ceiling = 1.0 - 2.0 * s.prob_floor;
        if s.prob_ceiling < lowest_ceiling || s.prob_ceiling > highest_ceiling {
            return Err(invalid(&format!(
                "prob_ceiling must be in [{lowest_ceiling:.3}, {highest_ceiling:.3}] for floor {:.3}",
                s.prob_floor
            )));
        }
        Ok(())
    }

    /// `<algorithm>+<fingerprint>`; any numeric change to the parameters changes the fingerprint.
    pub fn version(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&json);
        format!("{ALGORITHM_ID}+{}", URL_SAFE_NO_PAD.encode(&digest[..12]))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let params: ModelParams = serde_json::from_str(raw.trim())?;
        params.validate()?;
        Ok(params)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Parameters from the file named by `FORECAST_PARAMS`, or the defaults when unset.
    pub fn from_env() -> Result<Self> {
        match params_path_from_env() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }
}

fn params_path_from_env() -> Option<PathBuf> {
    let raw = std::env::var(PARAMS_ENV).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(PathBuf::from(trimmed))
}

fn invalid(msg: &str) -> ForecastError {
    ForecastError::InvalidParams(msg.to_string())
}
