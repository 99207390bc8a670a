use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fixtures::{CompetitionRules, CompetitionSnapshot, Fixture, TeamId};
use crate::params::RatingParams;

/// Power Index of one team plus the components it was blended from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamRating {
    pub team_id: TeamId,
    pub name: String,
    pub rating: f64,
    pub matches: u32,
    pub points_per_game: f64,
    pub goal_diff_per_game: f64,
    pub form: f64,
}

pub type Ratings = BTreeMap<TeamId, TeamRating>;

#[derive(Debug, Default)]
struct TeamHistory {
    points: u32,
    goals_for: u32,
    goals_against: u32,
    // Points per match, oldest first.
    results: Vec<u32>,
}

pub fn compute_ratings(snapshot: &CompetitionSnapshot, cfg: &RatingParams) -> Result<Ratings> {
    let mut matches: Vec<&Fixture> = snapshot.finished().collect();
    // Kickoffs are ISO-8601 so string order is chronological.
    matches.sort_by(|a, b| a.kickoff.cmp(&b.kickoff).then(a.id.cmp(&b.id)));

    let rules = &snapshot.rules;
    let mut history: HashMap<TeamId, TeamHistory> = HashMap::new();
    for m in matches {
        let (h, a) = m.final_score()?;
        let (ph, pa) = match_points(h, a, rules);

        let home = history.entry(m.home_id).or_default();
        home.points += ph;
        home.goals_for += h as u32;
        home.goals_against += a as u32;
        home.results.push(ph);

        let away = history.entry(m.away_id).or_default();
        away.points += pa;
        away.goals_for += a as u32;
        away.goals_against += h as u32;
        away.results.push(pa);
    }

    let mut out = Ratings::new();
    for team in &snapshot.teams {
        let rating = match history.get(&team.id) {
            Some(hist) if !hist.results.is_empty() => rate_team(hist, rules, cfg),
            _ => neutral(cfg),
        };
        out.insert(
            team.id,
            TeamRating {
                team_id: team.id,
                name: team.name.clone(),
                ..rating
            },
        );
    }
    Ok(out)
}

fn neutral(cfg: &RatingParams) -> TeamRating {
    TeamRating {
        team_id: 0,
        name: String::new(),
        rating: cfg.neutral_rating,
        matches: 0,
        points_per_game: 0.0,
        goal_diff_per_game: 0.0,
        form: 0.0,
    }
}

fn rate_team(hist: &TeamHistory, rules: &CompetitionRules, cfg: &RatingParams) -> TeamRating {
    let n = hist.results.len() as f64;
    let max_pts = rules.points_for_win.max(1) as f64;

    let ppg = hist.points as f64 / n;
    let gdpg = (hist.goals_for as f64 - hist.goals_against as f64) / n;
    let form = form_points(&hist.results, cfg);

    let ppg_score = clamp(ppg / max_pts, 0.0, 1.0);
    let gd_score = (clamp(gdpg, -cfg.gd_cap, cfg.gd_cap) + cfg.gd_cap) / (2.0 * cfg.gd_cap);
    let form_score = clamp(form / max_pts, 0.0, 1.0);

    let weight_sum = cfg.ppg_weight + cfg.gd_weight + cfg.form_weight;
    let blended = (cfg.ppg_weight * ppg_score
        + cfg.gd_weight * gd_score
        + cfg.form_weight * form_score)
        / weight_sum;
    let raw = cfg.min_rating + blended * (cfg.max_rating - cfg.min_rating);

    // Shrink thin samples toward neutral so a 1-0 opening day doesn't look like a title side.
    let shrink = if cfg.shrink_matches == 0 {
        1.0
    } else {
        (n / cfg.shrink_matches as f64).min(1.0)
    };
    let rating = shrink * raw + (1.0 - shrink) * cfg.neutral_rating;

    TeamRating {
        team_id: 0,
        name: String::new(),
        rating: clamp(rating, cfg.min_rating, cfg.max_rating),
        matches: hist.results.len() as u32,
        points_per_game: ppg,
        goal_diff_per_game: gdpg,
        form,
    }
}

// Decay-weighted mean points over the last `form_window` matches, newest weighted highest.
fn form_points(results: &[u32], cfg: &RatingParams) -> f64 {
    let mut weighted = 0.0;
    let mut weight_sum = 0.0;
    for (k, pts) in results.iter().rev().take(cfg.form_window).enumerate() {
        let w = cfg.form_decay.powi(k as i32);
        weighted += w * *pts as f64;
        weight_sum += w;
    }
    if weight_sum <= 0.0 {
        return 0.0;
    }
    weighted / weight_sum
}

fn match_points(home: u8, away: u8, rules: &CompetitionRules) -> (u32, u32) {
    if home > away {
        (rules.points_for_win, 0)
    } else if home < away {
        (0, rules.points_for_win)
    } else {
        (rules.points_for_draw, rules.points_for_draw)
    }
}

fn clamp(v: f64, lo: f64, hi: f64) -> f64 {
    v.max(lo).min(hi)
}
