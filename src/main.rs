use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use env_logger::Env;

use season_forecast::aggregate::TeamPrediction;
use season_forecast::feed_db::SqliteFeed;
use season_forecast::fixtures::{CompetitionId, FixtureFeed, InMemoryFeed};
use season_forecast::forecast::{self, LatestSimulation, RunRequest};
use season_forecast::params::ModelParams;
use season_forecast::rating::TeamRating;
use season_forecast::store::{self, ResultStore};

const DEFAULT_TRIALS: u32 = 10_000;
const DEFAULT_KEEP: usize = 20;

const USAGE: &str = "\
usage: season_forecast <command> [flags]

commands:
  run      --competition <id> [--trials N] [--seed S] [--timeout-secs T] [--threads N]
           [--feed snapshot.json] [--params params.json] [--db path] [--json]
  latest   --competition <id> [--db path] [--json]
  history  --competition <id> [--db path]
  prune    --competition <id> [--keep N] [--db path]
  params   [--params params.json] [--out path]";

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let Some(command) = args.first().map(String::as_str) else {
        println!("{USAGE}");
        return Ok(());
    };
    let flags = &args[1..];

    match command {
        "run" => cmd_run(flags),
        "latest" => cmd_latest(flags),
        "history" => cmd_history(flags),
        "prune" => cmd_prune(flags),
        "params" => cmd_params(flags),
        "help" | "--help" | "-h" => {
            println!("{USAGE}");
            Ok(())
        }
        other => Err(anyhow!("unknown command {other:?}\n\n{USAGE}")),
    }
}

fn cmd_run(flags: &[String]) -> Result<()> {
    let competition_id = competition_arg(flags)?;
    let trial_count = parse_arg::<u32>(flags, "--trials")?.unwrap_or(DEFAULT_TRIALS);
    let mut req = RunRequest::new(competition_id, trial_count);
    req.seed = parse_arg::<u64>(flags, "--seed")?;
    req.threads = parse_arg::<usize>(flags, "--threads")?;
    req.timeout = parse_arg::<u64>(flags, "--timeout-secs")?.map(Duration::from_secs);

    let params = load_params(flags)?;
    let db_path = db_path_arg(flags)?;
    let mut store = ResultStore::open(&db_path)
        .with_context(|| format!("open result store {}", db_path.display()))?;

    let feed: Box<dyn FixtureFeed> = match arg_value(flags, "--feed") {
        Some(path) => Box::new(
            InMemoryFeed::from_json_file(&PathBuf::from(&path))
                .with_context(|| format!("load feed snapshot {path}"))?,
        ),
        None => Box::new(
            SqliteFeed::open(&db_path)
                .with_context(|| format!("open fixtures feed {}", db_path.display()))?,
        ),
    };

    let report = forecast::run_simulation(feed.as_ref(), &mut store, &params, &req)
        .with_context(|| format!("simulate competition {competition_id}"))?;

    if has_flag(flags, "--json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Simulation {} stored as latest", report.simulation_id);
    println!("Competition: {}", report.competition_id);
    println!(
        "Trials: {}  seed: {}  params: {}",
        report.trial_count, report.seed, report.params_version
    );
    println!("Duration: {} ms", report.duration.as_millis());
    print_predictions(&report.predictions, &report.ratings);
    Ok(())
}

fn cmd_latest(flags: &[String]) -> Result<()> {
    let competition_id = competition_arg(flags)?;
    let store = open_store(flags)?;
    match forecast::get_latest(&store, competition_id)? {
        LatestSimulation::NoSimulationYet => {
            println!("No simulation yet for competition {competition_id}");
        }
        LatestSimulation::Ready(run) => {
            if has_flag(flags, "--json") {
                println!("{}", serde_json::to_string_pretty(&run)?);
                return Ok(());
            }
            println!(
                "Simulation {} ({}), {} trials, seed {}, {} ms",
                run.simulation_id, run.created_at, run.trial_count, run.seed, run.duration_ms
            );
            println!("Params: {}", run.params_version);
            print_predictions(&run.predictions, &run.ratings);
        }
    }
    Ok(())
}

fn cmd_history(flags: &[String]) -> Result<()> {
    let competition_id = competition_arg(flags)?;
    let store = open_store(flags)?;
    let runs = store.list_runs(competition_id)?;
    if runs.is_empty() {
        println!("No simulation yet for competition {competition_id}");
        return Ok(());
    }
    println!(
        "{:>6}  {:<32}  {:>7}  {:>8}  {:<6}  params",
        "id", "created", "trials", "ms", "latest"
    );
    for run in runs {
        println!(
            "{:>6}  {:<32}  {:>7}  {:>8}  {:<6}  {}",
            run.simulation_id,
            run.created_at,
            run.trial_count,
            run.duration_ms,
            if run.is_latest { "yes" } else { "" },
            run.params_version
        );
    }
    Ok(())
}

fn cmd_prune(flags: &[String]) -> Result<()> {
    let competition_id = competition_arg(flags)?;
    let keep = parse_arg::<usize>(flags, "--keep")?.unwrap_or(DEFAULT_KEEP);
    let mut store = open_store(flags)?;
    let deleted = store.prune(competition_id, keep)?;
    println!("Pruned {deleted} runs for competition {competition_id} (kept newest {keep})");
    Ok(())
}

fn cmd_params(flags: &[String]) -> Result<()> {
    let params = load_params(flags)?;
    println!("Version: {}", params.version());
    println!("{}", serde_json::to_string_pretty(&params)?);
    if let Some(out) = arg_value(flags, "--out") {
        params
            .save(&PathBuf::from(&out))
            .with_context(|| format!("write params to {out}"))?;
        println!("Saved to {out}");
    }
    Ok(())
}

fn print_predictions(predictions: &[TeamPrediction], ratings: &[TeamRating]) {
    let name_of = |team_id| {
        ratings
            .iter()
            .find(|r| r.team_id == team_id)
            .map(|r| r.name.as_str())
            .filter(|n| !n.is_empty())
            .unwrap_or("?")
    };
    let rating_of = |team_id| {
        ratings
            .iter()
            .find(|r| r.team_id == team_id)
            .map(|r| r.rating)
            .unwrap_or(0.0)
    };

    println!();
    println!(
        "{:<24} {:>6} {:>5} {:>7} {:>7} {:>7} {:>7} {:>7}",
        "team", "rating", "pts", "avg pts", "avg pos", "title%", "qual%", "releg%"
    );
    for p in predictions {
        println!(
            "{:<24} {:>6.1} {:>5} {:>7.1} {:>7.2} {:>7.2} {:>7.2} {:>7.2}",
            truncate(name_of(p.team_id), 24),
            rating_of(p.team_id),
            p.current_points,
            p.average_points,
            p.average_position,
            p.title_probability,
            p.qualification_probability,
            p.relegation_probability
        );
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn open_store(flags: &[String]) -> Result<ResultStore> {
    let db_path = db_path_arg(flags)?;
    ResultStore::open(&db_path).with_context(|| format!("open result store {}", db_path.display()))
}

fn load_params(flags: &[String]) -> Result<ModelParams> {
    match arg_value(flags, "--params") {
        Some(path) => ModelParams::load(&PathBuf::from(&path))
            .with_context(|| format!("load model params {path}")),
        None => ModelParams::from_env().context("load model params from FORECAST_PARAMS"),
    }
}

fn db_path_arg(flags: &[String]) -> Result<PathBuf> {
    arg_value(flags, "--db")
        .map(PathBuf::from)
        .or_else(store::default_db_path)
        .context("unable to resolve sqlite path")
}

fn competition_arg(flags: &[String]) -> Result<CompetitionId> {
    match parse_arg::<CompetitionId>(flags, "--competition")? {
        Some(id) => Ok(id),
        None => bail!("--competition <id> is required\n\n{USAGE}"),
    }
}

fn parse_arg<T: std::str::FromStr>(flags: &[String], name: &str) -> Result<Option<T>> {
    let Some(raw) = arg_value(flags, name) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|_| anyhow!("invalid value for {name}: {raw:?}"))
}

fn arg_value(flags: &[String], name: &str) -> Option<String> {
    let prefix = format!("{name}=");
    for (idx, arg) in flags.iter().enumerate() {
        if let Some(v) = arg.strip_prefix(&prefix)
            && !v.trim().is_empty()
        {
            return Some(v.trim().to_string());
        }
        if arg == name
            && let Some(next) = flags.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(next.trim().to_string());
        }
    }
    None
}

fn has_flag(flags: &[String], name: &str) -> bool {
    flags.iter().any(|arg| arg == name)
}
