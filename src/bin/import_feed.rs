use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use env_logger::Env;

use season_forecast::feed_db::SqliteFeed;
use season_forecast::fixtures::InMemoryFeed;
use season_forecast::store;

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let file = parse_path_arg("--file")
        .or_else(first_positional)
        .ok_or_else(|| anyhow!("usage: import_feed --file <snapshot.json> [--db path]"))?;
    let db_path = parse_path_arg("--db")
        .or_else(store::default_db_path)
        .context("unable to resolve sqlite path")?;

    let source = InMemoryFeed::from_json_file(&file)
        .with_context(|| format!("read feed snapshot {}", file.display()))?;
    let mut feed = SqliteFeed::open(&db_path)
        .with_context(|| format!("open fixtures db {}", db_path.display()))?;

    let mut snapshots = source.snapshots().collect::<Vec<_>>();
    snapshots.sort_by_key(|s| s.competition_id);
    if snapshots.is_empty() {
        return Err(anyhow!("{} contains no competitions", file.display()));
    }

    println!("Feed import complete");
    println!("DB: {}", db_path.display());
    for snapshot in snapshots {
        let summary = feed
            .import(snapshot)
            .with_context(|| format!("import competition {}", snapshot.competition_id))?;
        println!(
            "competition {} ({}): teams={} fixtures={} finished={} scheduled={}",
            summary.competition_id,
            snapshot.name,
            summary.teams_upserted,
            summary.fixtures_upserted,
            summary.finished,
            summary.scheduled
        );
    }
    Ok(())
}

fn parse_path_arg(name: &str) -> Option<PathBuf> {
    let prefix = format!("{name}=");
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(path) = arg.strip_prefix(&prefix) {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(PathBuf::from(next));
        }
    }
    None
}

fn first_positional() -> Option<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let mut skip_next = false;
    for arg in args {
        if skip_next {
            skip_next = false;
            continue;
        }
        if arg == "--db" || arg == "--file" {
            skip_next = true;
            continue;
        }
        if !arg.starts_with("--") {
            return Some(PathBuf::from(arg));
        }
    }
    None
}
