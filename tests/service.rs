use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use season_forecast::ForecastError;
use season_forecast::aggregate::TrialBudget;
use season_forecast::feed_db::SqliteFeed;
use season_forecast::fixtures::{CompetitionSnapshot, Fixture, FixtureFeed, InMemoryFeed};
use season_forecast::forecast::{LatestSimulation, RunRequest, get_latest, run_simulation};
use season_forecast::params::{ModelParams, SamplerParams};
use season_forecast::store::ResultStore;

fn mini_league_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/mini_league.json")
}

fn feed() -> InMemoryFeed {
    InMemoryFeed::from_json_file(&mini_league_path()).unwrap()
}

fn assert_nothing_stored(store: &ResultStore, competition_id: u32) {
    assert!(store.list_runs(competition_id).unwrap().is_empty());
    assert_eq!(
        get_latest(store, competition_id).unwrap(),
        LatestSimulation::NoSimulationYet
    );
}

#[test]
fn unknown_competition_is_not_found() {
    let mut store = ResultStore::in_memory().unwrap();
    let err = run_simulation(
        &feed(),
        &mut store,
        &ModelParams::default(),
        &RunRequest::new(404, 100),
    )
    .unwrap_err();
    assert!(matches!(err, ForecastError::CompetitionNotFound(404)));
    assert!(err.is_not_found());
    assert_nothing_stored(&store, 404);
}

#[test]
fn competition_without_teams_is_rejected() {
    let mut feed = InMemoryFeed::new();
    feed.insert(CompetitionSnapshot::new(8, "Empty"));
    let mut store = ResultStore::in_memory().unwrap();
    let err = run_simulation(
        &feed,
        &mut store,
        &ModelParams::default(),
        &RunRequest::new(8, 100),
    )
    .unwrap_err();
    assert!(matches!(err, ForecastError::NoTeams(8)));
    assert_nothing_stored(&store, 8);
}

#[test]
fn expired_timeout_stores_nothing() {
    let mut store = ResultStore::in_memory().unwrap();
    let err = run_simulation(
        &feed(),
        &mut store,
        &ModelParams::default(),
        &RunRequest::new(39, 5000).with_timeout(Duration::ZERO),
    )
    .unwrap_err();
    assert!(matches!(err, ForecastError::TimedOut(_)));
    assert_nothing_stored(&store, 39);
}

#[test]
fn cancelled_run_stores_nothing_and_keeps_previous_latest() {
    let feed = feed();
    let params = ModelParams::default();
    let mut store = ResultStore::in_memory().unwrap();
    let first = run_simulation(
        &feed,
        &mut store,
        &params,
        &RunRequest::new(39, 200).with_seed(1),
    )
    .unwrap();

    let cancel = Arc::new(AtomicBool::new(true));
    let req = RunRequest::new(39, 5000)
        .with_seed(2)
        .with_budget(TrialBudget::unbounded().with_cancel_flag(cancel));
    let err = run_simulation(&feed, &mut store, &params, &req).unwrap_err();
    assert!(matches!(err, ForecastError::Cancelled));

    assert_eq!(store.list_runs(39).unwrap().len(), 1);
    match get_latest(&store, 39).unwrap() {
        LatestSimulation::Ready(run) => assert_eq!(run.simulation_id, first.simulation_id),
        LatestSimulation::NoSimulationYet => panic!("first run should still be latest"),
    }
}

#[test]
fn invalid_inputs_are_reported_before_simulating() {
    let feed = feed();
    let mut store = ResultStore::in_memory().unwrap();

    let bad_params = ModelParams {
        sampler: SamplerParams {
            prob_floor: 0.4,
            ..SamplerParams::default()
        },
        ..ModelParams::default()
    };
    let err = run_simulation(&feed, &mut store, &bad_params, &RunRequest::new(39, 100))
        .unwrap_err();
    assert!(matches!(err, ForecastError::InvalidParams(_)));

    let err = run_simulation(
        &feed,
        &mut store,
        &ModelParams::default(),
        &RunRequest::new(39, 0),
    )
    .unwrap_err();
    assert!(matches!(err, ForecastError::InvalidRequest(_)));

    let mut broken = feed.load_competition(39).unwrap().unwrap();
    let mut fixture = Fixture::finished(999, 1, 2, 1, 0);
    fixture.home_goals = None;
    broken.fixtures.push(fixture);
    let mut feed = InMemoryFeed::new();
    feed.insert(broken);
    let err = run_simulation(
        &feed,
        &mut store,
        &ModelParams::default(),
        &RunRequest::new(39, 100),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        ForecastError::MalformedFixture { fixture_id: 999, .. }
    ));

    assert_nothing_stored(&store, 39);
}

#[test]
fn sqlite_feed_drives_a_full_run() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("forecast.sqlite");

    let mut store = ResultStore::open(&db).unwrap();
    let mut sqlite_feed = SqliteFeed::open(&db).unwrap();
    for snap in feed().snapshots() {
        sqlite_feed.import(snap).unwrap();
    }
    let params = ModelParams::default();

    let from_db = run_simulation(
        &sqlite_feed,
        &mut store,
        &params,
        &RunRequest::new(39, 500).with_seed(8),
    )
    .unwrap();
    let from_json = run_simulation(
        &feed(),
        &mut store,
        &params,
        &RunRequest::new(39, 500).with_seed(8),
    )
    .unwrap();
    assert_eq!(from_db.predictions, from_json.predictions);
    assert_eq!(store.latest_count(39).unwrap(), 1);
    assert_eq!(store.list_runs(39).unwrap().len(), 2);

    let everton = from_db.predictions.iter().find(|p| p.team_id == 4).unwrap();
    let expected = {
        let snap = feed().load_competition(39).unwrap().unwrap();
        let standings = season_forecast::standings::Standings::from_snapshot(&snap).unwrap();
        standings.get(4).unwrap().points
    };
    assert_eq!(everton.current_points, expected);
}
