use criterion::{Criterion, criterion_group, criterion_main};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::hint::black_box;

use season_forecast::aggregate::{TrialAggregator, TrialBudget, trial_rng};
use season_forecast::fixtures::{CompetitionSnapshot, Fixture, InMemoryFeed, Team};
use season_forecast::params::ModelParams;
use season_forecast::rating::compute_ratings;
use season_forecast::sampler::MatchOutcomeSampler;
use season_forecast::season::SeasonSimulator;
use season_forecast::standings::Standings;

// 20-team double round robin with the first 19 rounds played.
fn half_season() -> CompetitionSnapshot {
    let mut snap = CompetitionSnapshot::new(47, "Bench League");
    snap.teams = (1..=20).map(|id| Team::new(id, format!("Team {id}"))).collect();
    let mut id = 0u64;
    for h in 1..=20u32 {
        for a in 1..=20u32 {
            if h == a {
                continue;
            }
            id += 1;
            let kickoff = format!("2026-{:02}-{:02}T15:00:00Z", 1 + (id % 12), 1 + (id % 28));
            let fixture = if id % 2 == 0 {
                let hg = ((h * 7 + a) % 4) as u8;
                let ag = ((a * 5 + h) % 3) as u8;
                Fixture::finished(id, h, a, hg, ag)
            } else {
                Fixture::scheduled(id, h, a)
            };
            snap.fixtures.push(fixture.with_kickoff(kickoff));
        }
    }
    snap
}

fn bench_sampler_draw(c: &mut Criterion) {
    let params = ModelParams::default();
    let sampler = MatchOutcomeSampler::new(&params.sampler);
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    c.bench_function("sampler_draw", |b| {
        b.iter(|| {
            let r = sampler.sample(black_box(68.0), black_box(47.0), &mut rng);
            black_box(r.home_goals);
        })
    });
}

fn bench_single_trial(c: &mut Criterion) {
    let snap = half_season();
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
    let mut trial = 0u32;
    c.bench_function("single_trial", |b| {
        b.iter(|| {
            trial = trial.wrapping_add(1);
            let table = sim.simulate(&mut trial_rng(7, trial)).unwrap();
            black_box(table.rows().len());
        })
    });
}

fn bench_aggregate_1000(c: &mut Criterion) {
    let snap = half_season();
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
    let aggregator = TrialAggregator::new(sim, 4);
    let budget = TrialBudget::unbounded();

    let mut group = c.benchmark_group("aggregate");
    group.sample_size(10);
    group.bench_function("aggregate_1000", |b| {
        b.iter(|| {
            let agg = aggregator.run(1000, black_box(42), &budget).unwrap();
            black_box(agg.predictions.len());
        })
    });
    group.finish();
}

fn bench_feed_json_parse(c: &mut Criterion) {
    c.bench_function("feed_json_parse", |b| {
        b.iter(|| {
            let feed = InMemoryFeed::from_json_str(black_box(MINI_LEAGUE_JSON)).unwrap();
            black_box(feed.snapshots().count());
        })
    });
}

fn bench_ratings(c: &mut Criterion) {
    let snap = half_season();
    let params = ModelParams::default();
    c.bench_function("compute_ratings", |b| {
        b.iter(|| {
            let ratings = compute_ratings(black_box(&snap), &params.rating).unwrap();
            black_box(ratings.len());
        })
    });
}

criterion_group!(
    perf,
    bench_sampler_draw,
    bench_single_trial,
    bench_aggregate_1000,
    bench_feed_json_parse,
    bench_ratings
);
criterion_main!(perf);

static MINI_LEAGUE_JSON: &str = include_str!("../tests/fixtures/mini_league.json");
