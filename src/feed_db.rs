use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use log::warn;
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{ForecastError, Result};
use crate::fixtures::{
    CompetitionId, CompetitionRules, CompetitionSnapshot, Fixture, FixtureFeed, FixtureStatus,
    Team,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub competition_id: CompetitionId,
    pub teams_upserted: usize,
    pub fixtures_upserted: usize,
    pub finished: usize,
    pub scheduled: usize,
}

/// Fixtures collaborator backed by the `competitions`/`teams`/`fixtures` tables.
pub struct SqliteFeed {
    conn: Connection,
}

impl SqliteFeed {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn import(&mut self, snapshot: &CompetitionSnapshot) -> Result<ImportSummary> {
        import_snapshot(&mut self.conn, snapshot)
    }
}

impl FixtureFeed for SqliteFeed {
    fn load_competition(
        &self,
        competition_id: CompetitionId,
    ) -> Result<Option<CompetitionSnapshot>> {
        load_snapshot(&self.conn, competition_id)
    }
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS competitions (
            competition_id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            relegation_slots INTEGER NOT NULL,
            qualification_slots INTEGER NOT NULL,
            points_for_win INTEGER NOT NULL,
            points_for_draw INTEGER NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS teams (
            competition_id INTEGER NOT NULL,
            team_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            points_adjustment INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (competition_id, team_id)
        );
        CREATE TABLE IF NOT EXISTS fixtures (
            fixture_id INTEGER PRIMARY KEY,
            competition_id INTEGER NOT NULL,
            kickoff TEXT NOT NULL,
            home_team_id INTEGER NOT NULL,
            away_team_id INTEGER NOT NULL,
            status TEXT NOT NULL,
            home_goals INTEGER NULL,
            away_goals INTEGER NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_fixtures_competition ON fixtures(competition_id);
        CREATE INDEX IF NOT EXISTS idx_fixtures_kickoff ON fixtures(kickoff);
        "#,
    )?;
    Ok(())
}

pub fn import_snapshot(
    conn: &mut Connection,
    snapshot: &CompetitionSnapshot,
) -> Result<ImportSummary> {
    let now = Utc::now().to_rfc3339();
    let tx = conn.transaction()?;
    tx.execute(
        r#"
        INSERT INTO competitions (
            competition_id, name, relegation_slots, qualification_slots,
            points_for_win, points_for_draw, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(competition_id) DO UPDATE SET
            name = excluded.name,
            relegation_slots = excluded.relegation_slots,
            qualification_slots = excluded.qualification_slots,
            points_for_win = excluded.points_for_win,
            points_for_draw = excluded.points_for_draw,
            updated_at = excluded.updated_at
        "#,
        params![
            snapshot.competition_id as i64,
            snapshot.name,
            snapshot.rules.relegation_slots as i64,
            snapshot.rules.qualification_slots as i64,
            snapshot.rules.points_for_win as i64,
            snapshot.rules.points_for_draw as i64,
            now,
        ],
    )?;

    for team in &snapshot.teams {
        tx.execute(
            r#"
            INSERT INTO teams (competition_id, team_id, name, points_adjustment)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(competition_id, team_id) DO UPDATE SET
                name = excluded.name,
                points_adjustment = excluded.points_adjustment
            "#,
            params![
                snapshot.competition_id as i64,
                team.id as i64,
                team.name,
                team.points_adjustment as i64,
            ],
        )?;
    }

    let mut finished = 0usize;
    for fixture in &snapshot.fixtures {
        if fixture.is_finished() {
            finished += 1;
        }
        upsert_fixture(&tx, snapshot.competition_id, fixture, &now)?;
    }
    tx.commit()?;

    Ok(ImportSummary {
        competition_id: snapshot.competition_id,
        teams_upserted: snapshot.teams.len(),
        fixtures_upserted: snapshot.fixtures.len(),
        finished,
        scheduled: snapshot.fixtures.len() - finished,
    })
}

fn upsert_fixture(
    tx: &rusqlite::Transaction<'_>,
    competition_id: CompetitionId,
    f: &Fixture,
    now: &str,
) -> Result<()> {
    tx.execute(
        r#"
        INSERT INTO fixtures (
            fixture_id, competition_id, kickoff, home_team_id, away_team_id,
            status, home_goals, away_goals, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(fixture_id) DO UPDATE SET
            competition_id = excluded.competition_id,
            kickoff = excluded.kickoff,
            home_team_id = excluded.home_team_id,
            away_team_id = excluded.away_team_id,
            status = excluded.status,
            home_goals = excluded.home_goals,
            away_goals = excluded.away_goals,
            updated_at = excluded.updated_at
        "#,
        params![
            f.id as i64,
            competition_id as i64,
            f.kickoff,
            f.home_id as i64,
            f.away_id as i64,
            f.status.as_str(),
            f.home_goals.map(i64::from),
            f.away_goals.map(i64::from),
            now,
        ],
    )?;
    Ok(())
}

pub fn load_snapshot(
    conn: &Connection,
    competition_id: CompetitionId,
) -> Result<Option<CompetitionSnapshot>> {
    let header = conn
        .query_row(
            r#"
            SELECT name, relegation_slots, qualification_slots, points_for_win, points_for_draw
            FROM competitions WHERE competition_id = ?1
            "#,
            params![competition_id as i64],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    CompetitionRules {
                        relegation_slots: row.get::<_, i64>(1)?.max(0) as usize,
                        qualification_slots: row.get::<_, i64>(2)?.max(0) as usize,
                        points_for_win: row.get::<_, i64>(3)?.max(0) as u32,
                        points_for_draw: row.get::<_, i64>(4)?.max(0) as u32,
                    },
                ))
            },
        )
        .optional()?;
    let Some((name, rules)) = header else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT team_id, name, points_adjustment FROM teams WHERE competition_id = ?1 ORDER BY team_id",
    )?;
    let rows = stmt.query_map(params![competition_id as i64], |row| {
        Ok(Team {
            id: row.get::<_, i64>(0)? as u32,
            name: row.get(1)?,
            points_adjustment: row.get::<_, i64>(2)? as i32,
        })
    })?;
    let mut teams = Vec::new();
    for row in rows {
        teams.push(row?);
    }

    let mut stmt = conn.prepare(
        r#"
        SELECT fixture_id, kickoff, home_team_id, away_team_id, status, home_goals, away_goals
        FROM fixtures WHERE competition_id = ?1
        ORDER BY kickoff, fixture_id
        "#,
    )?;
    let rows = stmt.query_map(params![competition_id as i64], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, Option<i64>>(5)?,
            row.get::<_, Option<i64>>(6)?,
        ))
    })?;

    let mut fixtures = Vec::new();
    for row in rows {
        let (id, kickoff, home, away, status, hg, ag) = row?;
        let id = id as u64;
        let Some(status) = FixtureStatus::parse(&status) else {
            return Err(ForecastError::malformed(
                id,
                format!("unknown fixture status {status:?}"),
            ));
        };
        fixtures.push(Fixture {
            id,
            kickoff,
            home_id: home as u32,
            away_id: away as u32,
            status,
            home_goals: hg.and_then(goals_from_i64),
            away_goals: ag.and_then(goals_from_i64),
        });
    }

    if teams.is_empty() {
        warn!("competition {competition_id} is registered but has no teams");
    }

    Ok(Some(CompetitionSnapshot {
        competition_id,
        name,
        rules,
        teams,
        fixtures,
    }))
}

fn goals_from_i64(v: i64) -> Option<u8> {
    u8::try_from(v).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> CompetitionSnapshot {
        let mut s = CompetitionSnapshot::new(47, "Premier League");
        s.rules.relegation_slots = 1;
        s.teams = vec![Team::new(1, "Arsenal"), Team::new(2, "Chelsea")];
        s.teams[1].points_adjustment = -3;
        s.fixtures = vec![
            Fixture::finished(10, 1, 2, 2, 1).with_kickoff("2026-08-20T14:00:00Z"),
            Fixture::scheduled(11, 2, 1).with_kickoff("2026-12-20T14:00:00Z"),
        ];
        s
    }

    #[test]
    fn import_then_load_returns_same_snapshot() {
        let mut feed = SqliteFeed::in_memory().unwrap();
        let summary = feed.import(&snapshot()).unwrap();
        assert_eq!(summary.finished, 1);
        assert_eq!(summary.scheduled, 1);

        let loaded = feed.load_competition(47).unwrap().unwrap();
        assert_eq!(loaded, snapshot());
        assert!(feed.load_competition(48).unwrap().is_none());
    }

    #[test]
    fn reimport_updates_results_in_place() {
        let mut feed = SqliteFeed::in_memory().unwrap();
        feed.import(&snapshot()).unwrap();

        let mut next = snapshot();
        next.fixtures[1].status = FixtureStatus::Finished;
        next.fixtures[1].home_goals = Some(0);
        next.fixtures[1].away_goals = Some(0);
        feed.import(&next).unwrap();

        let loaded = feed.load_competition(47).unwrap().unwrap();
        assert_eq!(loaded.fixtures.len(), 2);
        assert!(loaded.fixtures.iter().all(|f| f.is_finished()));
    }
}
