//! Region snapshot tables: one info row plus factions, conflicts and
//! spheres per region.

use super::{Database, StoreError};
use crate::fact::{ConflictPair, ConflictSide, FactId, FactionPresence, StateEntry};
use crate::region::{InfluenceSphere, PopulationFilter, RegionFilter, RegionSnapshot, SystemInfo};
use chrono::DateTime;
use rusqlite::{params, Connection, OptionalExtension, Params};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Latest-known state per region.
#[derive(Clone)]
pub struct RegionStore {
    db: Database,
}

impl RegionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Replace everything stored for the snapshot's region in one transaction.
    pub fn replace(&self, snapshot: &RegionSnapshot) -> Result<(), StoreError> {
        self.db.unit_of_work(|tx| replace_region(tx, snapshot))
    }

    pub fn get(&self, region: &str) -> Result<Option<RegionSnapshot>, StoreError> {
        self.db.with_conn(|conn| load_region(conn, region))
    }

    /// Names of all regions matching every constraint of `filter`.
    pub fn query(&self, filter: &RegionFilter) -> Result<BTreeSet<String>, StoreError> {
        self.db.with_conn(|conn| {
            let mut candidates: Option<BTreeSet<String>> = None;
            let mut narrow = |set: BTreeSet<String>| {
                candidates = Some(match candidates.take() {
                    Some(current) => current.intersection(&set).cloned().collect(),
                    None => set,
                });
            };

            if let Some(name) = &filter.controlling_faction {
                narrow(region_set(
                    conn,
                    "SELECT region FROM region_info WHERE controlling_faction = ?1",
                    params![name],
                )?);
            }
            if let Some(name) = &filter.controlling_power {
                narrow(region_set(
                    conn,
                    "SELECT region FROM region_info WHERE controlling_power = ?1",
                    params![name],
                )?);
            }
            if let Some(power) = &filter.power {
                narrow(regions_with_power(conn, power)?);
            }
            if let Some(name) = &filter.faction {
                narrow(region_set(
                    conn,
                    "SELECT DISTINCT region FROM region_factions WHERE name = ?1",
                    params![name],
                )?);
            }
            if let Some(state) = &filter.faction_state {
                narrow(regions_with_faction_state(conn, state)?);
            }
            if filter.in_conflict {
                narrow(region_set(conn, "SELECT DISTINCT region FROM region_conflicts", [])?);
            }
            if let Some(population) = filter.population {
                let set = match population {
                    PopulationFilter::Exact(n) => region_set(
                        conn,
                        "SELECT region FROM region_info WHERE population = ?1",
                        params![to_sql_int(n)],
                    )?,
                    PopulationFilter::Range { min, max } => region_set(
                        conn,
                        "SELECT region FROM region_info WHERE population BETWEEN ?1 AND ?2",
                        params![to_sql_int(min), to_sql_int(max)],
                    )?,
                };
                narrow(set);
            }
            if let Some(state) = &filter.powerplay_state {
                narrow(region_set(
                    conn,
                    "SELECT DISTINCT region FROM region_spheres WHERE powerplay_state = ?1",
                    params![state],
                )?);
            }

            match candidates {
                Some(set) => Ok(set),
                None => region_set(conn, "SELECT region FROM region_info", []),
            }
        })
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM region_info", [], |r| r.get(0))?;
            Ok(count as usize)
        })
    }
}

fn to_sql_int(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn region_set(conn: &Connection, sql: &str, params: impl Params) -> Result<BTreeSet<String>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<Result<_, _>>()?)
}

fn regions_with_power(conn: &Connection, power: &str) -> Result<BTreeSet<String>, StoreError> {
    let mut stmt = conn.prepare("SELECT region, powers FROM region_spheres")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

    let mut set = BTreeSet::new();
    for row in rows {
        let (region, powers) = row?;
        let powers: Vec<String> = serde_json::from_str(&powers)?;
        if powers.iter().any(|p| p == power) {
            set.insert(region);
        }
    }
    Ok(set)
}

fn regions_with_faction_state(conn: &Connection, state: &str) -> Result<BTreeSet<String>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT region, state, pending_states, active_states, recovering_states FROM region_factions",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
        ))
    })?;

    let mut set = BTreeSet::new();
    for row in rows {
        let (region, current, pending, active, recovering) = row?;
        let presence = FactionPresence {
            state: current,
            pending_states: serde_json::from_str(&pending)?,
            active_states: serde_json::from_str(&active)?,
            recovering_states: serde_json::from_str(&recovering)?,
            ..Default::default()
        };
        if presence.has_state(state) {
            set.insert(region);
        }
    }
    Ok(set)
}

/// Delete and re-insert every row of the snapshot's region on an open
/// connection or transaction.
pub(crate) fn replace_region(conn: &Connection, snapshot: &RegionSnapshot) -> Result<(), StoreError> {
    let region = snapshot.name();
    for table in ["region_info", "region_factions", "region_conflicts", "region_spheres"] {
        conn.execute(&format!("DELETE FROM {table} WHERE region = ?1"), params![region])?;
    }

    let info = &snapshot.info;
    conn.execute(
        "INSERT INTO region_info (region, address, controlling_faction, controlling_power,
                                  population, security, government, allegiance, updated_at, source_fact)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            region,
            info.address,
            info.controlling_faction,
            info.controlling_power,
            info.population.map(to_sql_int),
            info.security,
            info.government,
            info.allegiance,
            info.updated_at.timestamp_millis(),
            info.source_fact.map(|id| id.to_string()),
        ],
    )?;

    for faction in &snapshot.factions {
        conn.execute(
            "INSERT INTO region_factions (region, name, influence, state, allegiance, government,
                                          pending_states, active_states, recovering_states)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                region,
                faction.name,
                faction.influence,
                faction.state,
                faction.allegiance,
                faction.government,
                serde_json::to_string(&faction.pending_states)?,
                serde_json::to_string(&faction.active_states)?,
                serde_json::to_string(&faction.recovering_states)?,
            ],
        )?;
    }

    for conflict in &snapshot.conflicts {
        conn.execute(
            "INSERT INTO region_conflicts (region, war_type, status, faction_a, stake_a, won_days_a,
                                           faction_b, stake_b, won_days_b)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                region,
                conflict.war_type,
                conflict.status,
                conflict.side_a.name,
                conflict.side_a.stake,
                conflict.side_a.won_days,
                conflict.side_b.name,
                conflict.side_b.stake,
                conflict.side_b.won_days,
            ],
        )?;
    }

    for sphere in &snapshot.spheres {
        conn.execute(
            "INSERT INTO region_spheres (region, powers, powerplay_state, control_progress,
                                         reinforcement, undermining)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                region,
                serde_json::to_string(&sphere.powers)?,
                sphere.state,
                sphere.control_progress,
                sphere.reinforcement,
                sphere.undermining,
            ],
        )?;
    }

    Ok(())
}

fn load_region(conn: &Connection, region: &str) -> Result<Option<RegionSnapshot>, StoreError> {
    let info = conn
        .query_row(
            "SELECT address, controlling_faction, controlling_power, population, security,
                    government, allegiance, updated_at, source_fact
             FROM region_info WHERE region = ?1",
            params![region],
            |row| {
                Ok((
                    row.get::<_, Option<i64>>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, i64>(7)?,
                    row.get::<_, Option<String>>(8)?,
                ))
            },
        )
        .optional()?;

    let Some((address, faction, power, population, security, government, allegiance, updated, source)) = info
    else {
        return Ok(None);
    };

    let updated_at = DateTime::from_timestamp_millis(updated)
        .ok_or_else(|| StoreError::Corrupt(format!("region {region} updated_at")))?;
    let source_fact = source
        .map(|s| {
            Uuid::parse_str(&s)
                .map(FactId)
                .map_err(|e| StoreError::Corrupt(format!("region {region} source fact: {e}")))
        })
        .transpose()?;

    Ok(Some(RegionSnapshot {
        info: SystemInfo {
            region: region.to_string(),
            address,
            controlling_faction: faction,
            controlling_power: power,
            population: population.and_then(|p| u64::try_from(p).ok()),
            security,
            government,
            allegiance,
            updated_at,
            source_fact,
        },
        factions: load_factions(conn, region)?,
        conflicts: load_conflicts(conn, region)?,
        spheres: load_spheres(conn, region)?,
    }))
}

fn load_factions(conn: &Connection, region: &str) -> Result<Vec<FactionPresence>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT name, influence, state, allegiance, government,
                pending_states, active_states, recovering_states
         FROM region_factions WHERE region = ?1 ORDER BY rowid",
    )?;
    let rows = stmt.query_map(params![region], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, f64>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, Option<String>>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, String>(6)?,
            row.get::<_, String>(7)?,
        ))
    })?;

    let mut factions = Vec::new();
    for row in rows {
        let (name, influence, state, allegiance, government, pending, active, recovering) = row?;
        factions.push(FactionPresence {
            name,
            influence,
            state,
            allegiance,
            government,
            pending_states: decode_states(&pending)?,
            active_states: decode_states(&active)?,
            recovering_states: decode_states(&recovering)?,
        });
    }
    Ok(factions)
}

fn decode_states(raw: &str) -> Result<Vec<StateEntry>, StoreError> {
    Ok(serde_json::from_str(raw)?)
}

fn load_conflicts(conn: &Connection, region: &str) -> Result<Vec<ConflictPair>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT war_type, status, faction_a, stake_a, won_days_a, faction_b, stake_b, won_days_b
         FROM region_conflicts WHERE region = ?1 ORDER BY rowid",
    )?;
    let rows = stmt.query_map(params![region], |row| {
        Ok(ConflictPair {
            war_type: row.get(0)?,
            status: row.get(1)?,
            side_a: ConflictSide {
                name: row.get(2)?,
                stake: row.get(3)?,
                won_days: row.get(4)?,
            },
            side_b: ConflictSide {
                name: row.get(5)?,
                stake: row.get(6)?,
                won_days: row.get(7)?,
            },
        })
    })?;
    Ok(rows.collect::<Result<_, _>>()?)
}

fn load_spheres(conn: &Connection, region: &str) -> Result<Vec<InfluenceSphere>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT powers, powerplay_state, control_progress, reinforcement, undermining
         FROM region_spheres WHERE region = ?1 ORDER BY rowid",
    )?;
    let rows = stmt.query_map(params![region], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, Option<f64>>(2)?,
            row.get::<_, Option<f64>>(3)?,
            row.get::<_, Option<f64>>(4)?,
        ))
    })?;

    let mut spheres = Vec::new();
    for row in rows {
        let (powers, state, control_progress, reinforcement, undermining) = row?;
        spheres.push(InfluenceSphere {
            powers: serde_json::from_str(&powers)?,
            state,
            control_progress,
            reinforcement,
            undermining,
        });
    }
    Ok(spheres)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{conflict, faction};
    use chrono::Utc;

    fn snapshot(region: &str) -> RegionSnapshot {
        RegionSnapshot {
            info: SystemInfo {
                region: region.to_string(),
                address: Some(7),
                controlling_faction: None,
                controlling_power: None,
                population: Some(1_000),
                security: None,
                government: None,
                allegiance: None,
                updated_at: DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap(),
                source_fact: Some(FactId::new()),
            },
            factions: Vec::new(),
            conflicts: Vec::new(),
            spheres: Vec::new(),
        }
    }

    fn store() -> RegionStore {
        RegionStore::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn test_replace_then_get() {
        let store = store();
        let mut snap = snapshot("Sol");
        snap.factions = vec![faction("Mother Gaia", 0.6, "Boom")];
        snap.conflicts = vec![conflict("election", "A", "B")];
        snap.spheres = vec![InfluenceSphere {
            powers: vec!["Archer".to_string()],
            state: Some("Stronghold".to_string()),
            control_progress: Some(0.5),
            ..Default::default()
        }];

        store.replace(&snap).unwrap();
        assert_eq!(store.get("Sol").unwrap(), Some(snap));
        assert!(store.get("Lave").unwrap().is_none());
    }

    #[test]
    fn test_replace_is_idempotent() {
        let store = store();
        let mut snap = snapshot("Sol");
        snap.factions = vec![faction("A", 0.5, "None"), faction("B", 0.5, "War")];

        store.replace(&snap).unwrap();
        store.replace(&snap).unwrap();

        let loaded = store.get("Sol").unwrap().unwrap();
        assert_eq!(loaded.factions.len(), 2);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_replace_is_lossy() {
        let store = store();
        let mut snap = snapshot("Sol");
        snap.factions = vec![
            faction("A", 0.3, "None"),
            faction("B", 0.3, "None"),
            faction("C", 0.4, "None"),
        ];
        store.replace(&snap).unwrap();

        snap.factions.clear();
        store.replace(&snap).unwrap();
        assert!(store.get("Sol").unwrap().unwrap().factions.is_empty());
    }

    #[test]
    fn test_query_intersects_filters() {
        let store = store();

        let mut sol = snapshot("Sol");
        sol.info.controlling_faction = Some("Mother Gaia".to_string());
        sol.info.population = Some(22_780_919_531);
        sol.factions = vec![faction("Mother Gaia", 0.6, "Boom")];
        sol.conflicts = vec![conflict("war", "Mother Gaia", "Sol Workers")];
        store.replace(&sol).unwrap();

        let mut lave = snapshot("Lave");
        lave.factions = vec![faction("Mother Gaia", 0.1, "None")];
        lave.spheres = vec![InfluenceSphere {
            powers: vec!["Archer".to_string(), "Winters".to_string()],
            state: Some("Exploited".to_string()),
            ..Default::default()
        }];
        store.replace(&lave).unwrap();

        let all = store.query(&RegionFilter::new()).unwrap();
        assert_eq!(all.len(), 2);

        let present = store.query(&RegionFilter::new().with_faction("Mother Gaia")).unwrap();
        assert_eq!(present.len(), 2);

        let fighting = store
            .query(&RegionFilter::new().with_faction("Mother Gaia").in_conflict())
            .unwrap();
        assert_eq!(fighting.into_iter().collect::<Vec<_>>(), vec!["Sol"]);

        let booming = store.query(&RegionFilter::new().with_faction_state("Boom")).unwrap();
        assert!(booming.contains("Sol"));
        assert!(!booming.contains("Lave"));

        let winters = store.query(&RegionFilter::new().with_power("Winters")).unwrap();
        assert_eq!(winters.into_iter().collect::<Vec<_>>(), vec!["Lave"]);

        let exploited = store
            .query(&RegionFilter::new().with_powerplay_state("Exploited"))
            .unwrap();
        assert!(exploited.contains("Lave"));

        let big = store
            .query(&RegionFilter::new().with_population(PopulationFilter::Range {
                min: 1_000_000,
                max: u64::MAX,
            }))
            .unwrap();
        assert_eq!(big.into_iter().collect::<Vec<_>>(), vec!["Sol"]);

        let exact = store
            .query(&RegionFilter::new().with_population(PopulationFilter::Exact(1_000)))
            .unwrap();
        assert_eq!(exact.into_iter().collect::<Vec<_>>(), vec!["Lave"]);

        let controlled = store
            .query(&RegionFilter::new().with_controlling_faction("Mother Gaia"))
            .unwrap();
        assert_eq!(controlled.len(), 1);

        let nobody = store
            .query(&RegionFilter::new().with_controlling_power("Nobody"))
            .unwrap();
        assert!(nobody.is_empty());
    }
}
