//! Duplicate cluster repository.
//!
//! # Invariants
//! - Members and pairs are append-only; a decision only changes status,
//!   survivor and decision metadata.
//! - Absorbing only applies to an `unresolved` cluster.
//! - Listings are ordered by `(created_at, cluster_uuid)`.

use crate::error::{CoreError, CoreResult};
use crate::model::cluster::{sort_pairs, ClusterId, ClusterStatus, DuplicateCluster, PairScore};
use crate::repo::{ensure_updated, parse_optional_uuid, parse_uuid};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

pub trait ClusterRepository {
    fn insert(&self, cluster: &DuplicateCluster) -> CoreResult<()>;
    /// Adds members and pairs to an existing cluster; duplicates are ignored.
    fn extend(&self, cluster_id: ClusterId, pairs: &[PairScore]) -> CoreResult<()>;
    fn get(&self, id: ClusterId) -> CoreResult<Option<DuplicateCluster>>;
    fn list_by_status(&self, status: ClusterStatus) -> CoreResult<Vec<DuplicateCluster>>;
    /// Unresolved clusters containing any of `reference_ids`.
    fn unresolved_containing(&self, reference_ids: &[Uuid]) -> CoreResult<Vec<DuplicateCluster>>;
    fn record_decision(&self, cluster: &DuplicateCluster) -> CoreResult<()>;
    /// Marks an unresolved cluster as folded into `into`.
    fn absorb(&self, cluster_id: ClusterId, into: ClusterId, at: i64) -> CoreResult<()>;
}

pub struct SqliteClusterRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteClusterRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn load_members(&self, cluster_id: &str) -> CoreResult<Vec<Uuid>> {
        let mut stmt = self.conn.prepare(
            "SELECT reference_uuid FROM cluster_members
             WHERE cluster_uuid = ?1 ORDER BY reference_uuid ASC;",
        )?;
        let rows = stmt.query_map([cluster_id], |row| row.get::<_, String>(0))?;
        let mut members = Vec::new();
        for row in rows {
            members.push(parse_uuid(&row?)?);
        }
        members.sort();
        Ok(members)
    }

    fn load_pairs(&self, cluster_id: &str) -> CoreResult<Vec<PairScore>> {
        let mut stmt = self.conn.prepare(
            "SELECT reference_a, reference_b, score, certain FROM cluster_pairs
             WHERE cluster_uuid = ?1;",
        )?;
        let rows = stmt.query_map([cluster_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;
        let mut pairs = Vec::new();
        for row in rows {
            let (a, b, score, certain) = row?;
            pairs.push(PairScore::new(
                parse_uuid(&a)?,
                parse_uuid(&b)?,
                score,
                certain != 0,
            ));
        }
        sort_pairs(&mut pairs);
        Ok(pairs)
    }

    fn load(&self, header: ClusterHeader) -> CoreResult<DuplicateCluster> {
        let status = ClusterStatus::parse(&header.status).ok_or_else(|| {
            CoreError::InvalidData(format!("unknown cluster status `{}`", header.status))
        })?;
        Ok(DuplicateCluster {
            id: parse_uuid(&header.cluster_uuid)?,
            status,
            members: self.load_members(&header.cluster_uuid)?,
            pairs: self.load_pairs(&header.cluster_uuid)?,
            survivor: parse_optional_uuid(header.survivor_uuid)?,
            absorbed_into: parse_optional_uuid(header.absorbed_into)?,
            decided_by: header.decided_by,
            decided_at: header.decided_at,
            created_at: header.created_at,
        })
    }

    fn load_all(&self, sql: &str, params: impl rusqlite::Params) -> CoreResult<Vec<DuplicateCluster>> {
        let mut stmt = self.conn.prepare(sql)?;
        let headers = stmt
            .query_map(params, ClusterHeader::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        headers.into_iter().map(|header| self.load(header)).collect()
    }
}

impl ClusterRepository for SqliteClusterRepository<'_> {
    fn insert(&self, cluster: &DuplicateCluster) -> CoreResult<()> {
        self.conn.execute(
            "INSERT INTO duplicate_clusters (
                cluster_uuid, status, survivor_uuid, absorbed_into, decided_by, decided_at,
                created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                cluster.id.to_string(),
                cluster.status.as_str(),
                cluster.survivor.map(|id| id.to_string()),
                cluster.absorbed_into.map(|id| id.to_string()),
                cluster.decided_by,
                cluster.decided_at,
                cluster.created_at,
            ],
        )?;
        self.extend(cluster.id, &cluster.pairs)?;
        for member in &cluster.members {
            self.conn.execute(
                "INSERT OR IGNORE INTO cluster_members (cluster_uuid, reference_uuid)
                 VALUES (?1, ?2);",
                params![cluster.id.to_string(), member.to_string()],
            )?;
        }
        Ok(())
    }

    fn extend(&self, cluster_id: ClusterId, pairs: &[PairScore]) -> CoreResult<()> {
        let id = cluster_id.to_string();
        for pair in pairs {
            for member in [pair.a, pair.b] {
                self.conn.execute(
                    "INSERT OR IGNORE INTO cluster_members (cluster_uuid, reference_uuid)
                     VALUES (?1, ?2);",
                    params![id, member.to_string()],
                )?;
            }
            self.conn.execute(
                "INSERT OR IGNORE INTO cluster_pairs (
                    cluster_uuid, reference_a, reference_b, score, certain
                 ) VALUES (?1, ?2, ?3, ?4, ?5);",
                params![
                    id,
                    pair.a.to_string(),
                    pair.b.to_string(),
                    pair.score,
                    i64::from(pair.certain),
                ],
            )?;
        }
        Ok(())
    }

    fn get(&self, id: ClusterId) -> CoreResult<Option<DuplicateCluster>> {
        let header = self
            .conn
            .query_row(
                "SELECT cluster_uuid, status, survivor_uuid, absorbed_into, decided_by, decided_at,
                        created_at
                 FROM duplicate_clusters WHERE cluster_uuid = ?1;",
                [id.to_string()],
                ClusterHeader::from_row,
            )
            .optional()?;
        header.map(|header| self.load(header)).transpose()
    }

    fn list_by_status(&self, status: ClusterStatus) -> CoreResult<Vec<DuplicateCluster>> {
        self.load_all(
            "SELECT cluster_uuid, status, survivor_uuid, absorbed_into, decided_by, decided_at,
                        created_at
             FROM duplicate_clusters WHERE status = ?1
             ORDER BY created_at ASC, cluster_uuid ASC;",
            [status.as_str()],
        )
    }

    fn unresolved_containing(&self, reference_ids: &[Uuid]) -> CoreResult<Vec<DuplicateCluster>> {
        let mut found: Vec<DuplicateCluster> = Vec::new();
        for reference_id in reference_ids {
            let clusters = self.load_all(
                "SELECT c.cluster_uuid, c.status, c.survivor_uuid, c.absorbed_into,
                        c.decided_by, c.decided_at, c.created_at
                 FROM duplicate_clusters c
                 INNER JOIN cluster_members m ON m.cluster_uuid = c.cluster_uuid
                 WHERE m.reference_uuid = ?1 AND c.status = 'unresolved'
                 ORDER BY c.created_at ASC, c.cluster_uuid ASC;",
                [reference_id.to_string()],
            )?;
            for cluster in clusters {
                if !found.iter().any(|known| known.id == cluster.id) {
                    found.push(cluster);
                }
            }
        }
        found.sort_by(|left, right| {
            (left.created_at, left.id).cmp(&(right.created_at, right.id))
        });
        Ok(found)
    }

    fn record_decision(&self, cluster: &DuplicateCluster) -> CoreResult<()> {
        let changed = self.conn.execute(
            "UPDATE duplicate_clusters
             SET status = ?2, survivor_uuid = ?3, decided_by = ?4, decided_at = ?5
             WHERE cluster_uuid = ?1;",
            params![
                cluster.id.to_string(),
                cluster.status.as_str(),
                cluster.survivor.map(|id| id.to_string()),
                cluster.decided_by,
                cluster.decided_at,
            ],
        )?;
        ensure_updated(changed, "cluster", cluster.id)
    }

    fn absorb(&self, cluster_id: ClusterId, into: ClusterId, at: i64) -> CoreResult<()> {
        let changed = self.conn.execute(
            "UPDATE duplicate_clusters
             SET status = 'absorbed', absorbed_into = ?2, decided_at = ?3
             WHERE cluster_uuid = ?1 AND status = 'unresolved';",
            params![cluster_id.to_string(), into.to_string(), at],
        )?;
        ensure_updated(changed, "cluster", cluster_id)
    }
}

struct ClusterHeader {
    cluster_uuid: String,
    status: String,
    survivor_uuid: Option<String>,
    absorbed_into: Option<String>,
    decided_by: Option<String>,
    decided_at: Option<i64>,
    created_at: i64,
}

impl ClusterHeader {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            cluster_uuid: row.get(0)?,
            status: row.get(1)?,
            survivor_uuid: row.get(2)?,
            absorbed_into: row.get(3)?,
            decided_by: row.get(4)?,
            decided_at: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}
