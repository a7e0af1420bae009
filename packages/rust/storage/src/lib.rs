//! Turso Embedded / libSQL storage layer.
//!
//! The [`Storage`] struct wraps a libSQL database holding discovered entities,
//! the per-stage enrichment ledger, and field provenance.
//!
//! **Write rules:**
//! - Discovery inserts are insert-if-absent; an existing identity key is never overwritten.
//! - Enrichment results land through [`Storage::commit_entity`], one transaction per entity.
//! - All writes are serialized through a single write lock, so the store can be
//!   shared across worker tasks behind an `Arc`.

mod migrations;

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, Value, params};
use sourcing_shared::{
    Entity, Field, IdentityKey, ProcessingStatus, Provenance, Result, RiskSignal, ScoreCard,
    SourcingError, StageRecord, StageState,
};
use tokio::sync::Mutex;

/// Columns selected for every entity read, in [`row_to_entity`] order.
const ENTITY_COLUMNS: &str = "key, name, website, phone, address, city, state, zip, country, \
     directory_rating, directory_reviews, owner_tag, description, linkedin_company_url, \
     owner_linkedin_url, facebook_url, instagram_url, twitter_url, youtube_url, is_ecommerce, \
     tech_stack_json, industry_tag, legal_name, naics_code, naics_description, customer_type, \
     revenue_model, is_family_owned, is_franchise, owner_name, owner_source, contact_email, \
     employee_count, revenue_estimate, risk_signal_json, status, score, score_breakdown_json, \
     created_at, updated_at, last_enriched_at";

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
    write_lock: Mutex<()>,
}

/// Everything one enrichment pass changed on one entity.
#[derive(Debug, Clone, Copy)]
pub struct EntityCommit<'a> {
    /// The merged record (status and score already decided).
    pub entity: &'a Entity,
    /// Fields written during this pass; their provenance is taken from `entity`.
    pub changed: &'a [Field],
    /// Ledger rows for the stages attempted during this pass.
    pub stages: &'a [StageRecord],
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SourcingError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| SourcingError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| SourcingError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
            write_lock: Mutex::new(()),
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode (for `list` / `show`).
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| SourcingError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| SourcingError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
            write_lock: Mutex::new(()),
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        SourcingError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(SourcingError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Discovery writes
    // -----------------------------------------------------------------------

    /// Insert a newly discovered entity unless its identity key already exists.
    ///
    /// Returns `true` when a row was inserted, `false` for a duplicate. The
    /// existing row is never touched.
    pub async fn insert_entity_if_absent(&self, entity: &Entity) -> Result<bool> {
        self.check_writable()?;
        let _guard = self.write_lock.lock().await;
        let now = Utc::now().to_rfc3339();
        let inserted = self
            .conn
            .execute(
                "INSERT INTO entities (key, name, website, phone, address, city, state, zip, country,
                                       directory_rating, directory_reviews, owner_tag, status,
                                       created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                 ON CONFLICT(key) DO NOTHING",
                params![
                    entity.key.to_string(),
                    entity.name.as_str(),
                    entity.website.as_deref(),
                    entity.phone.as_deref(),
                    entity.address.as_deref(),
                    entity.city.as_deref(),
                    entity.state.as_deref(),
                    entity.zip.as_deref(),
                    entity.country.as_deref(),
                    entity.directory_rating,
                    entity.directory_reviews,
                    entity.owner_tag.as_deref(),
                    ProcessingStatus::Unprocessed.as_str(),
                    now.as_str(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(|e| SourcingError::Storage(e.to_string()))?;
        Ok(inserted > 0)
    }

    // -----------------------------------------------------------------------
    // Entity reads
    // -----------------------------------------------------------------------

    /// Get an entity (with provenance) by identity key.
    pub async fn get_entity(&self, key: &IdentityKey) -> Result<Option<Entity>> {
        let sql = format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE key = ?1");
        let mut rows = self
            .conn
            .query(&sql, params![key.to_string()])
            .await
            .map_err(|e| SourcingError::Storage(e.to_string()))?;

        let entity = match rows.next().await {
            Ok(Some(row)) => row_to_entity(&row)?,
            Ok(None) => return Ok(None),
            Err(e) => return Err(SourcingError::Storage(e.to_string())),
        };
        Ok(Some(self.with_provenance(entity).await?))
    }

    /// Entities due for enrichment: `unprocessed` or `partial`, never-enriched
    /// first, then least recently enriched, bounded by `limit`.
    ///
    /// With a non-empty `plan`, entities whose every plan stage is settled
    /// (succeeded, or failed without being retryable) are left out.
    pub async fn list_due(&self, plan: &[&str], limit: Option<u32>) -> Result<Vec<Entity>> {
        let mut values: Vec<Value> = vec![
            Value::Text(ProcessingStatus::Unprocessed.as_str().into()),
            Value::Text(ProcessingStatus::Partial.as_str().into()),
            Value::Integer(limit.map(i64::from).unwrap_or(-1)),
        ];

        let settled_filter = if plan.is_empty() {
            String::new()
        } else {
            values.push(Value::Text(StageState::Succeeded.as_str().into()));
            values.push(Value::Integer(plan.len() as i64));
            values.push(Value::Integer(0));
            let first = values.len() + 1;
            let placeholders = (first..first + plan.len())
                .map(|i| format!("?{i}"))
                .collect::<Vec<_>>()
                .join(", ");
            values.extend(plan.iter().map(|stage| Value::Text((*stage).to_string())));
            format!(
                "AND (SELECT COUNT(*) FROM stage_runs r
                      WHERE r.entity_key = entities.key AND r.stage IN ({placeholders})
                        AND (r.state = ?4 OR r.retryable = ?6)) < ?5"
            )
        };

        let sql = format!(
            "SELECT {ENTITY_COLUMNS} FROM entities
             WHERE status IN (?1, ?2) {settled_filter}
             ORDER BY last_enriched_at IS NOT NULL, last_enriched_at, created_at, key
             LIMIT ?3"
        );
        self.query_entities(&sql, values).await
    }

    /// Entities for display: optional status filter, best score first.
    pub async fn list_entities(
        &self,
        status: Option<ProcessingStatus>,
        limit: Option<u32>,
    ) -> Result<Vec<Entity>> {
        let limit = Value::Integer(limit.map(i64::from).unwrap_or(-1));
        match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {ENTITY_COLUMNS} FROM entities WHERE status = ?1
                     ORDER BY score IS NULL, score DESC, name LIMIT ?2"
                );
                self.query_entities(&sql, vec![Value::Text(status.as_str().into()), limit])
                    .await
            }
            None => {
                let sql = format!(
                    "SELECT {ENTITY_COLUMNS} FROM entities
                     ORDER BY score IS NULL, score DESC, name LIMIT ?1"
                );
                self.query_entities(&sql, vec![limit]).await
            }
        }
    }

    /// Every identity key in the store.
    pub async fn list_keys(&self) -> Result<Vec<IdentityKey>> {
        let mut rows = self
            .conn
            .query("SELECT key FROM entities ORDER BY created_at, key", params![])
            .await
            .map_err(|e| SourcingError::Storage(e.to_string()))?;

        let mut keys = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| SourcingError::Storage(e.to_string()))?
        {
            let raw: String = row
                .get(0)
                .map_err(|e| SourcingError::Storage(e.to_string()))?;
            keys.push(parse_key(&raw)?);
        }
        Ok(keys)
    }

    /// Number of entities per processing status.
    pub async fn status_counts(&self) -> Result<BTreeMap<ProcessingStatus, u64>> {
        let mut rows = self
            .conn
            .query(
                "SELECT status, COUNT(*) FROM entities GROUP BY status",
                params![],
            )
            .await
            .map_err(|e| SourcingError::Storage(e.to_string()))?;

        let mut counts = BTreeMap::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| SourcingError::Storage(e.to_string()))?
        {
            let status: String = row
                .get(0)
                .map_err(|e| SourcingError::Storage(e.to_string()))?;
            let count: i64 = row
                .get(1)
                .map_err(|e| SourcingError::Storage(e.to_string()))?;
            counts.insert(ProcessingStatus::from_str(&status)?, count as u64);
        }
        Ok(counts)
    }

    async fn query_entities(&self, sql: &str, values: Vec<Value>) -> Result<Vec<Entity>> {
        let mut rows = self
            .conn
            .query(sql, libsql::params_from_iter(values))
            .await
            .map_err(|e| SourcingError::Storage(e.to_string()))?;

        let mut entities = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| SourcingError::Storage(e.to_string()))?
        {
            entities.push(row_to_entity(&row)?);
        }

        let mut results = Vec::with_capacity(entities.len());
        for entity in entities {
            results.push(self.with_provenance(entity).await?);
        }
        Ok(results)
    }

    async fn with_provenance(&self, mut entity: Entity) -> Result<Entity> {
        let mut rows = self
            .conn
            .query(
                "SELECT field, stage, confidence, evidence, recorded_at
                 FROM provenance WHERE entity_key = ?1",
                params![entity.key.to_string()],
            )
            .await
            .map_err(|e| SourcingError::Storage(e.to_string()))?;

        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| SourcingError::Storage(e.to_string()))?
        {
            let column: String = row
                .get(0)
                .map_err(|e| SourcingError::Storage(e.to_string()))?;
            let Some(field) = Field::from_column(&column) else {
                tracing::warn!(entity = %entity.key, column, "ignoring provenance for unknown field");
                continue;
            };
            let recorded_at: String = row
                .get(4)
                .map_err(|e| SourcingError::Storage(e.to_string()))?;
            entity.provenance.insert(
                field,
                Provenance {
                    stage: row
                        .get::<String>(1)
                        .map_err(|e| SourcingError::Storage(e.to_string()))?,
                    confidence: row.get::<f64>(2).ok(),
                    evidence: row.get::<String>(3).ok(),
                    recorded_at: parse_time(&recorded_at)?,
                },
            );
        }
        Ok(entity)
    }

    // -----------------------------------------------------------------------
    // Stage ledger
    // -----------------------------------------------------------------------

    /// Ledger rows for one entity, keyed by stage name.
    pub async fn stage_records(&self, key: &IdentityKey) -> Result<BTreeMap<String, StageRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT stage, state, attempts, last_error, retryable, last_attempt_at
                 FROM stage_runs WHERE entity_key = ?1",
                params![key.to_string()],
            )
            .await
            .map_err(|e| SourcingError::Storage(e.to_string()))?;

        let mut records = BTreeMap::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| SourcingError::Storage(e.to_string()))?
        {
            let stage: String = row
                .get(0)
                .map_err(|e| SourcingError::Storage(e.to_string()))?;
            let state: String = row
                .get(1)
                .map_err(|e| SourcingError::Storage(e.to_string()))?;
            let last_attempt_at: String = row
                .get(5)
                .map_err(|e| SourcingError::Storage(e.to_string()))?;
            let record = StageRecord {
                stage: stage.clone(),
                state: StageState::from_str(&state)?,
                attempts: row.get::<u32>(2).unwrap_or(0),
                last_error: row.get::<String>(3).ok(),
                retryable: row.get::<i64>(4).unwrap_or(0) != 0,
                last_attempt_at: parse_time(&last_attempt_at)?,
            };
            records.insert(stage, record);
        }
        Ok(records)
    }

    // -----------------------------------------------------------------------
    // Enrichment writes
    // -----------------------------------------------------------------------

    /// Persist one entity's enrichment pass atomically: changed field columns,
    /// status, score and breakdown, ledger rows, and provenance for every
    /// changed field. Either all of it lands or none of it does.
    pub async fn commit_entity(&self, commit: EntityCommit<'_>) -> Result<()> {
        self.check_writable()?;
        let _guard = self.write_lock.lock().await;
        let entity = commit.entity;
        let key = entity.key.to_string();
        let now = Utc::now().to_rfc3339();

        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| SourcingError::Storage(e.to_string()))?;

        // Entity row: dynamic SET over the changed columns plus bookkeeping.
        let mut assignments = Vec::with_capacity(commit.changed.len() + 5);
        let mut values = Vec::with_capacity(commit.changed.len() + 6);
        for field in commit.changed {
            values.push(field_value(entity, *field)?);
            assignments.push(format!("{} = ?{}", field.column(), values.len()));
        }
        for (column, value) in [
            ("status", Value::Text(entity.status.as_str().into())),
            (
                "score",
                entity.score.map_or(Value::Null, |s| Value::Integer(i64::from(s))),
            ),
            ("score_breakdown_json", json_value(entity.score_card.as_ref())?),
            ("updated_at", Value::Text(now.clone())),
            (
                "last_enriched_at",
                Value::Text(
                    entity
                        .last_enriched_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| now.clone()),
                ),
            ),
        ] {
            values.push(value);
            assignments.push(format!("{column} = ?{}", values.len()));
        }
        values.push(Value::Text(key.clone()));
        let sql = format!(
            "UPDATE entities SET {} WHERE key = ?{}",
            assignments.join(", "),
            values.len()
        );

        let updated = tx
            .execute(&sql, libsql::params_from_iter(values))
            .await
            .map_err(|e| SourcingError::Storage(e.to_string()))?;
        if updated == 0 {
            return Err(SourcingError::Storage(format!("entity {key} not found")));
        }

        for record in commit.stages {
            tx.execute(
                "INSERT INTO stage_runs (entity_key, stage, state, attempts, last_error, retryable, last_attempt_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(entity_key, stage) DO UPDATE SET
                   state = excluded.state,
                   attempts = excluded.attempts,
                   last_error = excluded.last_error,
                   retryable = excluded.retryable,
                   last_attempt_at = excluded.last_attempt_at",
                params![
                    key.as_str(),
                    record.stage.as_str(),
                    record.state.as_str(),
                    i64::from(record.attempts),
                    record.last_error.as_deref(),
                    i64::from(record.retryable),
                    record.last_attempt_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| SourcingError::Storage(e.to_string()))?;
        }

        for field in commit.changed {
            let Some(prov) = entity.provenance.get(field) else {
                continue;
            };
            tx.execute(
                "INSERT INTO provenance (entity_key, field, stage, confidence, evidence, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(entity_key, field) DO UPDATE SET
                   stage = excluded.stage,
                   confidence = excluded.confidence,
                   evidence = excluded.evidence,
                   recorded_at = excluded.recorded_at",
                params![
                    key.as_str(),
                    field.column(),
                    prov.stage.as_str(),
                    prov.confidence,
                    prov.evidence.as_deref(),
                    prov.recorded_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| SourcingError::Storage(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| SourcingError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Replace an entity's score and breakdown without touching anything else.
    pub async fn update_score(&self, key: &IdentityKey, card: &ScoreCard) -> Result<()> {
        self.check_writable()?;
        let _guard = self.write_lock.lock().await;
        let breakdown =
            serde_json::to_string(card).map_err(|e| SourcingError::parse(e.to_string()))?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE entities SET score = ?1, score_breakdown_json = ?2, updated_at = ?3
                 WHERE key = ?4",
                params![
                    i64::from(card.total),
                    breakdown,
                    now.as_str(),
                    key.to_string()
                ],
            )
            .await
            .map_err(|e| SourcingError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Record a hand-entered value. Enrichers will not overwrite it.
    pub async fn set_manual_value(
        &self,
        key: &IdentityKey,
        update: sourcing_shared::FieldUpdate,
    ) -> Result<()> {
        let Some(mut entity) = self.get_entity(key).await? else {
            return Err(SourcingError::validation(format!("no entity with key {key}")));
        };
        let field = update.field();
        entity.apply(update);
        entity.provenance.insert(
            field,
            Provenance {
                stage: sourcing_shared::MANUAL_SOURCE.into(),
                confidence: None,
                evidence: None,
                recorded_at: Utc::now(),
            },
        );
        self.commit_entity(EntityCommit {
            entity: &entity,
            changed: &[field],
            stages: &[],
        })
        .await
    }

    /// Move one `complete` entity back to `partial` so the next batch selects it.
    /// Returns `false` if the entity was not complete.
    pub async fn reopen(&self, key: &IdentityKey) -> Result<bool> {
        self.check_writable()?;
        let _guard = self.write_lock.lock().await;
        let changed = self
            .conn
            .execute(
                "UPDATE entities SET status = 'partial', updated_at = ?1
                 WHERE key = ?2 AND status = 'complete'",
                params![Utc::now().to_rfc3339(), key.to_string()],
            )
            .await
            .map_err(|e| SourcingError::Storage(e.to_string()))?;
        Ok(changed > 0)
    }

    /// Reopen every `complete` entity. Returns how many moved.
    pub async fn reopen_all(&self) -> Result<u64> {
        self.check_writable()?;
        let _guard = self.write_lock.lock().await;
        self.conn
            .execute(
                "UPDATE entities SET status = 'partial', updated_at = ?1 WHERE status = 'complete'",
                params![Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| SourcingError::Storage(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Row and value mapping
// ---------------------------------------------------------------------------

/// Column value for one enrichable field of `entity`.
fn field_value(entity: &Entity, field: Field) -> Result<Value> {
    fn text(v: &Option<String>) -> Value {
        v.clone().map_or(Value::Null, Value::Text)
    }
    fn flag(v: Option<bool>) -> Value {
        v.map_or(Value::Null, |b| Value::Integer(i64::from(b)))
    }
    fn int(v: Option<i64>) -> Value {
        v.map_or(Value::Null, Value::Integer)
    }

    Ok(match field {
        Field::Website => text(&entity.website),
        Field::Description => text(&entity.description),
        Field::LinkedinCompanyUrl => text(&entity.linkedin_company_url),
        Field::OwnerLinkedinUrl => text(&entity.owner_linkedin_url),
        Field::FacebookUrl => text(&entity.facebook_url),
        Field::InstagramUrl => text(&entity.instagram_url),
        Field::TwitterUrl => text(&entity.twitter_url),
        Field::YoutubeUrl => text(&entity.youtube_url),
        Field::IsEcommerce => flag(entity.is_ecommerce),
        Field::TechStack => json_value(Some(&entity.tech_stack))?,
        Field::IndustryTag => text(&entity.industry_tag),
        Field::LegalName => text(&entity.legal_name),
        Field::NaicsCode => text(&entity.naics_code),
        Field::NaicsDescription => text(&entity.naics_description),
        Field::CustomerType => text(&entity.customer_type),
        Field::RevenueModel => text(&entity.revenue_model),
        Field::IsFamilyOwned => flag(entity.is_family_owned),
        Field::IsFranchise => flag(entity.is_franchise),
        Field::OwnerName => text(&entity.owner_name),
        Field::OwnerSource => text(&entity.owner_source),
        Field::ContactEmail => text(&entity.contact_email),
        Field::EmployeeCount => int(entity.employee_count),
        Field::RevenueEstimate => int(entity.revenue_estimate),
        Field::RiskSignal => json_value(entity.risk_signal.as_ref())?,
    })
}

fn json_value<T: serde::Serialize>(value: Option<&T>) -> Result<Value> {
    match value {
        Some(v) => serde_json::to_string(v)
            .map(Value::Text)
            .map_err(|e| SourcingError::parse(e.to_string())),
        None => Ok(Value::Null),
    }
}

fn parse_key(raw: &str) -> Result<IdentityKey> {
    IdentityKey::from_str(raw)
        .map_err(|e| SourcingError::Storage(format!("invalid identity key '{raw}': {e}")))
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SourcingError::Storage(format!("invalid date: {e}")))
}

fn parse_json<T: serde::de::DeserializeOwned>(raw: Option<String>) -> Result<Option<T>> {
    raw.map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| SourcingError::Storage(format!("invalid JSON column: {e}")))
}

/// Convert a database row (selected with [`ENTITY_COLUMNS`]) to an [`Entity`].
fn row_to_entity(row: &libsql::Row) -> Result<Entity> {
    let key: String = row
        .get(0)
        .map_err(|e| SourcingError::Storage(e.to_string()))?;
    let name: String = row
        .get(1)
        .map_err(|e| SourcingError::Storage(e.to_string()))?;
    let status: String = row
        .get(35)
        .map_err(|e| SourcingError::Storage(e.to_string()))?;
    let created_at: String = row
        .get(38)
        .map_err(|e| SourcingError::Storage(e.to_string()))?;
    let updated_at: String = row
        .get(39)
        .map_err(|e| SourcingError::Storage(e.to_string()))?;
    let flag = |idx: i32| row.get::<i64>(idx).ok().map(|v| v != 0);

    let mut entity = Entity::new(parse_key(&key)?, name);
    entity.website = row.get::<String>(2).ok();
    entity.phone = row.get::<String>(3).ok();
    entity.address = row.get::<String>(4).ok();
    entity.city = row.get::<String>(5).ok();
    entity.state = row.get::<String>(6).ok();
    entity.zip = row.get::<String>(7).ok();
    entity.country = row.get::<String>(8).ok();
    entity.directory_rating = row.get::<f64>(9).ok();
    entity.directory_reviews = row.get::<i64>(10).ok();
    entity.owner_tag = row.get::<String>(11).ok();
    entity.description = row.get::<String>(12).ok();
    entity.linkedin_company_url = row.get::<String>(13).ok();
    entity.owner_linkedin_url = row.get::<String>(14).ok();
    entity.facebook_url = row.get::<String>(15).ok();
    entity.instagram_url = row.get::<String>(16).ok();
    entity.twitter_url = row.get::<String>(17).ok();
    entity.youtube_url = row.get::<String>(18).ok();
    entity.is_ecommerce = flag(19);
    entity.tech_stack = parse_json::<Vec<String>>(row.get::<String>(20).ok())?.unwrap_or_default();
    entity.industry_tag = row.get::<String>(21).ok();
    entity.legal_name = row.get::<String>(22).ok();
    entity.naics_code = row.get::<String>(23).ok();
    entity.naics_description = row.get::<String>(24).ok();
    entity.customer_type = row.get::<String>(25).ok();
    entity.revenue_model = row.get::<String>(26).ok();
    entity.is_family_owned = flag(27);
    entity.is_franchise = flag(28);
    entity.owner_name = row.get::<String>(29).ok();
    entity.owner_source = row.get::<String>(30).ok();
    entity.contact_email = row.get::<String>(31).ok();
    entity.employee_count = row.get::<i64>(32).ok();
    entity.revenue_estimate = row.get::<i64>(33).ok();
    entity.risk_signal = parse_json::<RiskSignal>(row.get::<String>(34).ok())?;
    entity.status = ProcessingStatus::from_str(&status)?;
    entity.score = row.get::<i64>(36).ok().map(|s| s.clamp(0, 100) as u8);
    entity.score_card = parse_json::<ScoreCard>(row.get::<String>(37).ok())?;
    entity.created_at = parse_time(&created_at)?;
    entity.updated_at = parse_time(&updated_at)?;
    entity.last_enriched_at = row
        .get::<String>(40)
        .ok()
        .map(|s| parse_time(&s))
        .transpose()?;
    Ok(entity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sourcing_shared::{FieldUpdate, MANUAL_SOURCE};
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("sourcing_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn sample(domain: &str) -> Entity {
        let mut entity = Entity::new(IdentityKey::from_domain(domain), format!("{domain} LLC"));
        entity.website = Some(format!("https://{domain}"));
        entity.city = Some("Austin".into());
        entity.state = Some("TX".into());
        entity.directory_rating = Some(4.7);
        entity.directory_reviews = Some(112);
        entity
    }

    fn record(stage: &str, state: StageState, attempts: u32) -> StageRecord {
        StageRecord {
            stage: stage.into(),
            state,
            attempts,
            last_error: (state == StageState::Failed).then(|| "timeout".to_string()),
            retryable: state == StageState::Failed,
            last_attempt_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        let version = storage.get_schema_version().await;
        assert_eq!(version, 2);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("sourcing_test_{}.db", Uuid::now_v7()));
        let _s1 = Storage::open(&tmp).await.expect("first open");
        drop(_s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn insert_if_absent_discards_duplicates() {
        let storage = test_storage().await;
        let first = sample("acme.com");
        assert!(storage.insert_entity_if_absent(&first).await.unwrap());

        let mut clash = sample("acme.com");
        clash.name = "Someone Else".into();
        assert!(!storage.insert_entity_if_absent(&clash).await.unwrap());

        let stored = storage.get_entity(&first.key).await.unwrap().unwrap();
        assert_eq!(stored.name, "acme.com LLC");
        assert_eq!(stored.status, ProcessingStatus::Unprocessed);
        assert_eq!(stored.directory_reviews, Some(112));

    }

    #[tokio::test]
    async fn list_due_respects_limit_and_status() {
        let storage = test_storage().await;
        for domain in ["a.com", "b.com", "c.com"] {
            storage.insert_entity_if_absent(&sample(domain)).await.unwrap();
        }

        assert_eq!(storage.list_due(&[], None).await.unwrap().len(), 3);
        assert_eq!(storage.list_due(&["domain"], Some(2)).await.unwrap().len(), 2);

        let mut done = sample("a.com");
        done.status = ProcessingStatus::Complete;
        storage
            .commit_entity(EntityCommit {
                entity: &done,
                changed: &[],
                stages: &[],
            })
            .await
            .unwrap();
        let due = storage.list_due(&[], None).await.unwrap();
        assert_eq!(due.len(), 2);
        assert!(due.iter().all(|e| e.key != done.key));
    }

    #[tokio::test]
    async fn list_due_prefers_least_recently_enriched_and_drops_settled() {
        let storage = test_storage().await;
        let mut settled = sample("settled.com");
        let mut retry = sample("retry.com");
        let fresh = sample("fresh.com");
        for entity in [&settled, &retry, &fresh] {
            storage.insert_entity_if_absent(entity).await.unwrap();
        }

        let earlier = Utc::now() - chrono::Duration::hours(2);
        settled.last_enriched_at = Some(earlier);
        let permanent = StageRecord {
            last_error: Some("no website listed".into()),
            retryable: false,
            ..record("domain", StageState::Failed, 1)
        };
        storage
            .commit_entity(EntityCommit {
                entity: &settled,
                changed: &[],
                stages: &[permanent],
            })
            .await
            .unwrap();

        retry.last_enriched_at = Some(earlier + chrono::Duration::hours(1));
        storage
            .commit_entity(EntityCommit {
                entity: &retry,
                changed: &[],
                stages: &[record("domain", StageState::Failed, 1)],
            })
            .await
            .unwrap();

        // Every plan stage of `settled` is final, so only the others are due.
        let due = storage.list_due(&["domain"], None).await.unwrap();
        let keys: Vec<_> = due.iter().map(|e| e.key.clone()).collect();
        assert_eq!(keys, vec![fresh.key.clone(), retry.key.clone()]);

        // A stage it never attempted makes it due again.
        let due = storage.list_due(&["domain", "industry"], None).await.unwrap();
        let keys: Vec<_> = due.iter().map(|e| e.key.clone()).collect();
        assert_eq!(keys, vec![fresh.key.clone(), settled.key.clone(), retry.key.clone()]);

        // Without a plan nothing is filtered.
        assert_eq!(storage.list_due(&[], Some(1)).await.unwrap()[0].key, fresh.key);
        assert_eq!(storage.list_due(&[], None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn unreadable_ledger_row_is_an_error() {
        let storage = test_storage().await;
        let entity = sample("acme.com");
        storage.insert_entity_if_absent(&entity).await.unwrap();
        storage
            .conn
            .execute(
                "INSERT INTO stage_runs (entity_key, stage, state, attempts, retryable, last_attempt_at)
                 VALUES (?1, 'domain', 'succeeded', 1, 0, 'yesterday-ish')",
                params![entity.key.to_string()],
            )
            .await
            .unwrap();

        assert!(storage.stage_records(&entity.key).await.is_err());
    }

    #[tokio::test]
    async fn commit_entity_writes_fields_ledger_and_provenance() {
        let storage = test_storage().await;
        let mut entity = sample("acme.com");
        storage.insert_entity_if_absent(&entity).await.unwrap();

        entity.apply(FieldUpdate::OwnerName("Jane Doe".into()));
        entity.apply(FieldUpdate::TechStack(vec!["Shopify".into()]));
        entity.apply(FieldUpdate::IsFranchise(false));
        entity.apply(FieldUpdate::RiskSignal(RiskSignal::clean("no local news")));
        for field in [Field::OwnerName, Field::TechStack] {
            entity.provenance.insert(
                field,
                Provenance {
                    stage: "ai_classifier".into(),
                    confidence: Some(0.8),
                    evidence: Some("Founded by Jane Doe".into()),
                    recorded_at: Utc::now(),
                },
            );
        }
        entity.status = ProcessingStatus::Partial;
        entity.score = Some(15);
        entity.score_card = Some(ScoreCard {
            actionability: 15,
            total: 15,
            ..Default::default()
        });

        let changed = [
            Field::OwnerName,
            Field::TechStack,
            Field::IsFranchise,
            Field::RiskSignal,
        ];
        let stages = [
            record("ai_classifier", StageState::Succeeded, 1),
            record("news", StageState::Failed, 1),
        ];
        storage
            .commit_entity(EntityCommit {
                entity: &entity,
                changed: &changed,
                stages: &stages,
            })
            .await
            .expect("commit");

        let stored = storage.get_entity(&entity.key).await.unwrap().unwrap();
        assert_eq!(stored.owner_name.as_deref(), Some("Jane Doe"));
        assert_eq!(stored.tech_stack, vec!["Shopify".to_string()]);
        assert_eq!(stored.is_franchise, Some(false));
        assert!(!stored.risk_signal.unwrap().is_alert());
        assert_eq!(stored.status, ProcessingStatus::Partial);
        assert_eq!(stored.score, Some(15));
        assert_eq!(stored.score_card.unwrap().actionability, 15);
        assert!(stored.last_enriched_at.is_some());

        let prov = &stored.provenance[&Field::OwnerName];
        assert_eq!(prov.stage, "ai_classifier");
        assert_eq!(prov.confidence, Some(0.8));

        let ledger = storage.stage_records(&entity.key).await.unwrap();
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger["ai_classifier"].state, StageState::Succeeded);
        assert_eq!(ledger["news"].last_error.as_deref(), Some("timeout"));
        assert!(ledger["news"].retryable);
    }

    #[tokio::test]
    async fn commit_for_unknown_entity_fails() {
        let storage = test_storage().await;
        let ghost = sample("ghost.com");
        let result = storage
            .commit_entity(EntityCommit {
                entity: &ghost,
                changed: &[],
                stages: &[],
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn manual_values_carry_manual_provenance() {
        let storage = test_storage().await;
        let entity = sample("acme.com");
        storage.insert_entity_if_absent(&entity).await.unwrap();

        storage
            .set_manual_value(&entity.key, FieldUpdate::RevenueEstimate(7_500_000))
            .await
            .unwrap();

        let stored = storage.get_entity(&entity.key).await.unwrap().unwrap();
        assert_eq!(stored.revenue_estimate, Some(7_500_000));
        assert!(stored.is_manual(Field::RevenueEstimate));
        assert_eq!(stored.provenance[&Field::RevenueEstimate].stage, MANUAL_SOURCE);
    }

    #[tokio::test]
    async fn reopen_only_moves_complete() {
        let storage = test_storage().await;
        let mut done = sample("done.com");
        let fresh = sample("fresh.com");
        storage.insert_entity_if_absent(&done).await.unwrap();
        storage.insert_entity_if_absent(&fresh).await.unwrap();

        done.status = ProcessingStatus::Complete;
        storage
            .commit_entity(EntityCommit {
                entity: &done,
                changed: &[],
                stages: &[],
            })
            .await
            .unwrap();

        assert!(!storage.reopen(&fresh.key).await.unwrap());
        assert!(storage.reopen(&done.key).await.unwrap());
        let reopened = storage.get_entity(&done.key).await.unwrap().unwrap();
        assert_eq!(reopened.status, ProcessingStatus::Partial);
        assert_eq!(storage.reopen_all().await.unwrap(), 0);

        let counts = storage.status_counts().await.unwrap();
        assert_eq!(counts[&ProcessingStatus::Partial], 1);
        assert_eq!(counts[&ProcessingStatus::Unprocessed], 1);
    }

    #[tokio::test]
    async fn update_score_persists_breakdown() {
        let storage = test_storage().await;
        let entity = sample("acme.com");
        storage.insert_entity_if_absent(&entity).await.unwrap();

        let card = ScoreCard {
            financial_size: 20,
            quality: -10,
            actionability: 30,
            risk_penalty: 0,
            total: 40,
            reasons: vec!["franchise".into()],
        };
        storage.update_score(&entity.key, &card).await.unwrap();

        let listed = storage.list_entities(None, Some(10)).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].score, Some(40));
        assert_eq!(listed[0].score_card.as_ref(), Some(&card));
        assert_eq!(storage.list_keys().await.unwrap(), vec![entity.key]);
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("sourcing_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.unwrap();
        rw.insert_entity_if_absent(&sample("a.com")).await.unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        let result = ro.insert_entity_if_absent(&sample("b.com")).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }
}
