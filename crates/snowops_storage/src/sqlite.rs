#![forbid(unsafe_code)]

//! SQLite-backed contract store.
//!
//! One connection behind a mutex. Mutations run in `IMMEDIATE` transactions so
//! the write lock is held from the first read of a row to the commit; the
//! ticket bind check-and-set and the ledger-plus-rollup pair rely on that.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Value;
use rusqlite::{
    ffi, params, params_from_iter, Connection, ErrorCode, OptionalExtension, TransactionBehavior,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use snowops_kernel_contracts::contract::{
    ContractKind, ContractRecord, ContractUsageRecord, TripUsageRecord, WorkType,
};
use snowops_kernel_contracts::filter::ContractQuery;
use snowops_kernel_contracts::rollup::ContractStatus;
use snowops_kernel_contracts::ticket::{
    AppealRow, ContractTicketSummary, DependencyCounts, TicketAssignmentRow, TicketRow, TripRow,
};
use snowops_kernel_contracts::{
    ContractId, ContractViolation, RegionId, TicketId, TripId, Validate,
};
use tracing::debug;

use crate::repo::{
    BindOutcome, ContractTablesRepo, StoredContract, TicketBindingRepo, TicketTablesRepo,
    UsageLedgerRepo,
};
use crate::{CallContext, StorageError};

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Fractional digits kept by the integer amount columns.
const AMOUNT_SCALE: u32 = 4;

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

const CONTRACT_COLUMNS: &str = "c.id, c.contract_type, c.contractor_id, c.landfill_id, \
     c.created_by_org, c.name, c.work_type, c.price_per_m3_units, c.budget_total_units, \
     c.minimal_volume_units, c.start_at_us, c.end_at_us, c.is_active, c.created_at_us, \
     u.total_volume_units, u.total_cost_units, u.updated_at_us";

const CONTRACT_FROM: &str =
    "FROM contracts c LEFT JOIN contract_usage u ON u.contract_id = c.id";

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Backend {
            detail: err.to_string(),
        }
    }
}

/// Maps a constraint failure on `table` to its typed error. `reference` names
/// the foreign key the statement carried, when it has one.
fn classify(
    err: rusqlite::Error,
    table: &'static str,
    key: &str,
    reference: Option<&str>,
) -> StorageError {
    let extended = match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            e.extended_code
        }
        _ => return err.into(),
    };
    match extended {
        ffi::SQLITE_CONSTRAINT_PRIMARYKEY | ffi::SQLITE_CONSTRAINT_UNIQUE => {
            StorageError::DuplicateKey {
                table,
                key: key.to_string(),
            }
        }
        ffi::SQLITE_CONSTRAINT_FOREIGNKEY => StorageError::ForeignKeyViolation {
            table,
            key: reference.unwrap_or(key).to_string(),
        },
        ffi::SQLITE_CONSTRAINT_TRIGGER => StorageError::AppendOnlyViolation { table },
        ffi::SQLITE_CONSTRAINT_CHECK | ffi::SQLITE_CONSTRAINT_NOTNULL => {
            StorageError::CheckViolation { table }
        }
        _ => err.into(),
    }
}

fn to_units(field: &'static str, v: Decimal) -> Result<i64, StorageError> {
    v.checked_mul(Decimal::from(10_i64.pow(AMOUNT_SCALE)))
        .filter(|scaled| scaled.fract().is_zero())
        .and_then(|scaled| scaled.to_i64())
        .ok_or(StorageError::ContractViolation(
            ContractViolation::InvalidValue {
                field,
                reason: "not representable with 4 fractional digits",
            },
        ))
}

fn from_units(units: i64) -> Decimal {
    Decimal::new(units, AMOUNT_SCALE).normalize()
}

fn to_us(t: DateTime<Utc>) -> i64 {
    t.timestamp_micros()
}

fn from_us(us: i64) -> Result<DateTime<Utc>, StorageError> {
    let nanos = (us.rem_euclid(1_000_000) * 1_000) as u32;
    Utc.timestamp_opt(us.div_euclid(1_000_000), nanos)
        .single()
        .ok_or_else(|| StorageError::Backend {
            detail: format!("timestamp {us} out of range"),
        })
}

fn parse_id<T>(raw: &str) -> Result<T, StorageError>
where
    T: FromStr<Err = ContractViolation>,
{
    Ok(raw.parse::<T>()?)
}

fn parse_opt_id<T>(raw: Option<String>) -> Result<Option<T>, StorageError>
where
    T: FromStr<Err = ContractViolation>,
{
    raw.as_deref().map(parse_id).transpose()
}

fn count(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}

struct ContractRaw {
    id: String,
    contract_type: String,
    contractor_id: Option<String>,
    landfill_id: Option<String>,
    created_by_org: String,
    name: String,
    work_type: Option<String>,
    price_per_m3: i64,
    budget_total: i64,
    minimal_volume: i64,
    start_at: i64,
    end_at: i64,
    is_active: bool,
    created_at: i64,
    usage: Option<(i64, i64, i64)>,
}

impl ContractRaw {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let usage = match (
            row.get::<_, Option<i64>>(14)?,
            row.get::<_, Option<i64>>(15)?,
            row.get::<_, Option<i64>>(16)?,
        ) {
            (Some(volume), Some(cost), Some(updated)) => Some((volume, cost, updated)),
            _ => None,
        };
        Ok(Self {
            id: row.get(0)?,
            contract_type: row.get(1)?,
            contractor_id: row.get(2)?,
            landfill_id: row.get(3)?,
            created_by_org: row.get(4)?,
            name: row.get(5)?,
            work_type: row.get(6)?,
            price_per_m3: row.get(7)?,
            budget_total: row.get(8)?,
            minimal_volume: row.get(9)?,
            start_at: row.get(10)?,
            end_at: row.get(11)?,
            is_active: row.get(12)?,
            created_at: row.get(13)?,
            usage,
        })
    }

    fn into_stored(self, with_usage: bool) -> Result<StoredContract, StorageError> {
        let id: ContractId = parse_id(&self.id)?;
        let record = ContractRecord {
            id,
            contract_type: ContractKind::parse(&self.contract_type)?,
            contractor_id: parse_opt_id(self.contractor_id)?,
            landfill_id: parse_opt_id(self.landfill_id)?,
            created_by_org: parse_id(&self.created_by_org)?,
            name: self.name,
            work_type: self.work_type.as_deref().map(WorkType::parse).transpose()?,
            price_per_m3: from_units(self.price_per_m3),
            budget_total: from_units(self.budget_total),
            minimal_volume_m3: from_units(self.minimal_volume),
            start_at: from_us(self.start_at)?,
            end_at: from_us(self.end_at)?,
            is_active: self.is_active,
            created_at: from_us(self.created_at)?,
            region_ids: Vec::new(),
        };
        record.validate()?;
        let usage = match self.usage {
            Some((volume, cost, updated)) if with_usage => Some(ContractUsageRecord {
                contract_id: id,
                total_volume_m3: from_units(volume),
                total_cost: from_units(cost),
                updated_at: from_us(updated)?,
            }),
            _ => None,
        };
        Ok(StoredContract { record, usage })
    }
}

fn regions_of(conn: &Connection, contract_key: &str) -> Result<Vec<RegionId>, StorageError> {
    let mut stmt = conn.prepare(
        "SELECT polygon_id FROM contract_polygons WHERE contract_id = ?1 ORDER BY polygon_id",
    )?;
    let raw = stmt
        .query_map(params![contract_key], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    raw.iter().map(|r| parse_id(r)).collect()
}

fn attach_regions(conn: &Connection, stored: &mut StoredContract) -> Result<(), StorageError> {
    if stored.record.is_landfill() {
        stored.record.region_ids = regions_of(conn, &stored.record.id.to_string())?;
    }
    Ok(())
}

fn contract_exists(conn: &Connection, contract_key: &str) -> Result<bool, StorageError> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM contracts WHERE id = ?1",
            params![contract_key],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

fn counts_on(conn: &Connection, contract_key: &str) -> Result<DependencyCounts, StorageError> {
    let counts = conn.query_row(
        "SELECT
            (SELECT COUNT(*) FROM tickets WHERE contract_id = ?1),
            (SELECT COUNT(*) FROM trips WHERE ticket_id IN
                (SELECT id FROM tickets WHERE contract_id = ?1)),
            (SELECT COUNT(*) FROM ticket_assignments WHERE ticket_id IN
                (SELECT id FROM tickets WHERE contract_id = ?1)),
            (SELECT COUNT(*) FROM appeals WHERE ticket_id IN
                (SELECT id FROM tickets WHERE contract_id = ?1)),
            (SELECT COUNT(*) FROM trip_usage_log WHERE contract_id = ?1),
            (SELECT COUNT(*) FROM contract_polygons WHERE contract_id = ?1)",
        params![contract_key],
        |row| {
            Ok(DependencyCounts {
                tickets_count: count(row.get(0)?),
                trips_count: count(row.get(1)?),
                assignments_count: count(row.get(2)?),
                appeals_count: count(row.get(3)?),
                usage_log_count: count(row.get(4)?),
                polygons_count: count(row.get(5)?),
            })
        },
    )?;
    Ok(counts)
}

fn usage_on(
    conn: &Connection,
    contract_id: ContractId,
) -> Result<Option<ContractUsageRecord>, StorageError> {
    let raw = conn
        .query_row(
            "SELECT total_volume_units, total_cost_units, updated_at_us
             FROM contract_usage WHERE contract_id = ?1",
            params![contract_id.to_string()],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?)),
        )
        .optional()?;
    raw.map(|(volume, cost, updated)| -> Result<_, StorageError> {
        Ok(ContractUsageRecord {
            contract_id,
            total_volume_m3: from_units(volume),
            total_cost: from_units(cost),
            updated_at: from_us(updated)?,
        })
    })
    .transpose()
}

#[derive(Debug, Clone)]
pub struct SqliteContractStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteContractStore {
    /// Opens (creating if needed) the database at `path` and applies the schema.
    /// `:memory:` opens a private in-memory database.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        Self::init(conn, Some(path.to_path_buf()), busy_timeout)
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?, None, DEFAULT_BUSY_TIMEOUT)
    }

    fn init(
        conn: Connection,
        path: Option<PathBuf>,
        busy_timeout: Duration,
    ) -> Result<Self, StorageError> {
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch(SCHEMA_SQL)?;
        debug!(path = ?path, "contract store schema applied");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn journal_mode(&self) -> Result<String, StorageError> {
        let conn = self.lock()?;
        Ok(conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Backend {
            detail: "sqlite connection lock poisoned".to_string(),
        })
    }
}

impl ContractTablesRepo for SqliteContractStore {
    fn insert_contract_row(
        &self,
        ctx: &CallContext,
        record: ContractRecord,
    ) -> Result<(), StorageError> {
        ctx.ensure_live()?;
        record.validate()?;
        let price = to_units("contract.price_per_m3", record.price_per_m3)?;
        let budget = to_units("contract.budget_total", record.budget_total)?;
        let minimal = to_units("contract.minimal_volume_m3", record.minimal_volume_m3)?;
        let key = record.id.to_string();

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO contracts (
                id, contract_type, contractor_id, landfill_id, created_by_org, name, work_type,
                price_per_m3_units, budget_total_units, minimal_volume_units,
                start_at_us, end_at_us, is_active, created_at_us
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                key,
                record.contract_type.as_str(),
                record.contractor_id.map(|c| c.to_string()),
                record.landfill_id.map(|l| l.to_string()),
                record.created_by_org.to_string(),
                record.name,
                record.work_type.map(WorkType::as_str),
                price,
                budget,
                minimal,
                to_us(record.start_at),
                to_us(record.end_at),
                record.is_active,
                to_us(record.created_at),
            ],
        )
        .map_err(|e| classify(e, "contracts", &key, None))?;
        tx.execute(
            "INSERT INTO contract_usage (contract_id, total_volume_units, total_cost_units, updated_at_us)
             VALUES (?1, 0, 0, ?2)
             ON CONFLICT(contract_id) DO NOTHING",
            params![key, to_us(record.created_at)],
        )
        .map_err(|e| classify(e, "contract_usage", &key, Some(&key)))?;
        for region in &record.region_ids {
            tx.execute(
                "INSERT INTO contract_polygons (contract_id, polygon_id) VALUES (?1, ?2)
                 ON CONFLICT(contract_id, polygon_id) DO NOTHING",
                params![key, region.to_string()],
            )
            .map_err(|e| classify(e, "contract_polygons", &region.to_string(), Some(&key)))?;
        }
        ctx.ensure_live()?;
        tx.commit()?;
        Ok(())
    }

    fn contract_row(
        &self,
        ctx: &CallContext,
        contract_id: ContractId,
    ) -> Result<StoredContract, StorageError> {
        ctx.ensure_live()?;
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!("SELECT {CONTRACT_COLUMNS} {CONTRACT_FROM} WHERE c.id = ?1"),
                params![contract_id.to_string()],
                ContractRaw::from_row,
            )
            .optional()?
            .ok_or_else(|| StorageError::not_found("contracts", contract_id))?;
        let mut stored = raw.into_stored(true)?;
        attach_regions(&conn, &mut stored)?;
        Ok(stored)
    }

    fn contract_rows(
        &self,
        ctx: &CallContext,
        query: &ContractQuery,
    ) -> Result<Vec<StoredContract>, StorageError> {
        ctx.ensure_live()?;
        let f = &query.filter;
        let mut clauses: Vec<&'static str> = Vec::new();
        let mut args: Vec<Value> = Vec::new();
        let equals = [
            ("c.contractor_id = ?", f.contractor_id.map(|c| c.to_string())),
            ("c.landfill_id = ?", f.landfill_id.map(|l| l.to_string())),
            ("c.contract_type = ?", f.contract_type.map(|k| k.as_str().to_string())),
            ("c.created_by_org = ?", f.created_by_org.map(|o| o.to_string())),
            ("c.work_type = ?", f.work_type.map(|w| w.as_str().to_string())),
        ];
        for (clause, value) in equals {
            if let Some(v) = value {
                clauses.push(clause);
                args.push(Value::Text(v));
            }
        }
        if f.only_active {
            clauses.push("c.is_active = 1");
        }
        let now = to_us(query.now);
        match f.status {
            None => {}
            Some(ContractStatus::Archived) => clauses.push("c.is_active = 0"),
            Some(ContractStatus::Planned) => {
                clauses.push("c.is_active = 1 AND c.start_at_us > ?");
                args.push(Value::Integer(now));
            }
            Some(ContractStatus::Expired) => {
                clauses.push("c.is_active = 1 AND c.end_at_us < ?");
                args.push(Value::Integer(now));
            }
            Some(ContractStatus::Active) => {
                clauses.push("c.is_active = 1 AND c.start_at_us <= ? AND c.end_at_us >= ?");
                args.push(Value::Integer(now));
                args.push(Value::Integer(now));
            }
        }
        let bounds = [
            ("c.start_at_us >= ?", f.start_from),
            ("c.start_at_us <= ?", f.start_to),
            ("c.end_at_us >= ?", f.end_from),
            ("c.end_at_us <= ?", f.end_to),
        ];
        for (clause, bound) in bounds {
            if let Some(t) = bound {
                clauses.push(clause);
                args.push(Value::Integer(to_us(t)));
            }
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT {CONTRACT_COLUMNS} {CONTRACT_FROM}{where_sql} \
             ORDER BY c.created_at_us DESC, c.id DESC"
        );

        let conn = self.lock()?;
        let raws = {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(args.iter()), ContractRaw::from_row)?
                .collect::<rusqlite::Result<Vec<ContractRaw>>>()?;
            rows
        };
        let mut out = Vec::with_capacity(raws.len());
        for raw in raws {
            let mut stored = raw.into_stored(query.include_usage)?;
            if query.include_usage {
                attach_regions(&conn, &mut stored)?;
            }
            out.push(stored);
        }
        Ok(out)
    }

    fn dependency_counts(
        &self,
        ctx: &CallContext,
        contract_id: ContractId,
    ) -> Result<DependencyCounts, StorageError> {
        ctx.ensure_live()?;
        let key = contract_id.to_string();
        let conn = self.lock()?;
        if !contract_exists(&conn, &key)? {
            return Err(StorageError::not_found("contracts", contract_id));
        }
        counts_on(&conn, &key)
    }

    fn delete_contract_row(
        &self,
        ctx: &CallContext,
        contract_id: ContractId,
        force: bool,
    ) -> Result<DependencyCounts, StorageError> {
        ctx.ensure_live()?;
        let key = contract_id.to_string();
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if !contract_exists(&tx, &key)? {
            return Err(StorageError::not_found("contracts", contract_id));
        }
        let counts = counts_on(&tx, &key)?;
        if !force && counts.blocks_unforced_delete() {
            return Err(StorageError::BlockedByDependents {
                contract_id,
                counts,
            });
        }
        if force {
            tx.execute("DELETE FROM tickets WHERE contract_id = ?1", params![key])?;
        }
        tx.execute("DELETE FROM contracts WHERE id = ?1", params![key])
            .map_err(|e| classify(e, "contracts", &key, None))?;
        ctx.ensure_live()?;
        tx.commit()?;
        Ok(counts)
    }
}

impl UsageLedgerRepo for SqliteContractStore {
    fn append_trip_usage_row(
        &self,
        ctx: &CallContext,
        row: TripUsageRecord,
    ) -> Result<ContractUsageRecord, StorageError> {
        ctx.ensure_live()?;
        row.validate()?;
        let volume = to_units("trip_usage.recorded_volume_m3", row.recorded_volume_m3)?;
        let cost = to_units("trip_usage.recorded_cost", row.recorded_cost)?;
        let trip_key = row.trip_id.to_string();
        let contract_key = row.contract_id.to_string();
        let created_at = to_us(row.created_at);

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO trip_usage_log (
                trip_id, ticket_id, contract_id, recorded_volume_units, recorded_cost_units,
                created_at_us
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                trip_key,
                row.ticket_id.to_string(),
                contract_key,
                volume,
                cost,
                created_at
            ],
        )
        .map_err(|e| classify(e, "trip_usage_log", &trip_key, Some(&contract_key)))?;
        // The write lock is held, so the projected totals are what the upsert will store.
        let mut projected = usage_on(&tx, row.contract_id)?
            .unwrap_or_else(|| ContractUsageRecord::zero(row.contract_id, row.created_at));
        projected.add_trip(&row)?;
        tx.execute(
            "INSERT INTO contract_usage (contract_id, total_volume_units, total_cost_units, updated_at_us)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(contract_id) DO UPDATE SET
                total_volume_units = contract_usage.total_volume_units + excluded.total_volume_units,
                total_cost_units = contract_usage.total_cost_units + excluded.total_cost_units,
                updated_at_us = excluded.updated_at_us",
            params![contract_key, volume, cost, created_at],
        )
        .map_err(|e| classify(e, "contract_usage", &contract_key, Some(&contract_key)))?;
        let after = usage_on(&tx, row.contract_id)?
            .ok_or_else(|| StorageError::not_found("contract_usage", row.contract_id))?;
        ctx.ensure_live()?;
        tx.commit()?;
        Ok(after)
    }

    fn usage_row(
        &self,
        ctx: &CallContext,
        contract_id: ContractId,
    ) -> Result<Option<ContractUsageRecord>, StorageError> {
        ctx.ensure_live()?;
        let conn = self.lock()?;
        usage_on(&conn, contract_id)
    }

    fn trip_usage_rows(
        &self,
        ctx: &CallContext,
        contract_id: ContractId,
    ) -> Result<Vec<TripUsageRecord>, StorageError> {
        ctx.ensure_live()?;
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT trip_id, ticket_id, recorded_volume_units, recorded_cost_units, created_at_us
             FROM trip_usage_log WHERE contract_id = ?1
             ORDER BY created_at_us ASC, trip_id ASC",
        )?;
        let raws = stmt
            .query_map(params![contract_id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raws.into_iter()
            .map(|(trip, ticket, volume, cost, created)| -> Result<_, StorageError> {
                Ok(TripUsageRecord {
                    trip_id: parse_id(&trip)?,
                    ticket_id: parse_id(&ticket)?,
                    contract_id,
                    recorded_volume_m3: from_units(volume),
                    recorded_cost: from_units(cost),
                    created_at: from_us(created)?,
                })
            })
            .collect()
    }

    fn attempt_overwrite_trip_usage_row(
        &self,
        ctx: &CallContext,
        trip_id: TripId,
    ) -> Result<(), StorageError> {
        ctx.ensure_live()?;
        let key = trip_id.to_string();
        let conn = self.lock()?;
        let exists = conn
            .query_row(
                "SELECT 1 FROM trip_usage_log WHERE trip_id = ?1",
                params![key],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if !exists {
            return Err(StorageError::not_found("trip_usage_log", trip_id));
        }
        conn.execute(
            "UPDATE trip_usage_log SET recorded_volume_units = recorded_volume_units
             WHERE trip_id = ?1",
            params![key],
        )
        .map_err(|e| classify(e, "trip_usage_log", &key, None))?;
        Ok(())
    }
}

fn ticket_ref_on(
    conn: &Connection,
    ticket_id: TicketId,
) -> Result<Option<ContractId>, StorageError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT contract_id FROM tickets WHERE id = ?1",
            params![ticket_id.to_string()],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| StorageError::not_found("tickets", ticket_id))?;
    parse_opt_id(raw)
}

impl TicketBindingRepo for SqliteContractStore {
    fn ticket_contract_ref(
        &self,
        ctx: &CallContext,
        ticket_id: TicketId,
    ) -> Result<Option<ContractId>, StorageError> {
        ctx.ensure_live()?;
        let conn = self.lock()?;
        ticket_ref_on(&conn, ticket_id)
    }

    fn bind_ticket_contract(
        &self,
        ctx: &CallContext,
        ticket_id: TicketId,
        contract_id: ContractId,
    ) -> Result<BindOutcome, StorageError> {
        ctx.ensure_live()?;
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        match ticket_ref_on(&tx, ticket_id)? {
            Some(bound) if bound == contract_id => return Ok(BindOutcome::AlreadyBound),
            Some(bound) => {
                return Err(StorageError::TicketAlreadyBound {
                    ticket_id,
                    contract_id: bound,
                })
            }
            None => {}
        }
        let contract_key = contract_id.to_string();
        tx.execute(
            "UPDATE tickets SET contract_id = ?1 WHERE id = ?2 AND contract_id IS NULL",
            params![contract_key, ticket_id.to_string()],
        )
        .map_err(|e| classify(e, "tickets", &ticket_id.to_string(), Some(&contract_key)))?;
        ctx.ensure_live()?;
        tx.commit()?;
        Ok(BindOutcome::Bound)
    }

    fn contract_ticket_rows(
        &self,
        ctx: &CallContext,
        contract_id: ContractId,
    ) -> Result<Vec<ContractTicketSummary>, StorageError> {
        ctx.ensure_live()?;
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT t.id, t.cleaning_area_id, t.planned_start_at_us, t.planned_end_at_us, t.status,
                (SELECT COUNT(*) FROM trips tr WHERE tr.ticket_id = t.id),
                (SELECT COALESCE(SUM(COALESCE(tr.detected_volume_entry_units, 0)), 0)
                    FROM trips tr WHERE tr.ticket_id = t.id),
                (SELECT COUNT(*) FROM ticket_assignments a
                    WHERE a.ticket_id = t.id AND a.is_active = 1)
             FROM tickets t
             WHERE t.contract_id = ?1
             ORDER BY t.planned_start_at_us DESC, t.id DESC",
        )?;
        let raws = stmt
            .query_map(params![contract_id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, i64>(7)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raws.into_iter()
            .map(
                |(id, area, start, end, status, trips, volume, assignments)| -> Result<_, StorageError> {
                    Ok(ContractTicketSummary {
                        id: parse_id(&id)?,
                        cleaning_area_id: parse_id(&area)?,
                        planned_start_at: from_us(start)?,
                        planned_end_at: from_us(end)?,
                        status,
                        trip_count: count(trips),
                        total_volume_m3: from_units(volume),
                        active_assignments: count(assignments),
                    })
                },
            )
            .collect()
    }

    fn contract_trip_rows(
        &self,
        ctx: &CallContext,
        contract_id: ContractId,
    ) -> Result<Vec<TripRow>, StorageError> {
        ctx.ensure_live()?;
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT tr.id, tr.ticket_id, tr.driver_id, tr.vehicle_id, tr.entry_at_us,
                tr.exit_at_us, tr.status, tr.detected_volume_entry_units,
                tr.detected_volume_exit_units
             FROM trips tr
             JOIN tickets t ON t.id = tr.ticket_id
             WHERE t.contract_id = ?1
             ORDER BY tr.entry_at_us DESC, tr.id DESC",
        )?;
        let raws = stmt
            .query_map(params![contract_id.to_string()], TripRaw::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raws.into_iter().map(TripRaw::into_row).collect()
    }
}

struct TripRaw {
    id: String,
    ticket_id: Option<String>,
    driver_id: Option<String>,
    vehicle_id: Option<String>,
    entry_at: i64,
    exit_at: Option<i64>,
    status: String,
    volume_entry: Option<i64>,
    volume_exit: Option<i64>,
}

impl TripRaw {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            ticket_id: row.get(1)?,
            driver_id: row.get(2)?,
            vehicle_id: row.get(3)?,
            entry_at: row.get(4)?,
            exit_at: row.get(5)?,
            status: row.get(6)?,
            volume_entry: row.get(7)?,
            volume_exit: row.get(8)?,
        })
    }

    fn into_row(self) -> Result<TripRow, StorageError> {
        Ok(TripRow {
            id: parse_id(&self.id)?,
            ticket_id: parse_opt_id(self.ticket_id)?,
            driver_id: parse_opt_id(self.driver_id)?,
            vehicle_id: parse_opt_id(self.vehicle_id)?,
            entry_at: from_us(self.entry_at)?,
            exit_at: self.exit_at.map(from_us).transpose()?,
            status: self.status,
            detected_volume_entry: self.volume_entry.map(from_units),
            detected_volume_exit: self.volume_exit.map(from_units),
        })
    }
}

fn opt_units(field: &'static str, v: Option<Decimal>) -> Result<Option<i64>, StorageError> {
    v.map(|d| to_units(field, d)).transpose()
}

impl TicketTablesRepo for SqliteContractStore {
    fn insert_ticket_row(&self, ctx: &CallContext, row: TicketRow) -> Result<(), StorageError> {
        ctx.ensure_live()?;
        row.validate()?;
        let key = row.id.to_string();
        let contract_key = row.contract_id.map(|c| c.to_string());
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO tickets (
                id, contract_id, cleaning_area_id, planned_start_at_us, planned_end_at_us, status
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                key,
                contract_key,
                row.cleaning_area_id.to_string(),
                to_us(row.planned_start_at),
                to_us(row.planned_end_at),
                row.status,
            ],
        )
        .map_err(|e| classify(e, "tickets", &key, contract_key.as_deref()))?;
        Ok(())
    }

    fn insert_trip_row(&self, ctx: &CallContext, row: TripRow) -> Result<(), StorageError> {
        ctx.ensure_live()?;
        row.validate()?;
        let key = row.id.to_string();
        let ticket_key = row.ticket_id.map(|t| t.to_string());
        let entry = opt_units("trip.detected_volume_entry", row.detected_volume_entry)?;
        let exit = opt_units("trip.detected_volume_exit", row.detected_volume_exit)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO trips (
                id, ticket_id, driver_id, vehicle_id, entry_at_us, exit_at_us, status,
                detected_volume_entry_units, detected_volume_exit_units
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                key,
                ticket_key,
                row.driver_id.map(|d| d.to_string()),
                row.vehicle_id.map(|v| v.to_string()),
                to_us(row.entry_at),
                row.exit_at.map(to_us),
                row.status,
                entry,
                exit,
            ],
        )
        .map_err(|e| classify(e, "trips", &key, ticket_key.as_deref()))?;
        Ok(())
    }

    fn insert_assignment_row(
        &self,
        ctx: &CallContext,
        row: TicketAssignmentRow,
    ) -> Result<(), StorageError> {
        ctx.ensure_live()?;
        let key = row.id.to_string();
        let ticket_key = row.ticket_id.to_string();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO ticket_assignments (id, ticket_id, driver_id, is_active)
             VALUES (?1, ?2, ?3, ?4)",
            params![key, ticket_key, row.driver_id.to_string(), row.is_active],
        )
        .map_err(|e| classify(e, "ticket_assignments", &key, Some(&ticket_key)))?;
        Ok(())
    }

    fn insert_appeal_row(&self, ctx: &CallContext, row: AppealRow) -> Result<(), StorageError> {
        ctx.ensure_live()?;
        let key = row.id.to_string();
        let ticket_key = row.ticket_id.to_string();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO appeals (id, ticket_id, created_at_us) VALUES (?1, ?2, ?3)",
            params![key, ticket_key, to_us(row.created_at)],
        )
        .map_err(|e| classify(e, "appeals", &key, Some(&ticket_key)))?;
        Ok(())
    }

    fn ticket_row(&self, ctx: &CallContext, ticket_id: TicketId) -> Result<TicketRow, StorageError> {
        ctx.ensure_live()?;
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT contract_id, cleaning_area_id, planned_start_at_us, planned_end_at_us, status
                 FROM tickets WHERE id = ?1",
                params![ticket_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?
            .ok_or_else(|| StorageError::not_found("tickets", ticket_id))?;
        let (contract, area, start, end, status) = raw;
        Ok(TicketRow {
            id: ticket_id,
            contract_id: parse_opt_id(contract)?,
            cleaning_area_id: parse_id(&area)?,
            planned_start_at: from_us(start)?,
            planned_end_at: from_us(end)?,
            status,
        })
    }
}
