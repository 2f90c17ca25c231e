//! SQLite-backed marketing store.
//!
//! Holds automations, their per-contact executions, campaigns, templates,
//! the CRM contact slice and the marketing event log. Timestamps are stored
//! as fixed-width RFC 3339 UTC strings so range filters compare correctly as
//! text.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use dripline_core::error::{DriplineError, Result};
use dripline_core::traits::MarketingStore;
use dripline_core::types::{
    Audience, AutomationDefinition, AutomationExecution, Campaign, CampaignState, ChannelKind,
    Contact, EventResult, ExecutionState, MarketingEvent, Step, StepRecord, Template,
};

const EXECUTION_COLUMNS: &str = "id, automatizacion_id, cliente_id, estado, paso_actual, \
     next_action_at, pasos_ejecutados, started_at, completed_at, error_mensaje";

const CAMPAIGN_COLUMNS: &str = "id, nombre, template_id, contactos_ids, contactos_count, estado, \
     fecha_inicio, iniciado_at, total_enviados, total_fallidos, completado_at";

/// SQLite persistence for all marketing engine data.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the marketing database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err("DB open"))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        Self::from_connection(conn)
    }

    /// Throwaway in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err("DB open"))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| DriplineError::Database(format!("Lock: {e}")))
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        self.lock()?
            .execute_batch(
                "
            -- Automation definitions (steps stored as a JSON array)
            CREATE TABLE IF NOT EXISTS marketing_automatizacion (
                id TEXT PRIMARY KEY,
                nombre TEXT NOT NULL,
                activo INTEGER NOT NULL DEFAULT 1,
                acciones TEXT NOT NULL DEFAULT '[]',
                total_ejecutadas INTEGER NOT NULL DEFAULT 0,
                total_completadas INTEGER NOT NULL DEFAULT 0
            );

            -- One row per (automation, contact) run
            CREATE TABLE IF NOT EXISTS marketing_automatizacion_ejecucion (
                id TEXT PRIMARY KEY,
                automatizacion_id TEXT NOT NULL,
                cliente_id TEXT NOT NULL,
                estado TEXT NOT NULL DEFAULT 'RUNNING',  -- RUNNING, COMPLETED, FAILED
                paso_actual INTEGER NOT NULL DEFAULT -1,
                next_action_at TEXT,
                pasos_ejecutados TEXT NOT NULL DEFAULT '[]',
                started_at TEXT NOT NULL,
                completed_at TEXT,
                error_mensaje TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_ejecucion_due
                ON marketing_automatizacion_ejecucion (estado, next_action_at);

            -- One-shot campaigns with their resolved audience
            CREATE TABLE IF NOT EXISTS marketing_campana (
                id TEXT PRIMARY KEY,
                nombre TEXT NOT NULL,
                template_id TEXT,
                contactos_ids TEXT NOT NULL DEFAULT '[]',
                contactos_count INTEGER NOT NULL DEFAULT 0,
                estado TEXT NOT NULL DEFAULT 'SCHEDULED',  -- SCHEDULED, RUNNING, COMPLETED, CANCELLED
                fecha_inicio TEXT NOT NULL,
                iniciado_at TEXT,
                total_enviados INTEGER NOT NULL DEFAULT 0,
                total_fallidos INTEGER NOT NULL DEFAULT 0,
                completado_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_campana_due
                ON marketing_campana (estado, fecha_inicio);

            CREATE TABLE IF NOT EXISTS marketing_template (
                id TEXT PRIMARY KEY,
                nombre TEXT NOT NULL,
                canal_tipo TEXT NOT NULL DEFAULT 'whatsapp',  -- whatsapp, sms, email
                body_texto TEXT NOT NULL DEFAULT '',
                body_html TEXT,
                subject TEXT
            );

            -- CRM contact fields read by the engine
            CREATE TABLE IF NOT EXISTS cliente (
                id TEXT PRIMARY KEY,
                nombre TEXT,
                telefono TEXT,
                telefono_whatsapp TEXT,
                email TEXT,
                whatsapp_opt_out INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS marketing_event_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                evento_tipo TEXT NOT NULL,
                payload TEXT NOT NULL DEFAULT '{}',
                resultado TEXT NOT NULL,  -- SUCCESS, ERROR
                error_mensaje TEXT,
                created_at TEXT NOT NULL
            );
         ",
            )
            .map_err(db_err("Migration"))
    }

    // ─── Seeding / admin ──────────────────────────────────────

    pub fn upsert_automation(&self, automation: &AutomationDefinition) -> Result<()> {
        let steps = serde_json::to_string(&automation.steps)?;
        self.lock()?
            .execute(
                "INSERT INTO marketing_automatizacion
                 (id, nombre, activo, acciones, total_ejecutadas, total_completadas)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    nombre = excluded.nombre,
                    activo = excluded.activo,
                    acciones = excluded.acciones",
                params![
                    automation.id,
                    automation.name,
                    automation.active as i32,
                    steps,
                    automation.total_runs,
                    automation.total_completed,
                ],
            )
            .map_err(db_err("Save automation"))?;
        Ok(())
    }

    pub fn upsert_template(&self, template: &Template) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT OR REPLACE INTO marketing_template
                 (id, nombre, canal_tipo, body_texto, body_html, subject)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    template.id,
                    template.name,
                    template.channel.as_str(),
                    template.body_text,
                    template.body_html,
                    template.subject,
                ],
            )
            .map_err(db_err("Save template"))?;
        Ok(())
    }

    pub fn upsert_contact(&self, contact: &Contact) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT OR REPLACE INTO cliente
                 (id, nombre, telefono, telefono_whatsapp, email, whatsapp_opt_out)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    contact.id,
                    contact.name,
                    contact.phone,
                    contact.whatsapp_phone,
                    contact.email,
                    contact.whatsapp_opt_out as i32,
                ],
            )
            .map_err(db_err("Save contact"))?;
        Ok(())
    }

    pub fn execution(&self, id: &str) -> Result<Option<AutomationExecution>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "SELECT {EXECUTION_COLUMNS} FROM marketing_automatizacion_ejecucion WHERE id = ?1"
            ),
            [id],
            execution_from_row,
        )
        .optional()
        .map_err(db_err("Load execution"))
    }

    pub fn campaign(&self, id: &str) -> Result<Option<Campaign>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {CAMPAIGN_COLUMNS} FROM marketing_campana WHERE id = ?1"),
            [id],
            campaign_from_row,
        )
        .optional()
        .map_err(db_err("Load campaign"))
    }

    /// Most recent marketing events, newest first.
    pub fn recent_events(&self, limit: usize) -> Result<Vec<MarketingEvent>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT evento_tipo, payload, resultado, error_mensaje, created_at
                 FROM marketing_event_log ORDER BY id DESC LIMIT ?1",
            )
            .map_err(db_err("Load events"))?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                let payload: String = row.get(1)?;
                let result: String = row.get(2)?;
                Ok(MarketingEvent {
                    event_type: row.get(0)?,
                    payload: serde_json::from_str(&payload).unwrap_or_default(),
                    result: if result == "ERROR" {
                        EventResult::Error
                    } else {
                        EventResult::Success
                    },
                    error_message: row.get(3)?,
                    created_at: ts_col(row, 4)?,
                })
            })
            .map_err(db_err("Load events"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Load events"))
    }
}

impl MarketingStore for SqliteStore {
    fn due_executions(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<AutomationExecution>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {EXECUTION_COLUMNS} FROM marketing_automatizacion_ejecucion
                 WHERE estado = 'RUNNING' AND next_action_at IS NOT NULL AND next_action_at <= ?1
                 ORDER BY next_action_at LIMIT ?2"
            ))
            .map_err(db_err("Due executions"))?;
        let rows = stmt
            .query_map(params![ts(now), limit as i64], execution_from_row)
            .map_err(db_err("Due executions"))?;
        decode_rows(rows, "Due executions")
    }

    fn due_campaigns(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Campaign>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CAMPAIGN_COLUMNS} FROM marketing_campana
                 WHERE estado = 'SCHEDULED' AND fecha_inicio <= ?1
                 ORDER BY fecha_inicio LIMIT ?2"
            ))
            .map_err(db_err("Due campaigns"))?;
        let rows = stmt
            .query_map(params![ts(now), limit as i64], campaign_from_row)
            .map_err(db_err("Due campaigns"))?;
        decode_rows(rows, "Due campaigns")
    }

    fn stuck_campaigns(&self, started_before: DateTime<Utc>) -> Result<Vec<Campaign>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CAMPAIGN_COLUMNS} FROM marketing_campana
                 WHERE estado = 'RUNNING' AND iniciado_at IS NOT NULL AND iniciado_at < ?1
                 ORDER BY iniciado_at"
            ))
            .map_err(db_err("Stuck campaigns"))?;
        let rows = stmt
            .query_map([ts(started_before)], campaign_from_row)
            .map_err(db_err("Stuck campaigns"))?;
        decode_rows(rows, "Stuck campaigns")
    }

    fn automation(&self, id: &str) -> Result<Option<AutomationDefinition>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, nombre, activo, acciones, total_ejecutadas, total_completadas
             FROM marketing_automatizacion WHERE id = ?1",
            [id],
            |row| {
                let steps: String = row.get(3)?;
                Ok(AutomationDefinition {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    active: row.get::<_, i32>(2)? != 0,
                    steps: json_col::<Vec<Step>>(&steps, 3)?,
                    total_runs: row.get(4)?,
                    total_completed: row.get(5)?,
                })
            },
        )
        .optional()
        .map_err(db_err("Load automation"))
    }

    fn template(&self, id: &str) -> Result<Option<Template>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, nombre, canal_tipo, body_texto, body_html, subject
             FROM marketing_template WHERE id = ?1",
            [id],
            |row| {
                let channel: String = row.get(2)?;
                Ok(Template {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    channel: ChannelKind::parse(&channel),
                    body_text: row.get(3)?,
                    body_html: row.get(4)?,
                    subject: row.get(5)?,
                })
            },
        )
        .optional()
        .map_err(db_err("Load template"))
    }

    fn contact(&self, id: &str) -> Result<Option<Contact>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, nombre, telefono, telefono_whatsapp, email, whatsapp_opt_out
             FROM cliente WHERE id = ?1",
            [id],
            contact_from_row,
        )
        .optional()
        .map_err(db_err("Load contact"))
    }

    fn contacts(&self, ids: &[String]) -> Result<Vec<Contact>> {
        let conn = self.lock()?;
        let mut out = Vec::with_capacity(ids.len());
        // Stay well under SQLite's bound-parameter limit.
        for chunk in ids.chunks(500) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT id, nombre, telefono, telefono_whatsapp, email, whatsapp_opt_out
                     FROM cliente WHERE id IN ({placeholders}) ORDER BY id"
                ))
                .map_err(db_err("Load contacts"))?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(chunk.iter()), contact_from_row)
                .map_err(db_err("Load contacts"))?;
            for contact in rows {
                out.push(contact.map_err(db_err("Load contacts"))?);
            }
        }
        Ok(out)
    }

    fn save_execution(&self, execution: &AutomationExecution) -> Result<()> {
        let log = serde_json::to_string(&execution.steps_log)?;
        self.lock()?
            .execute(
                "INSERT INTO marketing_automatizacion_ejecucion
                 (id, automatizacion_id, cliente_id, estado, paso_actual, next_action_at,
                  pasos_ejecutados, started_at, completed_at, error_mensaje)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(id) DO UPDATE SET
                    estado = excluded.estado,
                    paso_actual = excluded.paso_actual,
                    next_action_at = excluded.next_action_at,
                    pasos_ejecutados = excluded.pasos_ejecutados,
                    completed_at = excluded.completed_at,
                    error_mensaje = excluded.error_mensaje",
                params![
                    execution.id,
                    execution.automation_id,
                    execution.contact_id,
                    execution.state.as_str(),
                    execution.current_step,
                    execution.next_action_at.map(ts),
                    log,
                    ts(execution.started_at),
                    execution.completed_at.map(ts),
                    execution.error_message,
                ],
            )
            .map_err(db_err("Save execution"))?;
        Ok(())
    }

    fn record_automation_outcome(&self, automation_id: &str, completed: bool) -> Result<()> {
        self.lock()?
            .execute(
                "UPDATE marketing_automatizacion
                 SET total_ejecutadas = total_ejecutadas + 1,
                     total_completadas = total_completadas + ?2
                 WHERE id = ?1",
                params![automation_id, completed as i32],
            )
            .map_err(db_err("Update automation counters"))?;
        Ok(())
    }

    fn claim_campaign(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let changed = self
            .lock()?
            .execute(
                "UPDATE marketing_campana SET estado = 'RUNNING', iniciado_at = ?2
                 WHERE id = ?1 AND estado = 'SCHEDULED'",
                params![id, ts(now)],
            )
            .map_err(db_err("Claim campaign"))?;
        Ok(changed == 1)
    }

    fn save_campaign(&self, campaign: &Campaign) -> Result<()> {
        let ids = serde_json::to_string(&campaign.audience.contact_ids)?;
        self.lock()?
            .execute(
                "INSERT INTO marketing_campana
                 (id, nombre, template_id, contactos_ids, contactos_count, estado, fecha_inicio,
                  iniciado_at, total_enviados, total_fallidos, completado_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(id) DO UPDATE SET
                    estado = excluded.estado,
                    iniciado_at = excluded.iniciado_at,
                    total_enviados = excluded.total_enviados,
                    total_fallidos = excluded.total_fallidos,
                    completado_at = excluded.completado_at",
                params![
                    campaign.id,
                    campaign.name,
                    campaign.template_id,
                    ids,
                    campaign.audience.contact_count,
                    campaign.state.as_str(),
                    ts(campaign.starts_at),
                    campaign.started_at.map(ts),
                    campaign.total_sent,
                    campaign.total_failed,
                    campaign.completed_at.map(ts),
                ],
            )
            .map_err(db_err("Save campaign"))?;
        Ok(())
    }

    fn log_event(&self, event: &MarketingEvent) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT INTO marketing_event_log
                 (evento_tipo, payload, resultado, error_mensaje, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    event.event_type,
                    event.payload.to_string(),
                    event.result.as_str(),
                    event.error_message,
                    ts(event.created_at),
                ],
            )
            .map_err(db_err("Save event"))?;
        Ok(())
    }
}

#[cfg(test)]
impl SqliteStore {
    /// Raw SQL against the underlying connection, for simulating CRM writes.
    pub(crate) fn execute_sql(&self, sql: &str) -> Result<usize> {
        self.lock()?.execute(sql, []).map_err(db_err("Raw SQL"))
    }
}

// ─── Row mapping ──────────────────────────────────────────────

fn db_err(context: &'static str) -> impl Fn(rusqlite::Error) -> DriplineError {
    move |e| DriplineError::Database(format!("{context}: {e}"))
}

/// Fixed-width UTC timestamp (microseconds, `Z` suffix).
fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(DriplineError::Other(msg)))
}

fn parse_ts(raw: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, format!("bad timestamp '{raw}': {e}")))
}

fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw, idx)
}

fn opt_ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_ts(&s, idx)).transpose()
}

fn json_col<T: serde::de::DeserializeOwned>(raw: &str, idx: usize) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| conversion_error(idx, format!("bad JSON: {e}")))
}

/// JSON array column written by the CRM. SQL `NULL` and JSON `null` read as empty.
fn json_list_col<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Vec<T>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        Some(raw) => Ok(json_col::<Option<Vec<T>>>(&raw, idx)?.unwrap_or_default()),
        None => Ok(Vec::new()),
    }
}

/// Collect mapped rows, skipping rows whose values cannot be decoded so one
/// malformed row does not hide the rest of the batch.
fn decode_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
    context: &'static str,
) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for row in rows {
        match row {
            Ok(item) => out.push(item),
            Err(
                e @ (rusqlite::Error::FromSqlConversionFailure(..)
                | rusqlite::Error::InvalidColumnType(..)
                | rusqlite::Error::IntegralValueOutOfRange(..)),
            ) => tracing::warn!("⚠️ {context}: skipping malformed row: {e}"),
            Err(e) => return Err(db_err(context)(e)),
        }
    }
    Ok(out)
}

fn execution_from_row(row: &Row<'_>) -> rusqlite::Result<AutomationExecution> {
    let state: String = row.get(3)?;
    Ok(AutomationExecution {
        id: row.get(0)?,
        automation_id: row.get(1)?,
        contact_id: row.get(2)?,
        state: ExecutionState::parse(&state)
            .ok_or_else(|| conversion_error(3, format!("unknown execution state '{state}'")))?,
        current_step: row.get(4)?,
        next_action_at: opt_ts_col(row, 5)?,
        steps_log: json_list_col::<StepRecord>(row, 6)?,
        started_at: ts_col(row, 7)?,
        completed_at: opt_ts_col(row, 8)?,
        error_message: row.get(9)?,
    })
}

fn campaign_from_row(row: &Row<'_>) -> rusqlite::Result<Campaign> {
    let state: String = row.get(5)?;
    Ok(Campaign {
        id: row.get(0)?,
        name: row.get(1)?,
        template_id: row.get(2)?,
        audience: Audience {
            contact_ids: json_list_col(row, 3)?,
            contact_count: row.get(4)?,
        },
        state: CampaignState::parse(&state)
            .ok_or_else(|| conversion_error(5, format!("unknown campaign state '{state}'")))?,
        starts_at: ts_col(row, 6)?,
        started_at: opt_ts_col(row, 7)?,
        total_sent: row.get(8)?,
        total_failed: row.get(9)?,
        completed_at: opt_ts_col(row, 10)?,
    })
}

fn contact_from_row(row: &Row<'_>) -> rusqlite::Result<Contact> {
    Ok(Contact {
        id: row.get(0)?,
        name: row.get(1)?,
        phone: row.get(2)?,
        whatsapp_phone: row.get(3)?,
        email: row.get(4)?,
        whatsapp_opt_out: row.get::<_, i32>(5)? != 0,
    })
}
