use crate::error::{AkigError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::info;

/// Open (or create) the database and apply the schema.
/// `":memory:"` gives a private in-memory database.
pub fn open_database(url: &str) -> Result<Connection> {
    let conn = if url == ":memory:" {
        Connection::open_in_memory()?
    } else {
        let path = url.strip_prefix("sqlite://").unwrap_or(url);
        Connection::open(Path::new(path))?
    };

    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for crash recovery; in-memory databases answer "memory" and that is fine
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(SCHEMA)?;
    Ok(())
}

const SCHEMA: &str = "
-- ==========================================================================
-- Agency & users
-- ==========================================================================
CREATE TABLE IF NOT EXISTS agencies (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    city TEXT,
    country TEXT NOT NULL DEFAULT 'Guinea',
    phone TEXT,
    email TEXT,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    agency_id INTEGER NOT NULL REFERENCES agencies(id),
    email TEXT UNIQUE NOT NULL,
    password_hash TEXT NOT NULL,
    name TEXT NOT NULL,
    role TEXT NOT NULL DEFAULT 'agent'
        CHECK (role IN ('admin','manager','agent','accountant','owner')),
    active INTEGER NOT NULL DEFAULT 1,
    last_login DATETIME,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS refresh_tokens (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    token_hash TEXT UNIQUE NOT NULL,
    expires_at TEXT NOT NULL,
    revoked_at TEXT,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

-- ==========================================================================
-- Referential data
-- ==========================================================================
CREATE TABLE IF NOT EXISTS owners (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    agency_id INTEGER NOT NULL REFERENCES agencies(id),
    name TEXT NOT NULL,
    phone TEXT,
    email TEXT,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    UNIQUE (agency_id, name)
);

CREATE TABLE IF NOT EXISTS properties (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    agency_id INTEGER NOT NULL REFERENCES agencies(id),
    owner_id INTEGER REFERENCES owners(id) ON DELETE SET NULL,
    name TEXT NOT NULL,
    address TEXT,
    city TEXT,
    property_type TEXT,
    rent_amount INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'available'
        CHECK (status IN ('available','occupied','maintenance')),
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    UNIQUE (agency_id, name)
);

CREATE TABLE IF NOT EXISTS tenants (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    agency_id INTEGER NOT NULL REFERENCES agencies(id),
    full_name TEXT NOT NULL,
    phone TEXT,
    email TEXT,
    property_id INTEGER REFERENCES properties(id) ON DELETE SET NULL,
    status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active','inactive')),
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    UNIQUE (agency_id, full_name, property_id)
);

CREATE TABLE IF NOT EXISTS contract_templates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    agency_id INTEGER NOT NULL REFERENCES agencies(id),
    name TEXT NOT NULL,
    body TEXT NOT NULL,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    UNIQUE (agency_id, name)
);

-- ==========================================================================
-- Contracts & payments
-- ==========================================================================
CREATE TABLE IF NOT EXISTS contracts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    agency_id INTEGER NOT NULL REFERENCES agencies(id),
    reference TEXT,
    tenant_id INTEGER NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    property_id INTEGER REFERENCES properties(id) ON DELETE SET NULL,
    owner_id INTEGER REFERENCES owners(id) ON DELETE SET NULL,
    template_id INTEGER REFERENCES contract_templates(id) ON DELETE SET NULL,
    monthly_rent INTEGER NOT NULL DEFAULT 0,
    deposit_amount INTEGER NOT NULL DEFAULT 0,
    periodicity TEXT NOT NULL DEFAULT 'monthly'
        CHECK (periodicity IN ('monthly','quarterly','semiannual','annual')),
    payment_day INTEGER NOT NULL DEFAULT 5 CHECK (payment_day BETWEEN 1 AND 28),
    start_date TEXT NOT NULL,
    end_date TEXT,
    status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active','terminated','overdue')),
    terminated_at TEXT,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    CHECK (end_date IS NULL OR end_date > start_date)
);

CREATE TABLE IF NOT EXISTS import_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    agency_id INTEGER NOT NULL REFERENCES agencies(id),
    source_file TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    rows_total INTEGER NOT NULL DEFAULT 0,
    rows_inserted INTEGER NOT NULL DEFAULT 0,
    rows_duplicated INTEGER NOT NULL DEFAULT 0,
    rows_failed INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'running'
        CHECK (status IN ('running','done','done_with_errors','failed')),
    errors TEXT
);

CREATE TABLE IF NOT EXISTS payments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    agency_id INTEGER NOT NULL REFERENCES agencies(id),
    contract_id INTEGER REFERENCES contracts(id) ON DELETE SET NULL,
    tenant_id INTEGER REFERENCES tenants(id) ON DELETE SET NULL,
    owner_id INTEGER REFERENCES owners(id) ON DELETE SET NULL,
    property_id INTEGER REFERENCES properties(id) ON DELETE SET NULL,
    amount INTEGER NOT NULL CHECK (amount > 0),
    currency TEXT NOT NULL DEFAULT 'GNF',
    mode TEXT NOT NULL DEFAULT 'autre'
        CHECK (mode IN ('cash','orange_money','marchand','virement','autre')),
    status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending','confirmed','failed')),
    paid_at TEXT NOT NULL,
    due_date TEXT,
    reference TEXT,
    external_ref TEXT,
    allocation TEXT,
    channel TEXT,
    comment TEXT,
    commission_amount INTEGER NOT NULL DEFAULT 0,
    owner_net INTEGER NOT NULL DEFAULT 0,
    raw_hash TEXT NOT NULL,
    idempotency_key TEXT,
    source_file TEXT,
    import_run_id INTEGER REFERENCES import_runs(id) ON DELETE SET NULL,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    UNIQUE (agency_id, reference),
    UNIQUE (agency_id, idempotency_key)
);

CREATE TABLE IF NOT EXISTS receipt_counters (
    agency_id INTEGER NOT NULL,
    year INTEGER NOT NULL,
    counter INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (agency_id, year)
);

CREATE TABLE IF NOT EXISTS payment_status_year (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    contract_id INTEGER NOT NULL REFERENCES contracts(id) ON DELETE CASCADE,
    year INTEGER NOT NULL,
    period_from TEXT NOT NULL,
    period_to TEXT NOT NULL,
    due_amount INTEGER NOT NULL DEFAULT 0,
    paid_amount INTEGER NOT NULL DEFAULT 0,
    arrears_amount INTEGER NOT NULL DEFAULT 0,
    arrears_months INTEGER NOT NULL DEFAULT 0,
    pressure_level TEXT NOT NULL DEFAULT 'none'
        CHECK (pressure_level IN ('none','reminder','pressure','closure')),
    last_update TEXT NOT NULL,
    UNIQUE (contract_id, year)
);

-- ==========================================================================
-- Deposits, disputes, notifications
-- ==========================================================================
CREATE TABLE IF NOT EXISTS deposits (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    agency_id INTEGER NOT NULL REFERENCES agencies(id),
    contract_id INTEGER UNIQUE NOT NULL REFERENCES contracts(id) ON DELETE CASCADE,
    amount INTEGER NOT NULL CHECK (amount > 0),
    balance INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'held' CHECK (status IN ('held','returned')),
    received_at TEXT NOT NULL,
    returned_at TEXT,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS deposit_movements (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    deposit_id INTEGER NOT NULL REFERENCES deposits(id) ON DELETE CASCADE,
    kind TEXT NOT NULL CHECK (kind IN ('deduct','return')),
    amount INTEGER NOT NULL CHECK (amount >= 0),
    reason TEXT,
    occurred_at TEXT NOT NULL,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS disputes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    agency_id INTEGER NOT NULL REFERENCES agencies(id),
    tenant_id INTEGER NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    contract_id INTEGER REFERENCES contracts(id) ON DELETE SET NULL,
    title TEXT NOT NULL,
    description TEXT,
    dispute_type TEXT NOT NULL
        CHECK (dispute_type IN ('property_damage','rent_arrears','lease_violation','refund_claim')),
    claim_amount INTEGER,
    status TEXT NOT NULL DEFAULT 'filed'
        CHECK (status IN ('filed','mediation','arbitration','resolved','closed')),
    decision TEXT,
    awarded_amount INTEGER,
    created_by INTEGER,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS notifications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    agency_id INTEGER NOT NULL REFERENCES agencies(id),
    tenant_id INTEGER REFERENCES tenants(id) ON DELETE CASCADE,
    contract_id INTEGER REFERENCES contracts(id) ON DELETE CASCADE,
    year INTEGER NOT NULL,
    level TEXT NOT NULL CHECK (level IN ('reminder','pressure','closure')),
    channel TEXT NOT NULL DEFAULT 'sms',
    message TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending','sent')),
    sent_at TEXT,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    UNIQUE (contract_id, year, level)
);

-- ==========================================================================
-- Audit trail (every mutation is an event)
-- ==========================================================================
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id TEXT UNIQUE NOT NULL,
    timestamp TEXT NOT NULL,
    event_type TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    data TEXT NOT NULL,
    actor TEXT NOT NULL
);

-- ==========================================================================
-- Indexes
-- ==========================================================================
CREATE INDEX IF NOT EXISTS idx_tenants_agency ON tenants(agency_id);
CREATE INDEX IF NOT EXISTS idx_properties_agency ON properties(agency_id);
CREATE INDEX IF NOT EXISTS idx_contracts_tenant_property ON contracts(tenant_id, property_id);
CREATE INDEX IF NOT EXISTS idx_contracts_status ON contracts(status);
CREATE INDEX IF NOT EXISTS idx_contracts_reference ON contracts(reference);
CREATE INDEX IF NOT EXISTS idx_payments_contract_paid ON payments(contract_id, paid_at);
CREATE INDEX IF NOT EXISTS idx_payments_tenant_paid ON payments(tenant_id, paid_at);
CREATE INDEX IF NOT EXISTS idx_payments_status ON payments(status);
CREATE INDEX IF NOT EXISTS idx_payments_mode ON payments(mode);
-- a failed payment may be entered again
CREATE UNIQUE INDEX IF NOT EXISTS idx_payments_live_hash ON payments(raw_hash) WHERE status != 'failed';
CREATE INDEX IF NOT EXISTS idx_psy_pressure ON payment_status_year(pressure_level);
CREATE INDEX IF NOT EXISTS idx_import_runs_started ON import_runs(started_at);
CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id);
CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
";

/// SHA-256 hex digest of `|`-joined parts, used for dedup keys and token hashes
pub fn sha256_hex(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parts.join("|"));
    format!("{:x}", hasher.finalize())
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// Count rows of a table (table name is never user input)
pub fn count_rows(conn: &Connection, table: &str) -> Result<i64> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
        row.get(0)
    })?;
    Ok(count)
}

// ============================================================================
// AUDIT EVENTS
// ============================================================================

/// Audit trail entry: who did what to which entity
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: impl ToString,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Shorthand used by services after each mutation
pub fn record_event(
    conn: &Connection,
    event_type: &str,
    entity_type: &str,
    entity_id: impl ToString,
    data: serde_json::Value,
    actor: &str,
) -> Result<()> {
    insert_event(
        conn,
        &Event::new(event_type, entity_type, entity_id, data, actor),
    )
}

pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id DESC",
    )?;

    let rows = stmt
        .query_map(params![entity_type, entity_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(
            |(event_id, timestamp, event_type, entity_type, entity_id, data, actor)| {
                let timestamp = DateTime::parse_from_rfc3339(&timestamp)
                    .map_err(|e| AkigError::Internal(format!("bad event timestamp: {}", e)))?
                    .with_timezone(&Utc);
                Ok(Event {
                    event_id,
                    timestamp,
                    event_type,
                    entity_type,
                    entity_id,
                    data: serde_json::from_str(&data)?,
                    actor,
                })
            },
        )
        .collect()
}

// ============================================================================
// RECEIPT NUMBERS
// ============================================================================

/// Next receipt reference for an agency: `GNF-<year>-<counter:06>`.
/// The counter restarts every year.
pub fn next_receipt_number(conn: &Connection, agency_id: i64, year: i32) -> Result<String> {
    let counter: i64 = conn.query_row(
        "INSERT INTO receipt_counters (agency_id, year, counter) VALUES (?1, ?2, 1)
         ON CONFLICT (agency_id, year) DO UPDATE SET counter = counter + 1
         RETURNING counter",
        params![agency_id, year],
        |row| row.get(0),
    )?;

    Ok(format!("GNF-{}-{:06}", year, counter))
}

/// Ensure a default agency exists (fresh installs, CLI import without login)
pub fn ensure_default_agency(conn: &Connection) -> Result<i64> {
    let existing: Option<i64> = conn
        .query_row("SELECT id FROM agencies ORDER BY id LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()?;

    if let Some(id) = existing {
        return Ok(id);
    }

    conn.execute(
        "INSERT INTO agencies (name, city, country) VALUES ('AKIG', 'Conakry', 'Guinea')",
        [],
    )?;
    let id = conn.last_insert_rowid();
    info!(agency_id = id, "created default agency");
    Ok(id)
}
