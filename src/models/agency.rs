use crate::error::{AkigError, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agency {
    pub id: i64,
    pub name: String,
    pub city: Option<String>,
    pub country: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgencyUpdate {
    pub name: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl Agency {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Agency {
            id: row.get("id")?,
            name: row.get("name")?,
            city: row.get("city")?,
            country: row.get("country")?,
            phone: row.get("phone")?,
            email: row.get("email")?,
            created_at: row.get("created_at")?,
        })
    }
}

pub fn insert_agency(conn: &Connection, name: &str, city: Option<&str>) -> Result<i64> {
    if name.trim().is_empty() {
        return Err(AkigError::validation("agency name is required"));
    }
    conn.execute(
        "INSERT INTO agencies (name, city) VALUES (?1, ?2)",
        params![name.trim(), city],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_agency(conn: &Connection, id: i64) -> Result<Agency> {
    conn.query_row(
        "SELECT id, name, city, country, phone, email, created_at FROM agencies WHERE id = ?1",
        [id],
        Agency::from_row,
    )
    .optional()?
    .ok_or_else(|| AkigError::not_found("agency", id))
}

pub fn update_agency(conn: &Connection, id: i64, update: &AgencyUpdate) -> Result<Agency> {
    if let Some(name) = &update.name {
        if name.trim().is_empty() {
            return Err(AkigError::validation("agency name cannot be empty"));
        }
    }

    let changed = conn.execute(
        "UPDATE agencies SET
            name = COALESCE(?1, name),
            city = COALESCE(?2, city),
            country = COALESCE(?3, country),
            phone = COALESCE(?4, phone),
            email = COALESCE(?5, email),
            updated_at = CURRENT_TIMESTAMP
         WHERE id = ?6",
        params![
            update.name.as_deref().map(str::trim),
            update.city,
            update.country,
            update.phone,
            update.email,
            id
        ],
    )?;

    if changed == 0 {
        return Err(AkigError::not_found("agency", id));
    }
    get_agency(conn, id)
}
