use crate::error::{AkigError, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

/// Property owner (landlord) the agency remits collected rent to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Owner {
    pub id: i64,
    pub agency_id: i64,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewOwner {
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl Owner {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Owner {
            id: row.get("id")?,
            agency_id: row.get("agency_id")?,
            name: row.get("name")?,
            phone: row.get("phone")?,
            email: row.get("email")?,
            created_at: row.get("created_at")?,
        })
    }
}

pub fn insert_owner(conn: &Connection, agency_id: i64, owner: &NewOwner) -> Result<Owner> {
    let name = owner.name.trim();
    if name.is_empty() {
        return Err(AkigError::validation("owner name is required"));
    }

    let result = conn.execute(
        "INSERT INTO owners (agency_id, name, phone, email) VALUES (?1, ?2, ?3, ?4)",
        params![agency_id, name, owner.phone, owner.email],
    );
    if let Err(e) = result {
        let err = AkigError::from(e);
        return Err(if err.is_constraint_violation() {
            AkigError::Conflict(format!("owner '{}' already exists", name))
        } else {
            err
        });
    }

    get_owner(conn, agency_id, conn.last_insert_rowid())
}

pub fn get_owner(conn: &Connection, agency_id: i64, id: i64) -> Result<Owner> {
    conn.query_row(
        "SELECT id, agency_id, name, phone, email, created_at
         FROM owners WHERE id = ?1 AND agency_id = ?2",
        params![id, agency_id],
        Owner::from_row,
    )
    .optional()?
    .ok_or_else(|| AkigError::not_found("owner", id))
}

pub fn list_owners(conn: &Connection, agency_id: i64) -> Result<Vec<Owner>> {
    let mut stmt = conn.prepare(
        "SELECT id, agency_id, name, phone, email, created_at
         FROM owners WHERE agency_id = ?1 ORDER BY name",
    )?;
    let owners = stmt
        .query_map([agency_id], Owner::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(owners)
}

/// Find an owner by exact name, creating it when missing. Returns the id.
pub fn upsert_owner_by_name(conn: &Connection, agency_id: i64, name: &str) -> Result<i64> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AkigError::validation("owner name is required"));
    }

    conn.execute(
        "INSERT INTO owners (agency_id, name) VALUES (?1, ?2)
         ON CONFLICT (agency_id, name) DO NOTHING",
        params![agency_id, name],
    )?;

    let id = conn.query_row(
        "SELECT id FROM owners WHERE agency_id = ?1 AND name = ?2",
        params![agency_id, name],
        |row| row.get(0),
    )?;
    Ok(id)
}
