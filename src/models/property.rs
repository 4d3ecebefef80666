use crate::error::{AkigError, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyStatus {
    Available,
    Occupied,
    Maintenance,
}

impl PropertyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyStatus::Available => "available",
            PropertyStatus::Occupied => "occupied",
            PropertyStatus::Maintenance => "maintenance",
        }
    }
}

impl FromStr for PropertyStatus {
    type Err = AkigError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "available" => Ok(PropertyStatus::Available),
            "occupied" => Ok(PropertyStatus::Occupied),
            "maintenance" => Ok(PropertyStatus::Maintenance),
            other => Err(AkigError::validation(format!(
                "unknown property status '{}'",
                other
            ))),
        }
    }
}

/// A site or building managed by the agency
#[derive(Debug, Clone, Serialize)]
pub struct Property {
    pub id: i64,
    pub agency_id: i64,
    pub owner_id: Option<i64>,
    pub name: String,
    pub address: Option<String>,
    pub city: Option<String>,
    pub property_type: Option<String>,
    pub rent_amount: i64,
    pub status: PropertyStatus,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewProperty {
    pub owner_id: Option<i64>,
    pub name: String,
    pub address: Option<String>,
    pub city: Option<String>,
    pub property_type: Option<String>,
    #[serde(default)]
    pub rent_amount: i64,
}

const PROPERTY_COLUMNS: &str = "id, agency_id, owner_id, name, address, city, property_type, \
                                rent_amount, status, created_at";

impl Property {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let status: String = row.get("status")?;
        Ok(Property {
            id: row.get("id")?,
            agency_id: row.get("agency_id")?,
            owner_id: row.get("owner_id")?,
            name: row.get("name")?,
            address: row.get("address")?,
            city: row.get("city")?,
            property_type: row.get("property_type")?,
            rent_amount: row.get("rent_amount")?,
            status: status.parse().unwrap_or(PropertyStatus::Available),
            created_at: row.get("created_at")?,
        })
    }
}

pub fn insert_property(conn: &Connection, agency_id: i64, new: &NewProperty) -> Result<Property> {
    let name = new.name.trim();
    if name.is_empty() {
        return Err(AkigError::validation("property name is required"));
    }
    if new.rent_amount < 0 {
        return Err(AkigError::validation("rent amount cannot be negative"));
    }
    if let Some(owner_id) = new.owner_id {
        super::owner::get_owner(conn, agency_id, owner_id)?;
    }

    let result = conn.execute(
        "INSERT INTO properties (agency_id, owner_id, name, address, city, property_type, rent_amount)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            agency_id,
            new.owner_id,
            name,
            new.address,
            new.city,
            new.property_type,
            new.rent_amount
        ],
    );
    if let Err(e) = result {
        let err = AkigError::from(e);
        return Err(if err.is_constraint_violation() {
            AkigError::Conflict(format!("property '{}' already exists", name))
        } else {
            err
        });
    }

    get_property(conn, agency_id, conn.last_insert_rowid())
}

pub fn get_property(conn: &Connection, agency_id: i64, id: i64) -> Result<Property> {
    conn.query_row(
        &format!(
            "SELECT {} FROM properties WHERE id = ?1 AND agency_id = ?2",
            PROPERTY_COLUMNS
        ),
        params![id, agency_id],
        Property::from_row,
    )
    .optional()?
    .ok_or_else(|| AkigError::not_found("property", id))
}

pub fn list_properties(
    conn: &Connection,
    agency_id: i64,
    status: Option<PropertyStatus>,
) -> Result<Vec<Property>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM properties
         WHERE agency_id = ?1 AND (?2 IS NULL OR status = ?2)
         ORDER BY name",
        PROPERTY_COLUMNS
    ))?;
    let properties = stmt
        .query_map(
            params![agency_id, status.map(|s| s.as_str())],
            Property::from_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(properties)
}

pub fn update_property_status(
    conn: &Connection,
    agency_id: i64,
    id: i64,
    status: PropertyStatus,
) -> Result<()> {
    let changed = conn.execute(
        "UPDATE properties SET status = ?1 WHERE id = ?2 AND agency_id = ?3",
        params![status.as_str(), id, agency_id],
    )?;
    if changed == 0 {
        return Err(AkigError::not_found("property", id));
    }
    Ok(())
}

/// Find a property (site) by name, creating it under `owner_id` when missing.
/// An existing site is re-linked to the given owner.
pub fn upsert_property_by_name(
    conn: &Connection,
    agency_id: i64,
    name: &str,
    owner_id: Option<i64>,
) -> Result<i64> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AkigError::validation("site name is required"));
    }

    conn.execute(
        "INSERT INTO properties (agency_id, owner_id, name) VALUES (?1, ?2, ?3)
         ON CONFLICT (agency_id, name) DO UPDATE SET owner_id = COALESCE(excluded.owner_id, owner_id)",
        params![agency_id, owner_id, name],
    )?;

    let id = conn.query_row(
        "SELECT id FROM properties WHERE agency_id = ?1 AND name = ?2",
        params![agency_id, name],
        |row| row.get(0),
    )?;
    Ok(id)
}
