// 📥 Payment import - CSV and JSON spreadsheets exported by agencies
//
// source bytes → RawPaymentRow (per format) → normalise → hash → upsert
// owner / site / tenant → ensure contract → insert payment with commission
//
// The batch runs in one transaction. Each row gets its own savepoint so a
// row that fails validation leaves nothing behind; a database error aborts
// the whole batch and the run is marked failed.

use super::{arrears, commission};
use crate::db::{next_receipt_number, record_event, sha256_hex};
use crate::error::{AkigError, Result};
use crate::models::contract::{find_contract_by_reference, insert_contract, latest_contract_for};
use crate::models::import_run::{finish_import_run, start_import_run};
use crate::models::owner::upsert_owner_by_name;
use crate::models::payment::{find_payment_by_hash, insert_payment_row};
use crate::models::property::upsert_property_by_name;
use crate::models::tenant::{normalize_phone, upsert_tenant};
use crate::models::{
    ImportCounts, ImportRunStatus, NewContract, PaymentMode, PaymentRow, PaymentStatus, MAX_AMOUNT,
};
use arrears::RecomputeSummary;
use chrono::{Datelike, NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::Path;
use tracing::{error, info, warn};

// ============================================================================
// CORE TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportFormat {
    Csv,
    Json,
}

impl ImportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportFormat::Csv => "csv",
            ImportFormat::Json => "json",
        }
    }
}

impl fmt::Display for ImportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One spreadsheet row, as found in the file.
///
/// Header names follow the agencies' French exports; English headers are
/// accepted as aliases.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RawPaymentRow {
    #[serde(alias = "Nom locataire", alias = "Locataire", alias = "Tenant")]
    pub tenant_name: String,
    #[serde(alias = "Téléphone", alias = "Telephone", alias = "Phone")]
    pub tenant_phone: String,
    #[serde(alias = "Propriétaire", alias = "Proprietaire", alias = "Owner")]
    pub owner_name: String,
    #[serde(alias = "Immeuble/Site", alias = "Site")]
    pub site_name: String,
    #[serde(alias = "Contrat", alias = "Ref contrat", alias = "Contract")]
    pub contract_ref: String,
    #[serde(alias = "Date paiement", alias = "Date")]
    pub paid_at: String,
    #[serde(alias = "Montant", alias = "Amount", deserialize_with = "text_or_number")]
    pub amount: String,
    #[serde(alias = "Mode paiement", alias = "Mode")]
    pub mode: String,
    #[serde(alias = "Affectation", alias = "Allocation")]
    pub allocation: String,
    #[serde(alias = "Canal", alias = "Channel")]
    pub channel: String,
    #[serde(alias = "Commentaire", alias = "Note")]
    pub comment: String,
    #[serde(alias = "Ref externe", alias = "Transaction")]
    pub external_ref: String,

    /// Line in the source file (1-based, header counted)
    #[serde(skip)]
    pub line_number: usize,
}

/// A row after normalisation, ready to be written
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    pub tenant_name: String,
    pub tenant_phone: Option<String>,
    pub owner_name: String,
    pub site_name: String,
    pub contract_ref: Option<String>,
    pub paid_at: NaiveDate,
    pub amount: i64,
    pub mode: PaymentMode,
    pub allocation: Option<String>,
    pub channel: Option<String>,
    pub comment: Option<String>,
    pub external_ref: Option<String>,
    pub raw_hash: String,
}

fn text_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TextOrNumber {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(match TextOrNumber::deserialize(deserializer)? {
        TextOrNumber::Text(s) => s,
        TextOrNumber::Int(n) => n.to_string(),
        TextOrNumber::Float(f) => format!("{:.0}", f),
    })
}

fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    (!t.is_empty()).then(|| t.to_string())
}

/// Keep digits only: "1 500 000", "1,500,000" and "1500000 GNF" all read 1500000
pub fn parse_amount(raw: &str) -> Option<i64> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    digits
        .parse::<i64>()
        .ok()
        .filter(|a| (1..=MAX_AMOUNT).contains(a))
}

/// `YYYY-MM-DD` (optionally followed by a time) or `DD/MM/YYYY`
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let t = raw.trim();
    let head = t.get(..10)?;
    NaiveDate::parse_from_str(head, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(head, "%d/%m/%Y"))
        .ok()
}

impl RawPaymentRow {
    /// Dedup key: the same row in the same file always hashes the same
    pub fn hash(&self, source_file: &str) -> String {
        sha256_hex(&[
            source_file,
            self.tenant_name.trim(),
            self.owner_name.trim(),
            self.site_name.trim(),
            self.paid_at.trim(),
            self.amount.trim(),
            self.mode.trim(),
            self.allocation.trim(),
            self.external_ref.trim(),
        ])
    }

    pub fn normalize(&self, source_file: &str) -> Result<NormalizedRow> {
        let required = [
            (&self.tenant_name, "missing tenant name"),
            (&self.owner_name, "missing owner name"),
            (&self.site_name, "missing site name"),
            (&self.paid_at, "missing payment date"),
        ];
        for (value, message) in required {
            if value.trim().is_empty() {
                return Err(AkigError::validation(message));
            }
        }

        let amount = parse_amount(&self.amount)
            .ok_or_else(|| AkigError::validation(format!("invalid amount '{}'", self.amount)))?;
        let paid_at = parse_date(&self.paid_at)
            .ok_or_else(|| AkigError::validation(format!("invalid date '{}'", self.paid_at)))?;

        Ok(NormalizedRow {
            tenant_name: self.tenant_name.trim().to_string(),
            tenant_phone: normalize_phone(&self.tenant_phone),
            owner_name: self.owner_name.trim().to_string(),
            site_name: self.site_name.trim().to_string(),
            contract_ref: non_empty(&self.contract_ref),
            paid_at,
            amount,
            mode: PaymentMode::normalize(&self.mode),
            allocation: non_empty(&self.allocation),
            channel: non_empty(&self.channel),
            comment: non_empty(&self.comment),
            external_ref: non_empty(&self.external_ref),
            raw_hash: self.hash(source_file),
        })
    }
}

// ============================================================================
// SOURCES
// ============================================================================

/// PaymentSource - turns raw bytes of one format into rows
pub trait PaymentSource: Send + Sync {
    fn parse(&self, data: &[u8]) -> Result<Vec<RawPaymentRow>>;

    fn format(&self) -> ImportFormat;

    fn version(&self) -> &str {
        "1.0.0"
    }
}

/// Comma or semicolon separated, first line is the header
pub struct CsvSource;

impl CsvSource {
    pub fn new() -> Self {
        CsvSource
    }

    /// Excel in French locales writes `;`
    fn sniff_delimiter(data: &[u8]) -> u8 {
        let header = data.split(|b| *b == b'\n').next().unwrap_or_default();
        let semicolons = header.iter().filter(|b| **b == b';').count();
        let commas = header.iter().filter(|b| **b == b',').count();
        if semicolons > commas {
            b';'
        } else {
            b','
        }
    }
}

impl PaymentSource for CsvSource {
    fn parse(&self, data: &[u8]) -> Result<Vec<RawPaymentRow>> {
        use csv::{ReaderBuilder, Trim};

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::Headers)
            .delimiter(Self::sniff_delimiter(data))
            .from_reader(data);

        let mut rows = Vec::new();
        for (line_num, result) in reader.deserialize::<RawPaymentRow>().enumerate() {
            let mut row = result?;
            row.line_number = line_num + 2; // 1-indexed + header row
            rows.push(row);
        }
        Ok(rows)
    }

    fn format(&self) -> ImportFormat {
        ImportFormat::Csv
    }
}

/// A JSON array of row objects, or `{ "rows": [...] }`
pub struct JsonSource;

impl JsonSource {
    pub fn new() -> Self {
        JsonSource
    }
}

impl PaymentSource for JsonSource {
    fn parse(&self, data: &[u8]) -> Result<Vec<RawPaymentRow>> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Document {
            List(Vec<RawPaymentRow>),
            Wrapped { rows: Vec<RawPaymentRow> },
        }

        let mut rows = match serde_json::from_slice::<Document>(data)? {
            Document::List(rows) | Document::Wrapped { rows } => rows,
        };
        for (idx, row) in rows.iter_mut().enumerate() {
            row.line_number = idx + 1;
        }
        Ok(rows)
    }

    fn format(&self) -> ImportFormat {
        ImportFormat::Json
    }
}

/// Detect the format from the file extension, then from the first byte
pub fn detect_format(file_name: &str, data: &[u8]) -> ImportFormat {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase);
    match ext.as_deref() {
        Some("json") => return ImportFormat::Json,
        Some("csv") | Some("txt") => return ImportFormat::Csv,
        _ => {}
    }

    match data.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'[') | Some(b'{') => ImportFormat::Json,
        _ => ImportFormat::Csv,
    }
}

pub fn get_source(format: ImportFormat) -> Box<dyn PaymentSource> {
    match format {
        ImportFormat::Csv => Box::new(CsvSource::new()),
        ImportFormat::Json => Box::new(JsonSource::new()),
    }
}

// ============================================================================
// IMPORT
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub run_id: i64,
    pub source_file: String,
    pub format: ImportFormat,
    pub status: ImportRunStatus,
    #[serde(flatten)]
    pub counts: ImportCounts,
    pub errors: Vec<String>,
    /// `None` when the post-import recompute failed; the rows stay committed
    pub arrears: Option<RecomputeSummary>,
}

enum RowOutcome {
    Inserted,
    Duplicate,
}

/// Row-level problems are reported and skipped; anything else aborts the batch
fn is_row_error(err: &AkigError) -> bool {
    matches!(
        err,
        AkigError::Validation(_) | AkigError::NotFound { .. } | AkigError::Conflict(_)
    )
}

/// Contract lookup order: reference, then latest tenant+site contract, then
/// a new active contract starting today with the paid amount as rent.
fn ensure_contract(
    conn: &Connection,
    agency_id: i64,
    tenant_id: i64,
    site_id: i64,
    owner_id: i64,
    row: &NormalizedRow,
) -> Result<i64> {
    if let Some(reference) = &row.contract_ref {
        if let Some(contract) = find_contract_by_reference(conn, agency_id, reference)? {
            return Ok(contract.id);
        }
    }

    if let Some(contract) = latest_contract_for(conn, tenant_id, site_id)? {
        return Ok(contract.id);
    }

    let mut new = NewContract::new(tenant_id, row.amount, Utc::now().date_naive());
    new.reference = row.contract_ref.clone();
    new.property_id = Some(site_id);
    new.owner_id = Some(owner_id);
    let contract = insert_contract(conn, agency_id, &new)?;
    info!(contract_id = contract.id, tenant_id, "contract created by import");
    Ok(contract.id)
}

fn import_row(
    conn: &Connection,
    agency_id: i64,
    run_id: i64,
    source_file: &str,
    raw: &RawPaymentRow,
) -> Result<RowOutcome> {
    let row = raw.normalize(source_file)?;
    if find_payment_by_hash(conn, &row.raw_hash)?.is_some() {
        return Ok(RowOutcome::Duplicate);
    }

    let owner_id = upsert_owner_by_name(conn, agency_id, &row.owner_name)?;
    let site_id = upsert_property_by_name(conn, agency_id, &row.site_name, Some(owner_id))?;
    let tenant_id = upsert_tenant(
        conn,
        agency_id,
        &row.tenant_name,
        row.tenant_phone.as_deref(),
        site_id,
    )?;
    let contract_id = ensure_contract(conn, agency_id, tenant_id, site_id, owner_id, &row)?;

    let split = commission::allocate(row.amount);
    let reference = next_receipt_number(conn, agency_id, row.paid_at.year())?;
    insert_payment_row(
        conn,
        &PaymentRow {
            agency_id,
            contract_id: Some(contract_id),
            tenant_id: Some(tenant_id),
            owner_id: Some(owner_id),
            property_id: Some(site_id),
            amount: row.amount,
            mode: row.mode,
            // spreadsheet rows record money already collected
            status: PaymentStatus::Confirmed,
            paid_at: row.paid_at,
            due_date: None,
            reference: Some(reference),
            external_ref: row.external_ref,
            allocation: row.allocation,
            channel: row.channel,
            comment: row.comment,
            commission_amount: split.commission,
            owner_net: split.owner_net,
            raw_hash: row.raw_hash,
            idempotency_key: None,
            source_file: Some(source_file.to_string()),
            import_run_id: Some(run_id),
        },
    )?;
    Ok(RowOutcome::Inserted)
}

fn import_rows(
    conn: &Connection,
    agency_id: i64,
    run_id: i64,
    source_file: &str,
    rows: &[RawPaymentRow],
    counts: &mut ImportCounts,
    errors: &mut Vec<String>,
) -> Result<()> {
    let mut tx = conn.unchecked_transaction()?;

    for raw in rows {
        let sp = tx.savepoint()?;
        match import_row(&sp, agency_id, run_id, source_file, raw) {
            Ok(RowOutcome::Inserted) => {
                sp.commit()?;
                counts.rows_inserted += 1;
            }
            Ok(RowOutcome::Duplicate) => counts.rows_duplicated += 1,
            Err(e) if is_row_error(&e) => {
                // dropping the savepoint rolls the row back
                drop(sp);
                counts.rows_failed += 1;
                errors.push(format!("line {}: {}", raw.line_number, e));
            }
            Err(e) => return Err(e),
        }
    }

    tx.commit()?;
    Ok(())
}

/// Import one file. The run is recorded even when the batch fails.
pub fn import_payments(
    conn: &Connection,
    agency_id: i64,
    source_file: &str,
    format: ImportFormat,
    data: &[u8],
    actor: &str,
) -> Result<ImportReport> {
    let source_file = source_file.trim();
    if source_file.is_empty() {
        return Err(AkigError::validation("source file name is required"));
    }

    let run_id = start_import_run(conn, agency_id, source_file)?;
    let parser = get_source(format);
    info!(run_id, source_file, format = %format, parser = parser.version(), "import started");

    let rows = match parser.parse(data) {
        Ok(rows) => rows,
        Err(e) => {
            warn!(run_id, error = %e, "import file could not be read");
            finish_import_run(conn, run_id, &ImportCounts::default(), &[e.to_string()], true)?;
            return Err(e);
        }
    };

    let mut counts = ImportCounts {
        rows_total: rows.len() as i64,
        ..Default::default()
    };
    let mut errors = Vec::new();

    if let Err(e) = import_rows(
        conn,
        agency_id,
        run_id,
        source_file,
        &rows,
        &mut counts,
        &mut errors,
    ) {
        error!(run_id, error = %e, "import aborted, batch rolled back");
        let rolled_back = ImportCounts {
            rows_total: counts.rows_total,
            ..Default::default()
        };
        errors.push(e.to_string());
        finish_import_run(conn, run_id, &rolled_back, &errors, true)?;
        return Err(e);
    }

    let status = finish_import_run(conn, run_id, &counts, &errors, false)?;
    let arrears = match arrears::recompute_all(conn, Some(agency_id)) {
        Ok(summary) => Some(summary),
        Err(e) => {
            warn!(run_id, error = %e, "arrears recompute after import failed");
            errors.push(format!("arrears recompute failed: {e}"));
            None
        }
    };
    record_event(
        conn,
        "import_completed",
        "import_run",
        run_id,
        serde_json::json!({
            "source_file": source_file,
            "inserted": counts.rows_inserted,
            "duplicated": counts.rows_duplicated,
            "failed": counts.rows_failed,
        }),
        actor,
    )?;

    info!(
        run_id,
        total = counts.rows_total,
        inserted = counts.rows_inserted,
        duplicated = counts.rows_duplicated,
        failed = counts.rows_failed,
        "import finished"
    );

    Ok(ImportReport {
        run_id,
        source_file: source_file.to_string(),
        format,
        status,
        counts,
        errors,
        arrears,
    })
}

/// Read a file from disk and import it (CLI entry point)
pub fn import_file(
    conn: &Connection,
    agency_id: i64,
    path: &Path,
    actor: &str,
) -> Result<ImportReport> {
    let data = std::fs::read(path)?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("import.csv")
        .to_string();
    let format = detect_format(&file_name, &data);
    import_payments(conn, agency_id, &file_name, format, &data, actor)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{count_rows, ensure_default_agency, open_database};
    use crate::models::import_run::get_import_run;
    use crate::models::payment::query_payments;
    use crate::models::PaymentFilter;
    use std::io::Write;

    const FRENCH_CSV: &str = "\
Nom locataire,Téléphone,Propriétaire,Immeuble/Site,Contrat,Date paiement,Montant,Mode paiement,Affectation
Mamadou Diallo,620 12 34 56,Alpha Condé,Résidence Kaloum,CTR-A1,05/03/2024,1 500 000,Espèces,Loyer mars
Fatoumata Camara,+224 621000000,Alpha Condé,Résidence Kaloum,,2024-03-07 10:30,800000,Orange Money,
";

    fn setup() -> (Connection, i64) {
        let conn = open_database(":memory:").unwrap();
        let agency = ensure_default_agency(&conn).unwrap();
        (conn, agency)
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("1 500 000"), Some(1_500_000));
        assert_eq!(parse_amount("1,500,000 GNF"), Some(1_500_000));
        assert_eq!(parse_amount("0"), None);
        assert_eq!(parse_amount("abc"), None);
        // out of range, and too long for i64 at all
        assert_eq!(parse_amount("2 000 000 000 000"), None);
        assert_eq!(parse_amount("99999999999999999999999"), None);
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert_eq!(parse_date("2024-03-05"), Some(expected));
        assert_eq!(parse_date("2024-03-05 14:20"), Some(expected));
        assert_eq!(parse_date("05/03/2024"), Some(expected));
        assert_eq!(parse_date("March 5th"), None);
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format("paiements.csv", b"{"), ImportFormat::Csv);
        assert_eq!(detect_format("paiements.json", b""), ImportFormat::Json);
        assert_eq!(detect_format("upload", b"  [{}]"), ImportFormat::Json);
        assert_eq!(detect_format("upload", b"Locataire,Montant"), ImportFormat::Csv);
    }

    #[test]
    fn test_csv_source_french_headers() {
        let rows = CsvSource::new().parse(FRENCH_CSV.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].tenant_name, "Mamadou Diallo");
        assert_eq!(rows[0].site_name, "Résidence Kaloum");
        assert_eq!(rows[0].amount, "1 500 000");
        assert_eq!(rows[0].line_number, 2);
        assert_eq!(rows[1].line_number, 3);
    }

    #[test]
    fn test_csv_source_semicolons_and_english_headers() {
        let data = "Tenant;Owner;Site;Date;Amount;Mode\nAwa Sylla;Bah;Dixinn;2024-01-02;500000;cash\n";
        let rows = CsvSource::new().parse(data.as_bytes()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].owner_name, "Bah");
        assert_eq!(rows[0].mode, "cash");
    }

    #[test]
    fn test_json_source_accepts_numbers() {
        let data = br#"[{"tenant_name":"Awa Sylla","owner_name":"Bah","site_name":"Dixinn",
                        "paid_at":"2024-01-02","amount":500000,"mode":"OM"}]"#;
        let rows = JsonSource::new().parse(data).unwrap();
        assert_eq!(rows[0].amount, "500000");

        let norm = rows[0].normalize("api.json").unwrap();
        assert_eq!(norm.amount, 500_000);
        assert_eq!(norm.mode, PaymentMode::OrangeMoney);
    }

    #[test]
    fn test_normalize_reports_missing_fields() {
        let row = RawPaymentRow {
            tenant_name: "Awa".into(),
            owner_name: "Bah".into(),
            paid_at: "2024-01-02".into(),
            amount: "100".into(),
            ..Default::default()
        };
        let err = row.normalize("f.csv").unwrap_err();
        assert_eq!(err.to_string(), "missing site name");
    }

    #[test]
    fn test_rows_survive_a_failed_recompute() {
        let (conn, agency) = setup();
        conn.execute_batch("DROP TABLE payment_status_year").unwrap();

        let report = import_payments(
            &conn,
            agency,
            "mars.csv",
            ImportFormat::Csv,
            FRENCH_CSV.as_bytes(),
            "test",
        )
        .unwrap();

        assert_eq!(report.status, ImportRunStatus::Done);
        assert_eq!(report.counts.rows_inserted, 2);
        assert!(report.arrears.is_none());
        assert!(report.errors.iter().any(|e| e.contains("arrears recompute failed")));
        assert_eq!(count_rows(&conn, "payments").unwrap(), 2);
    }

    #[test]
    fn test_import_csv_end_to_end() {
        let (conn, agency) = setup();
        let report = import_payments(
            &conn,
            agency,
            "mars.csv",
            ImportFormat::Csv,
            FRENCH_CSV.as_bytes(),
            "test",
        )
        .unwrap();

        assert_eq!(report.status, ImportRunStatus::Done);
        assert_eq!(report.counts.rows_total, 2);
        assert_eq!(report.counts.rows_inserted, 2);
        assert_eq!(count_rows(&conn, "owners").unwrap(), 1);
        assert_eq!(count_rows(&conn, "properties").unwrap(), 1);
        assert_eq!(count_rows(&conn, "tenants").unwrap(), 2);
        assert_eq!(count_rows(&conn, "contracts").unwrap(), 2);

        let payments = query_payments(&conn, agency, &PaymentFilter::default()).unwrap();
        assert!(payments.iter().all(|p| p.status == PaymentStatus::Confirmed));
        let big = payments.iter().find(|p| p.amount == 1_500_000).unwrap();
        assert_eq!(big.commission_amount, 225_000);
        assert_eq!(big.owner_net, 1_275_000);
        assert_eq!(big.mode, PaymentMode::Cash);
        assert!(big.reference.as_deref().unwrap().starts_with("GNF-2024-"));
        assert!(report.arrears.as_ref().unwrap().years.contains(&2024));
    }

    #[test]
    fn test_reimport_counts_duplicates() {
        let (conn, agency) = setup();
        import_payments(&conn, agency, "mars.csv", ImportFormat::Csv, FRENCH_CSV.as_bytes(), "t")
            .unwrap();
        let again =
            import_payments(&conn, agency, "mars.csv", ImportFormat::Csv, FRENCH_CSV.as_bytes(), "t")
                .unwrap();

        assert_eq!(again.counts.rows_inserted, 0);
        assert_eq!(again.counts.rows_duplicated, 2);
        assert_eq!(count_rows(&conn, "payments").unwrap(), 2);
        assert_eq!(count_rows(&conn, "contracts").unwrap(), 2);
    }

    #[test]
    fn test_contract_reference_is_reused() {
        let (conn, agency) = setup();
        let data = "\
Locataire,Propriétaire,Site,Contrat,Date,Montant,Mode
Mamadou Diallo,Alpha,Kaloum,CTR-9,2024-01-05,500000,cash
Mamadou Diallo,Alpha,Kaloum,CTR-9,2024-02-05,500000,cash
";
        let report =
            import_payments(&conn, agency, "jan.csv", ImportFormat::Csv, data.as_bytes(), "t")
                .unwrap();
        assert_eq!(report.counts.rows_inserted, 2);
        assert_eq!(count_rows(&conn, "contracts").unwrap(), 1);
    }

    #[test]
    fn test_bad_rows_are_counted_not_fatal() {
        let (conn, agency) = setup();
        let data = "\
Locataire,Propriétaire,Site,Date,Montant,Mode
Mamadou Diallo,Alpha,Kaloum,2024-01-05,500000,cash
,Alpha,Kaloum,2024-01-05,500000,cash
Awa Sylla,Alpha,Kaloum,pas une date,500000,cash
Awa Sylla,Alpha,Kaloum,2024-01-06,zéro,cash
";
        let report =
            import_payments(&conn, agency, "jan.csv", ImportFormat::Csv, data.as_bytes(), "t")
                .unwrap();

        assert_eq!(report.status, ImportRunStatus::DoneWithErrors);
        assert_eq!(report.counts.rows_total, 4);
        assert_eq!(report.counts.rows_inserted, 1);
        assert_eq!(report.counts.rows_failed, 3);
        assert_eq!(report.errors.len(), 3);
        assert!(report.errors[0].starts_with("line 3:"));
        // the failed rows left no tenant behind
        assert_eq!(count_rows(&conn, "tenants").unwrap(), 1);

        let run = get_import_run(&conn, agency, report.run_id).unwrap();
        assert_eq!(run.rows_failed, 3);
        assert_eq!(run.errors.len(), 3);
    }

    #[test]
    fn test_unreadable_file_marks_run_failed() {
        let (conn, agency) = setup();
        let err = import_payments(&conn, agency, "x.json", ImportFormat::Json, b"{not json", "t")
            .unwrap_err();
        assert!(matches!(err, AkigError::Json(_)));

        let run_id: i64 = conn
            .query_row("SELECT MAX(id) FROM import_runs", [], |r| r.get(0))
            .unwrap();
        let run = get_import_run(&conn, agency, run_id).unwrap();
        assert_eq!(run.status, ImportRunStatus::Failed);
    }

    #[test]
    fn test_import_file_from_disk() {
        let (conn, agency) = setup();
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(FRENCH_CSV.as_bytes()).unwrap();

        let report = import_file(&conn, agency, file.path(), "cli").unwrap();
        assert_eq!(report.format, ImportFormat::Csv);
        assert_eq!(report.counts.rows_inserted, 2);
    }
}
