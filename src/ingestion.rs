//! Upload parsing and normalization into the canonical `Transaction` shape.
//!
//! 1. Dispatch on file extension (CSV or spreadsheet)
//! 2. Parse into `RawRow`s with normalized header names
//! 3. Resolve canonical fields through the per-source alias table
//! 4. Clean strings, phones, emails, amounts and dates
use crate::errors::AppError;
use crate::models::{RawRow, SourceSystem, Transaction};
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use std::io::Cursor;
use std::path::Path;
use std::sync::LazyLock;

/// Sheet names preferred when a workbook has several sheets, in priority order.
const PREFERRED_SHEETS: [&str; 4] = ["transactions", "data", "export", "sheet1"];

static AMOUNT_NOISE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\$€£,\s]").expect("static amount pattern"));

static DATE_PATTERNS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"(\d{1,2})\.(\d{1,2})\.(\d{2,4})").expect("static date pattern"),
        Regex::new(r"(\d{1,2})/(\d{1,2})/(\d{2,4})").expect("static date pattern"),
        Regex::new(r"(\d{1,2})-(\d{1,2})-(\d{2,4})").expect("static date pattern"),
    ]
});

/// An uploaded export with its declared source.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub source_system: SourceSystem,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(file_name: impl Into<String>, source_system: SourceSystem, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            source_system,
            bytes,
        }
    }

    /// Reads a local export from disk.
    pub async fn from_path(path: &Path, source_system: SourceSystem) -> Result<Self, AppError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            AppError::FileFormatError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(file_name, source_system, bytes))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Csv,
    Spreadsheet,
}

/// What to do with a date cell that cannot be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFallback {
    /// Substitute the current timestamp and record a warning.
    Now,
    /// Leave the date empty so the validator rejects the row.
    Reject,
}

/// Result of ingesting one file.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub file_name: String,
    pub source_system: SourceSystem,
    pub total_rows: usize,
    pub transactions: Vec<Transaction>,
    pub warnings: Vec<String>,
}

/// Canonical field → accepted (normalized) source column names.
#[derive(Debug)]
pub struct AliasTable {
    pub customer_name: &'static [&'static str],
    pub amount: &'static [&'static str],
    pub date: &'static [&'static str],
    pub service: &'static [&'static str],
    pub phone: &'static [&'static str],
    pub email: &'static [&'static str],
    pub provider: &'static [&'static str],
    pub source_transaction_id: &'static [&'static str],
    pub certificate_id: &'static [&'static str],
    pub points_earned: &'static [&'static str],
    pub payment_method: &'static [&'static str],
    pub treatment_notes: &'static [&'static str],
}

static ALLE_ALIASES: AliasTable = AliasTable {
    customer_name: &["patient_name"],
    amount: &["reward_value", "points_earned"],
    date: &["date", "transaction_date"],
    service: &["product_name", "service"],
    phone: &["patient_phone", "phone"],
    email: &["patient_email", "email"],
    provider: &["provider", "selected_provider"],
    source_transaction_id: &["transaction_id", "id"],
    certificate_id: &["certificate_code", "offer_code"],
    points_earned: &["points_earned"],
    payment_method: &[],
    treatment_notes: &[],
};

static ASPIRE_ALIASES: AliasTable = AliasTable {
    customer_name: &["patient_name"],
    amount: &["amount", "value"],
    date: &["treatment_date", "date"],
    service: &["description", "service"],
    phone: &[],
    email: &[],
    provider: &[],
    source_transaction_id: &["certificate_code", "id"],
    certificate_id: &["certificate_code"],
    points_earned: &[],
    payment_method: &[],
    treatment_notes: &[],
};

static POS_ALIASES: AliasTable = AliasTable {
    customer_name: &["patient_name", "customer_name", "name"],
    amount: &["amount", "total", "price"],
    date: &["date", "transaction_date", "payment_date"],
    service: &["service", "description", "treatment"],
    phone: &["phone", "customer_phone"],
    email: &[],
    provider: &["provider", "practitioner"],
    source_transaction_id: &["transaction_id", "id"],
    certificate_id: &[],
    points_earned: &[],
    payment_method: &["payment_method", "payment_type"],
    treatment_notes: &["notes", "comments"],
};

pub fn alias_table(source: SourceSystem) -> &'static AliasTable {
    match source {
        SourceSystem::Alle => &ALLE_ALIASES,
        SourceSystem::Aspire => &ASPIRE_ALIASES,
        SourceSystem::Pos => &POS_ALIASES,
    }
}

/// Classify a file by extension. Unknown extensions are rejected up front.
pub fn detect_file_kind(file_name: &str) -> Result<FileKind, AppError> {
    let extension = Path::new(file_name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "csv" => Ok(FileKind::Csv),
        "xlsx" | "xls" | "xlsm" | "xlsb" | "ods" => Ok(FileKind::Spreadsheet),
        "" => Err(AppError::FileFormatError(format!(
            "{}: missing file extension, expected CSV, XLS or XLSX",
            file_name
        ))),
        other => Err(AppError::FileFormatError(format!(
            "{}: unsupported file format '.{}', expected CSV, XLS or XLSX",
            file_name, other
        ))),
    }
}

/// Parse, normalize and tag one uploaded file.
pub fn ingest_file(
    file: &UploadedFile,
    file_ordinal: usize,
    max_upload_bytes: usize,
    date_fallback: DateFallback,
) -> Result<IngestOutcome, AppError> {
    if file.bytes.is_empty() {
        return Err(AppError::FileFormatError(format!(
            "{}: file is empty",
            file.file_name
        )));
    }
    if file.bytes.len() > max_upload_bytes {
        return Err(AppError::FileFormatError(format!(
            "{}: file size ({:.1}MB) exceeds {}MB limit",
            file.file_name,
            file.bytes.len() as f64 / 1024.0 / 1024.0,
            max_upload_bytes / 1024 / 1024
        )));
    }

    let rows = parse_rows(file)?;
    let total_rows = rows.len();
    let (transactions, warnings) =
        normalize_rows(&rows, file.source_system, file_ordinal, date_fallback);

    tracing::info!(
        "Ingested {} ({}): {} rows, {} date warnings",
        file.file_name,
        file.source_system,
        total_rows,
        warnings.len()
    );

    Ok(IngestOutcome {
        file_name: file.file_name.clone(),
        source_system: file.source_system,
        total_rows,
        transactions,
        warnings,
    })
}

/// Parse an upload into raw rows according to its extension.
pub fn parse_rows(file: &UploadedFile) -> Result<Vec<RawRow>, AppError> {
    match detect_file_kind(&file.file_name)? {
        FileKind::Csv => parse_csv(&file.file_name, &file.bytes),
        FileKind::Spreadsheet => parse_spreadsheet(&file.file_name, &file.bytes),
    }
}

/// Lowercase, trim and collapse whitespace to `_` so `Patient Name` matches `patient_name`.
pub fn normalize_header(header: &str) -> String {
    header
        .trim_start_matches('\u{feff}')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

/// Read a CSV export record by record. A header row is required.
pub fn parse_csv(file_name: &str, bytes: &[u8]) -> Result<Vec<RawRow>, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| AppError::FileFormatError(format!("{}: unreadable header: {}", file_name, e)))?
        .iter()
        .map(normalize_header)
        .collect();

    if headers.iter().all(|h| h.is_empty()) {
        return Err(AppError::FileFormatError(format!(
            "{}: header row required",
            file_name
        )));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record
            .map_err(|e| AppError::FileFormatError(format!("{}: {}", file_name, e)))?;
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        let columns = headers
            .iter()
            .cloned()
            .zip(record.iter().map(str::to_string))
            .collect();
        rows.push(RawRow {
            source_file: file_name.to_string(),
            row_index: rows.len(),
            columns,
        });
    }

    Ok(rows)
}

/// Read the transaction sheet of a workbook.
pub fn parse_spreadsheet(file_name: &str, bytes: &[u8]) -> Result<Vec<RawRow>, AppError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec())).map_err(|e| {
        AppError::FileFormatError(format!("{}: failed to open workbook: {}", file_name, e))
    })?;

    let sheet_names: Vec<String> = workbook.sheet_names().to_vec();
    let sheet_name = find_transaction_sheet(&sheet_names)
        .ok_or_else(|| {
            AppError::FileFormatError(format!("{}: workbook contains no sheets", file_name))
        })?
        .to_string();

    let range = workbook.worksheet_range(&sheet_name).map_err(|e| {
        AppError::FileFormatError(format!(
            "{}: failed to read sheet '{}': {}",
            file_name, sheet_name, e
        ))
    })?;

    let mut grid = range
        .rows()
        .map(|cells| cells.iter().map(cell_to_string).collect::<Vec<String>>())
        .filter(|cells| cells.iter().any(|c| !c.trim().is_empty()));

    let headers: Vec<String> = match grid.next() {
        Some(header_row) => header_row.iter().map(|h| normalize_header(h)).collect(),
        None => {
            return Err(AppError::FileFormatError(format!(
                "{}: sheet '{}' must contain headers and at least one data row",
                file_name, sheet_name
            )))
        }
    };

    let rows = grid
        .enumerate()
        .map(|(row_index, cells)| RawRow {
            source_file: file_name.to_string(),
            row_index,
            columns: headers.iter().cloned().zip(cells).collect(),
        })
        .collect();

    Ok(rows)
}

/// First sheet whose name contains a preferred name, else the first sheet.
pub fn find_transaction_sheet(sheet_names: &[String]) -> Option<&str> {
    sheet_names
        .iter()
        .find(|name| {
            let lower = name.to_lowercase();
            PREFERRED_SHEETS.iter().any(|pref| lower.contains(pref))
        })
        .or_else(|| sheet_names.first())
        .map(String::as_str)
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(n) => {
            // Integers without decimals
            if n.fract() == 0.0 && n.abs() < 1e15 {
                format!("{}", *n as i64)
            } else {
                format!("{}", n)
            }
        }
        Data::Int(n) => n.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::Error(e) => format!("#{:?}", e),
        Data::DateTime(dt) => excel_serial_to_date(dt.as_f64())
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
    }
}

/// 1900 date system; serial 1 is 1900-01-01 with Excel's leap-year quirk absorbed
/// by anchoring at 1899-12-30.
fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 1.0 {
        return None;
    }
    NaiveDate::from_ymd_opt(1899, 12, 30)?
        .checked_add_signed(chrono::Duration::days(serial.floor() as i64))
}

/// Map raw rows to transactions. Returns the transactions and per-row warnings.
pub fn normalize_rows(
    rows: &[RawRow],
    source: SourceSystem,
    file_ordinal: usize,
    date_fallback: DateFallback,
) -> (Vec<Transaction>, Vec<String>) {
    let mut warnings = Vec::new();
    let transactions = rows
        .iter()
        .map(|row| {
            let (txn, warning) = normalize_row(row, source, file_ordinal, date_fallback);
            if let Some(w) = warning {
                warnings.push(w);
            }
            txn
        })
        .collect();
    (transactions, warnings)
}

/// Normalize a single row. The second value is a date warning, if any.
pub fn normalize_row(
    row: &RawRow,
    source: SourceSystem,
    file_ordinal: usize,
    date_fallback: DateFallback,
) -> (Transaction, Option<String>) {
    let aliases = alias_table(source);
    let raw_date = row.first_of(aliases.date);

    let (date, warning) = match (parse_date(raw_date), date_fallback) {
        (Some(date), _) => (Some(date), None),
        (None, DateFallback::Now) => {
            let message = match raw_date {
                Some(raw) => format!(
                    "Row {}: date '{}' could not be parsed; defaulted to now",
                    row.row_index + 1,
                    raw
                ),
                None => format!("Row {}: date missing; defaulted to now", row.row_index + 1),
            };
            (Some(Utc::now()), Some(message))
        }
        (None, DateFallback::Reject) => (None, None),
    };

    let optional = |names: &[&str]| row.first_of(names).map(clean_string).filter(|s| !s.is_empty());

    let txn = Transaction {
        id: format!("{}_{}_{}", source, file_ordinal, row.row_index),
        customer_name: row.first_of(aliases.customer_name).map(clean_string).unwrap_or_default(),
        amount: parse_amount(row.first_of(aliases.amount)),
        date,
        service: row.first_of(aliases.service).map(clean_string).unwrap_or_default(),
        source_system: source,
        phone: row.first_of(aliases.phone).map(clean_phone).filter(|p| !p.is_empty()),
        email: row.first_of(aliases.email).and_then(clean_email),
        provider: optional(aliases.provider),
        source_transaction_id: optional(aliases.source_transaction_id),
        certificate_id: optional(aliases.certificate_id),
        points_earned: row
            .first_of(aliases.points_earned)
            .and_then(|p| p.trim().parse::<f64>().ok())
            .map(|p| p.trunc() as i64),
        payment_method: optional(aliases.payment_method),
        treatment_notes: optional(aliases.treatment_notes),
    };

    (txn, warning)
}

/// Trim and collapse internal whitespace.
pub fn clean_string(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Digits only.
pub fn clean_phone(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Lowercased address, dropped unless it contains `@`.
pub fn clean_email(value: &str) -> Option<String> {
    let cleaned = value.trim().to_lowercase();
    cleaned.contains('@').then_some(cleaned)
}

/// Strip currency symbols, thousands separators and whitespace, then parse.
/// Anything non-numeric becomes 0 and is left for the validator to reject.
pub fn parse_amount(raw: Option<&str>) -> f64 {
    let Some(raw) = raw else {
        return 0.0;
    };
    let cleaned = AMOUNT_NOISE.replace_all(raw, "");
    match cleaned.parse::<f64>() {
        Ok(n) if n.is_finite() => n,
        _ => 0.0,
    }
}

/// Parse a date through the fallback chain. `None` when nothing matches.
pub fn parse_date(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&ndt));
        }
    }
    for format in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return date.and_hms_opt(0, 0, 0).map(|ndt| Utc.from_utc_datetime(&ndt));
        }
    }

    for pattern in DATE_PATTERNS.iter() {
        let Some(caps) = pattern.captures(raw) else {
            continue;
        };
        let first: u32 = caps[1].parse().ok()?;
        let second: u32 = caps[2].parse().ok()?;
        let year_raw = &caps[3];
        let year: i32 = if year_raw.len() == 2 {
            format!("20{}", year_raw).parse().ok()?
        } else {
            year_raw.parse().ok()?
        };

        // Month-first, then day-first when that is not a real calendar date.
        let date = NaiveDate::from_ymd_opt(year, first, second)
            .or_else(|| NaiveDate::from_ymd_opt(year, second, first));
        if let Some(ndt) = date.and_then(|d| d.and_hms_opt(0, 0, 0)) {
            return Some(Utc.from_utc_datetime(&ndt));
        }
    }

    None
}

/// Guess the source of an export from its (normalized) headers.
pub fn detect_source_type(headers: &[String]) -> Option<SourceSystem> {
    let joined = headers
        .iter()
        .map(|h| h.replace('_', " "))
        .collect::<Vec<_>>()
        .join(" ");

    if joined.contains("patient name")
        && (joined.contains("product name") || joined.contains("points earned"))
    {
        return Some(SourceSystem::Alle);
    }
    if joined.contains("certificate")
        || (joined.contains("treatment date") && joined.contains("payout"))
    {
        return Some(SourceSystem::Aspire);
    }
    if joined.contains("amount") && (joined.contains("payment") || joined.contains("transaction")) {
        return Some(SourceSystem::Pos);
    }
    None
}

/// Guess the source of an upload from its header row.
pub fn sniff_source(file_name: &str, bytes: &[u8]) -> Result<Option<SourceSystem>, AppError> {
    let probe = UploadedFile::new(file_name, SourceSystem::Pos, bytes.to_vec());
    let rows = parse_rows(&probe)?;
    let headers: Vec<String> = rows
        .first()
        .map(|row| row.columns.iter().map(|(name, _)| name.clone()).collect())
        .unwrap_or_default();
    Ok(detect_source_type(&headers))
}
