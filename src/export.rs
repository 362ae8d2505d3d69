//! Aggregation and flat-file export of job results.
//!
//! Both are pure transformations of the per-pair results plus the current
//! review items; pending reviews never block an export.
use crate::errors::AppError;
use crate::models::{
    PairDisposition, PairResult, Recommendation, ResultsSummary, ReviewItem, ReviewState,
    Transaction,
};
use rust_xlsxwriter::{Format, Workbook};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

pub const SHEET_NAME: &str = "Reconciliation";

pub const COLUMNS: [&str; 18] = [
    "pair_index",
    "reward_customer",
    "reward_amount",
    "reward_date",
    "reward_service",
    "reward_source",
    "pos_customer",
    "pos_amount",
    "pos_date",
    "pos_service",
    "match_probability",
    "confidence_level",
    "disposition",
    "review_state",
    "decided_by",
    "decided_at",
    "review_notes",
    "failure_reason",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Excel,
}

impl ExportFormat {
    pub fn file_name(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "reconciliation.csv",
            ExportFormat::Excel => "reconciliation.xlsx",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Excel => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
        }
    }
}

impl FromStr for ExportFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "excel" | "xlsx" => Ok(ExportFormat::Excel),
            other => Err(AppError::BadRequest(format!(
                "Unsupported export format '{}', expected csv or excel",
                other
            ))),
        }
    }
}

/// A rendered export ready to hand to a client or write to disk.
#[derive(Debug, Clone)]
pub struct ExportFile {
    pub file_name: &'static str,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

fn index_reviews(reviews: &[ReviewItem]) -> HashMap<Uuid, &ReviewItem> {
    reviews.iter().map(|item| (item.id, item)).collect()
}

/// Disposition counts plus the live state of review items.
pub fn summarize(results: &[PairResult], reviews: &[ReviewItem]) -> ResultsSummary {
    let by_id = index_reviews(reviews);
    let mut summary = ResultsSummary {
        total: results.len(),
        ..ResultsSummary::default()
    };

    for result in results {
        match result.disposition.recommendation() {
            Some(Recommendation::AutoAccept) => summary.auto_accept += 1,
            Some(Recommendation::ManualReview) => summary.manual_review += 1,
            Some(Recommendation::LikelyNoMatch) => summary.likely_no_match += 1,
            None => summary.scoring_failed += 1,
        }

        let review = result.review_item_id.and_then(|id| by_id.get(&id));
        if let Some(item) = review {
            match item.state {
                ReviewState::Pending => summary.review_pending += 1,
                ReviewState::Approved => summary.review_approved += 1,
                ReviewState::Rejected => summary.review_rejected += 1,
            }
        }
    }

    summary
}

enum Cell {
    Text(String),
    Number(f64),
}

impl Cell {
    fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }

    fn opt(value: Option<impl Into<String>>) -> Self {
        Cell::Text(value.map(Into::into).unwrap_or_default())
    }

    fn render(&self) -> String {
        match self {
            Cell::Text(s) => s.clone(),
            Cell::Number(n) => n.to_string(),
        }
    }
}

fn date_cell(txn: &Transaction) -> Cell {
    Cell::opt(txn.date.map(|d| d.format("%Y-%m-%d").to_string()))
}

fn row_cells(result: &PairResult, review: Option<&ReviewItem>) -> Vec<Cell> {
    let reward = &result.pair.reward_transaction;
    let pos = &result.pair.pos_transaction;

    let (probability, confidence, failure) = match &result.disposition {
        PairDisposition::Scored {
            score,
            confidence_level,
            ..
        } => (
            Cell::Number(score.match_probability),
            Cell::text(confidence_level.as_str()),
            Cell::text(""),
        ),
        PairDisposition::ScoringFailed { reason } => {
            (Cell::text(""), Cell::text(""), Cell::text(reason.as_str()))
        }
    };

    vec![
        Cell::Number(result.pair.pair_index as f64),
        Cell::text(reward.customer_name.as_str()),
        Cell::Number(reward.amount),
        date_cell(reward),
        Cell::text(reward.service.as_str()),
        Cell::text(reward.source_system.as_str()),
        Cell::text(pos.customer_name.as_str()),
        Cell::Number(pos.amount),
        date_cell(pos),
        Cell::text(pos.service.as_str()),
        probability,
        confidence,
        Cell::text(result.disposition.label()),
        Cell::opt(review.map(|r| r.state.as_str())),
        Cell::opt(review.and_then(|r| r.decided_by.clone())),
        Cell::opt(review.and_then(|r| r.decided_at).map(|d| d.to_rfc3339())),
        Cell::opt(review.and_then(|r| r.notes.clone())),
        failure,
    ]
}

pub fn export(
    results: &[PairResult],
    reviews: &[ReviewItem],
    format: ExportFormat,
) -> Result<ExportFile, AppError> {
    let bytes = match format {
        ExportFormat::Csv => export_csv(results, reviews)?,
        ExportFormat::Excel => export_xlsx(results, reviews)?,
    };
    Ok(ExportFile {
        file_name: format.file_name(),
        content_type: format.content_type(),
        bytes,
    })
}

/// One header row, then one row per pair in input order.
pub fn export_csv(results: &[PairResult], reviews: &[ReviewItem]) -> Result<Vec<u8>, AppError> {
    let by_id = index_reviews(reviews);
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(COLUMNS)?;

    for result in results {
        let review = result.review_item_id.and_then(|id| by_id.get(&id).copied());
        let record: Vec<String> = row_cells(result, review).iter().map(Cell::render).collect();
        writer.write_record(&record)?;
    }

    writer
        .into_inner()
        .map_err(|e| AppError::InternalError(format!("Failed to finish CSV export: {}", e)))
}

/// Single `Reconciliation` sheet with a bold header row; numeric columns stay numeric.
pub fn export_xlsx(results: &[PairResult], reviews: &[ReviewItem]) -> Result<Vec<u8>, AppError> {
    let by_id = index_reviews(reviews);
    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();

    let sheet = workbook.add_worksheet();
    sheet.set_name(SHEET_NAME)?;

    for (col, name) in COLUMNS.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *name, &header_format)?;
    }

    for (i, result) in results.iter().enumerate() {
        let row = (i + 1) as u32;
        let review = result.review_item_id.and_then(|id| by_id.get(&id).copied());
        for (col, cell) in row_cells(result, review).into_iter().enumerate() {
            match cell {
                Cell::Number(n) => {
                    sheet.write_number(row, col as u16, n)?;
                }
                Cell::Text(s) if s.is_empty() => {}
                Cell::Text(s) => {
                    sheet.write_string(row, col as u16, s)?;
                }
            }
        }
    }

    Ok(workbook.save_to_buffer()?)
}
