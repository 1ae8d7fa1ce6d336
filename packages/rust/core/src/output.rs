//! Tabular I/O: the semicolon-separated input batch and the two output
//! tables, `discovery.csv` (per contributing source) and `extraction.csv`
//! (one row per enterprise).

use std::path::Path;

use tracing::{debug, warn};

use mneprofiler_shared::{Enterprise, FieldKind, ProfilerError, Result};

use crate::pipeline::EnterpriseOutcome;

/// Extraction columns after ID and NAME, in output order.
const EXTRACTION_FIELDS: [FieldKind; 4] = [
    FieldKind::Turnover,
    FieldKind::Employees,
    FieldKind::Assets,
    FieldKind::Website,
];

/// Read the input batch: `ID;NAME` with optional `COUNTRY` and `TICKER`
/// columns, headers case-insensitive. Rows without an ID or NAME are
/// skipped with a warning, never silently.
pub fn read_enterprises(path: &Path) -> Result<Vec<Enterprise>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|e| ProfilerError::output(format!("cannot read {}: {e}", path.display())))?;

    let headers = reader
        .headers()
        .map_err(|e| ProfilerError::output(format!("unreadable header row: {e}")))?
        .clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
    };
    let (Some(id_col), Some(name_col)) = (column("id"), column("name")) else {
        return Err(ProfilerError::output(format!(
            "{} must carry ID and NAME columns",
            path.display()
        )));
    };
    let country_col = column("country");
    let ticker_col = column("ticker");

    let mut enterprises = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record =
            record.map_err(|e| ProfilerError::output(format!("unreadable input row: {e}")))?;
        let cell = |col: Option<usize>| {
            col.and_then(|c| record.get(c))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let (Some(id), Some(name)) = (cell(Some(id_col)), cell(Some(name_col))) else {
            warn!(line = line + 2, "input row missing ID or NAME, skipped");
            continue;
        };
        enterprises.push(Enterprise {
            id,
            name,
            country_hint: cell(country_col),
            ticker_hint: cell(ticker_col),
        });
    }
    debug!(count = enterprises.len(), path = %path.display(), "input batch read");
    Ok(enterprises)
}

fn writer(path: &Path) -> Result<csv::Writer<std::fs::File>> {
    csv::WriterBuilder::new()
        .delimiter(b';')
        .from_path(path)
        .map_err(|e| ProfilerError::output(format!("cannot write {}: {e}", path.display())))
}

fn write_failed(path: &Path, e: csv::Error) -> ProfilerError {
    ProfilerError::output(format!("write to {} failed: {e}", path.display()))
}

/// Write `discovery.csv`: one row per (enterprise, contributing source),
/// arbitration losers included.
pub fn write_discovery(path: &Path, outcomes: &[EnterpriseOutcome]) -> Result<()> {
    let mut out = writer(path)?;
    out.write_record(["ID", "NAME", "SOURCE", "SRC", "CONFIDENCE"])
        .map_err(|e| write_failed(path, e))?;

    for outcome in outcomes {
        for record in &outcome.records {
            out.write_record([
                outcome.enterprise.id.as_str(),
                outcome.enterprise.name.as_str(),
                record.source.as_str(),
                record.source_ref.as_str(),
                &format!("{:.2}", record.confidence),
            ])
            .map_err(|e| write_failed(path, e))?;
        }
    }
    out.flush().map_err(|e| ProfilerError::io(path, e))?;
    Ok(())
}

/// Write `extraction.csv`: one row per input enterprise, absent fields
/// blank. Failed enterprises keep their identity columns.
pub fn write_extraction(path: &Path, outcomes: &[EnterpriseOutcome]) -> Result<()> {
    let mut out = writer(path)?;
    out.write_record([
        "ID",
        "NAME",
        "TURNOVER",
        "EMPLOYEES",
        "ASSETS",
        "WEBSITE",
        "ACTIVITY",
        "NACE",
        "SECTION",
        "COUNTRY",
    ])
    .map_err(|e| write_failed(path, e))?;

    for outcome in outcomes {
        let field = |kind: FieldKind| {
            outcome
                .profile
                .as_ref()
                .and_then(|p| p.field(kind))
                .map(|f| f.value.to_output_string())
                .unwrap_or_default()
        };
        let mut row = vec![outcome.enterprise.id.clone(), outcome.enterprise.name.clone()];
        row.extend(EXTRACTION_FIELDS.iter().map(|kind| field(*kind)));
        row.push(field(FieldKind::Activity));
        match &outcome.classification {
            Some(c) => {
                row.push(c.code.clone());
                row.push(c.section.to_string());
            }
            None => {
                row.push(String::new());
                row.push(String::new());
            }
        }
        row.push(field(FieldKind::Country));
        out.write_record(&row).map_err(|e| write_failed(path, e))?;
    }
    out.flush().map_err(|e| ProfilerError::io(path, e))?;
    Ok(())
}
