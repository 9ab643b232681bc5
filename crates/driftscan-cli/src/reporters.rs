use std::io::Write;
use std::sync::Mutex;

use console::Style;
use driftscan_domain::{
    sort_results, AttrValue, ComparisonResult, DriftStatus, Error, ErrorCode, Reporter,
    ReportSummary, Result,
};
use serde::Serialize;

/// Longest value rendering shown in the text Details column.
const VALUE_TRUNCATE_AT: usize = 100;

// ── Text ─────────────────────────────────────────────────────────────────────

pub struct TextReporter {
    writer: Mutex<Box<dyn Write + Send>>,
    color: bool,
}

impl TextReporter {
    pub fn new(writer: Box<dyn Write + Send>, color: bool) -> Self {
        Self { writer: Mutex::new(writer), color }
    }
}

impl Reporter for TextReporter {
    fn report(&self, results: &[ComparisonResult]) -> Result<()> {
        let rendered = render_text(results, self.color);
        let mut writer = self.writer.lock().expect("reporter writer poisoned");
        writer
            .write_all(rendered.as_bytes())
            .and_then(|_| writer.flush())
            .map_err(|e| Error::wrap(ErrorCode::Internal, "cannot write report", e))
    }
}

fn status_style(status: DriftStatus) -> Style {
    match status {
        DriftStatus::NoDrift => Style::new().green(),
        DriftStatus::Drifted => Style::new().yellow(),
        DriftStatus::Missing => Style::new().red(),
        DriftStatus::Unmanaged => Style::new().cyan(),
        DriftStatus::Error => Style::new().red().bold(),
    }
}

/// Render the tab-aligned table plus the summary block. Pure so tests can
/// assert on the exact output; the reporter only adds the writer.
pub fn render_text(results: &[ComparisonResult], color: bool) -> String {
    let mut sorted = results.to_vec();
    sort_results(&mut sorted);

    let rows: Vec<(DriftStatus, String, String, String)> = sorted
        .iter()
        .map(|result| {
            (
                result.status,
                result.kind.to_string(),
                result.display_identifier().to_string(),
                details_for(result),
            )
        })
        .collect();

    let status_width = rows
        .iter()
        .map(|(status, ..)| status.as_str().len())
        .chain(["STATUS".len()])
        .max()
        .unwrap_or(0);
    let kind_width = rows
        .iter()
        .map(|(_, kind, ..)| kind.len())
        .chain(["KIND".len()])
        .max()
        .unwrap_or(0);
    let identifier_width = rows
        .iter()
        .map(|(_, _, identifier, _)| identifier.len())
        .chain(["IDENTIFIER".len()])
        .max()
        .unwrap_or(0);

    let mut out = String::new();
    out.push_str(&format!(
        "{:status_width$}\t{:kind_width$}\t{:identifier_width$}\tDETAILS\n",
        "STATUS", "KIND", "IDENTIFIER"
    ));
    for (status, kind, identifier, details) in &rows {
        let padded = format!("{:status_width$}", status.as_str());
        let status_cell = if color {
            status_style(*status).apply_to(padded).to_string()
        } else {
            padded
        };
        out.push_str(&format!(
            "{status_cell}\t{kind:kind_width$}\t{identifier:identifier_width$}\t{details}\n"
        ));
    }

    let summary = ReportSummary::tally(&sorted);
    out.push_str(&format!(
        "\nSummary:\n  Total Resources Processed: {}\n  No Drift:  {}\n  Drifted:   {}\n  Missing:   {}\n  Unmanaged: {}\n  Errors:    {}\n",
        summary.total_resources_processed,
        summary.no_drift,
        summary.drifted,
        summary.missing,
        summary.unmanaged,
        summary.errors
    ));
    out
}

fn details_for(result: &ComparisonResult) -> String {
    match result.status {
        DriftStatus::NoDrift => "-".to_string(),
        DriftStatus::Missing => "declared but not found on the platform".to_string(),
        DriftStatus::Unmanaged => "present on the platform but not declared".to_string(),
        DriftStatus::Error => result
            .error_message
            .clone()
            .unwrap_or_else(|| "unknown error".to_string()),
        DriftStatus::Drifted => result
            .differences
            .iter()
            .map(|diff| {
                format!(
                    "{}=[Expected: {}, Actual: {}]",
                    diff.attribute_name,
                    format_value(diff.expected_value.as_ref()),
                    format_value(diff.actual_value.as_ref())
                )
            })
            .collect::<Vec<_>>()
            .join("; "),
    }
}

fn format_value(value: Option<&AttrValue>) -> String {
    let rendered = match value {
        None => "<none>".to_string(),
        Some(value) => value.to_string(),
    };
    truncate(&rendered, VALUE_TRUNCATE_AT)
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}

// ── JSON ─────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct JsonReport<'a> {
    summary: ReportSummary,
    results: &'a [ComparisonResult],
}

pub struct JsonReporter {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl JsonReporter {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self { writer: Mutex::new(writer) }
    }
}

impl Reporter for JsonReporter {
    fn report(&self, results: &[ComparisonResult]) -> Result<()> {
        let rendered = render_json(results)?;
        let mut writer = self.writer.lock().expect("reporter writer poisoned");
        writer
            .write_all(rendered.as_bytes())
            .and_then(|_| writer.write_all(b"\n"))
            .and_then(|_| writer.flush())
            .map_err(|e| Error::wrap(ErrorCode::Internal, "cannot write report", e))
    }
}

pub fn render_json(results: &[ComparisonResult]) -> Result<String> {
    let mut sorted = results.to_vec();
    sort_results(&mut sorted);
    let report = JsonReport {
        summary: ReportSummary::tally(&sorted),
        results: &sorted,
    };
    serde_json::to_string_pretty(&report)
        .map_err(|e| Error::wrap(ErrorCode::Internal, "cannot serialize report", e))
}
