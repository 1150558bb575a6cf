// Sheet Exporter
// Formats a detection result as TSV / CSV for spreadsheet paste, or JSON

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::models::{Category, DetectionResult, Occurrence};

const CONTEXT_RADIUS: usize = 60;
const CONTEXT_MAX_CHARS: usize = 100;
const WIKI_BASE_URL: &str = "https://en.wikipedia.org/wiki/";
const HEADER: [&str; 5] = ["Category", "Code", "Count", "First Context", "URL"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Tsv,
    Csv,
    Json,
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tsv" => Ok(ExportFormat::Tsv),
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(format!("Unsupported format: {}. Use 'tsv', 'csv', or 'json'", other)),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExportFormat::Tsv => "tsv",
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        })
    }
}

/// One spreadsheet row: all occurrences of a code
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRow {
    pub category: Category,
    pub code: String,
    pub count: usize,
    pub first_context: String,
    pub url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonExport<'a> {
    #[serde(flatten)]
    result: &'a DetectionResult,
    summary: &'a [SummaryRow],
}

pub fn shortcut_url(code: &str) -> String {
    format!("{}{}", WIKI_BASE_URL, code.replace(' ', "_"))
}

/// Rows grouped by category (policy, guideline, essay), codes in first-mention order
pub fn summarize(result: &DetectionResult, text: &str) -> Vec<SummaryRow> {
    let mut by_code: BTreeMap<(Category, usize), (String, Vec<&Occurrence>)> = BTreeMap::new();
    let mut first_seen: BTreeMap<&str, (Category, usize)> = BTreeMap::new();

    for occ in &result.occurrences {
        let key = *first_seen
            .entry(occ.code.as_str())
            .or_insert((occ.category, occ.start_offset));
        by_code
            .entry(key)
            .or_insert_with(|| (occ.code.clone(), Vec::new()))
            .1
            .push(occ);
    }

    by_code
        .into_iter()
        .map(|((category, _), (code, occs))| SummaryRow {
            category,
            url: shortcut_url(&code),
            count: occs.len(),
            first_context: occs
                .first()
                .map(|o| flatten_context(o.context(text, CONTEXT_RADIUS)))
                .unwrap_or_default(),
            code,
        })
        .collect()
}

fn flatten_context(raw: &str) -> String {
    let flat = raw.replace(['\t', '\n', '\r'], " ");
    flat.trim().chars().take(CONTEXT_MAX_CHARS).collect()
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Format a result for spreadsheets or programmatic use
pub fn format_for_sheets(result: &DetectionResult, text: &str, format: ExportFormat) -> Result<String, String> {
    let rows = summarize(result, text);

    match format {
        ExportFormat::Tsv => {
            let mut lines = vec![HEADER.join("\t")];
            for row in &rows {
                lines.push(
                    [
                        row.category.label(),
                        row.code.as_str(),
                        &row.count.to_string(),
                        row.first_context.as_str(),
                        row.url.as_str(),
                    ]
                    .join("\t"),
                );
            }
            Ok(lines.join("\n"))
        }
        ExportFormat::Csv => {
            let mut out = HEADER.join(",");
            out.push('\n');
            for row in &rows {
                let fields = [
                    csv_field(row.category.label()),
                    csv_field(&row.code),
                    row.count.to_string(),
                    csv_field(&row.first_context),
                    csv_field(&row.url),
                ];
                out.push_str(&fields.join(","));
                out.push('\n');
            }
            Ok(out)
        }
        ExportFormat::Json => serde_json::to_string_pretty(&JsonExport {
            result,
            summary: &rows,
        })
        .map_err(|e| format!("Failed to serialize export: {}", e)),
    }
}

/// One analyzed discussion of a batch, labelled by where it came from
#[derive(Debug, Clone, Copy)]
pub struct LabeledResult<'a> {
    pub source: &'a str,
    pub text: &'a str,
    pub result: &'a DetectionResult,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonBatchEntry<'a> {
    source: &'a str,
    #[serde(flatten)]
    result: &'a DetectionResult,
    summary: Vec<SummaryRow>,
}

/// Format several discussions: a `# <source>` block each for TSV / CSV, an array for JSON
pub fn format_batch_for_sheets(items: &[LabeledResult<'_>], format: ExportFormat) -> Result<String, String> {
    if format == ExportFormat::Json {
        let entries: Vec<JsonBatchEntry> = items
            .iter()
            .map(|item| JsonBatchEntry {
                source: item.source,
                result: item.result,
                summary: summarize(item.result, item.text),
            })
            .collect();
        return serde_json::to_string_pretty(&entries).map_err(|e| format!("Failed to serialize export: {}", e));
    }

    let mut blocks = Vec::with_capacity(items.len());
    for item in items {
        let body = format_for_sheets(item.result, item.text, format)?;
        blocks.push(format!("# {}\n{}", item.source, body.trim_end()));
    }
    Ok(blocks.join("\n\n"))
}
