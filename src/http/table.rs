use std::fmt::Write;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::operation::OperationRecord;

const HEADERS: &[&str] = &[
    "opid",
    "user",
    "op",
    "ns",
    "running (s)",
    "delta (ms)",
    "observed",
    "completed",
    "command",
];

const STYLE: &str = "body{font-family:sans-serif;margin:1.5em}\
table{border-collapse:collapse;width:100%}\
th,td{border:1px solid #ccc;padding:4px 8px;text-align:left;vertical-align:top}\
th{background:#f2f2f2}\
td.command{font-family:monospace;white-space:pre-wrap;word-break:break-all}";

/// Render records as a standalone HTML page with one table row per record.
pub fn render_table(title: &str, records: &[OperationRecord]) -> String {
    let title = escape(title);
    let mut html = String::with_capacity(1024 + records.len() * 256);

    let _ = write!(
        html,
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{title}</title>\
         <style>{STYLE}</style></head><body><h1>{title}</h1><p>{} operations</p><table><thead><tr>",
        records.len()
    );
    for header in HEADERS {
        let _ = write!(html, "<th>{header}</th>");
    }
    html.push_str("</tr></thead><tbody>");

    for record in records {
        let _ = write!(
            html,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{:.3}</td><td>{:.1}</td>\
             <td>{}</td><td>{}</td><td class=\"command\">{}</td></tr>",
            record.opid,
            escape(&record.effective_user),
            escape(&record.operation),
            escape(&record.namespace),
            record.running_micros as f64 / 1_000_000.0,
            record.delta_micros as f64 / 1_000.0,
            timestamp(Some(record.observed_at)),
            timestamp(record.completed_at),
            escape(&record.command),
        );
    }

    html.push_str("</tbody></table></body></html>");
    html
}

fn timestamp(value: Option<DateTime<Utc>>) -> String {
    value
        .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
