//! Debug log viewer over the in-memory [`LogBuffer`](courier_common::LogBuffer).

use std::{collections::BTreeMap, fmt::Write as _};

use axum::{
    Json,
    extract::{Path, State},
    response::Html,
};
use courier_common::LogEntry;

use crate::AppState;

const STYLE: &str = r"
      body { font-family: 'Montserrat', 'Tahoma', sans-serif; }
      h1 { text-align: center; } table { width: 100%; }
      th { background-color: #000; color: #FFF; cursor: pointer; height: 3em; }
      tr:nth-child(even) { background-color: #48A; color: #FFF }
      .button { display: inline-block; background-color: #2c7be5; color: white; padding: 10px 20px; text-decoration: none; border-radius: 5px; margin: 0 2px; }
      .current { background-color: white; color: #2c7be5; }
      .levels { width: 100%; text-align: center; }
";

const SCRIPT: &str = r#"
    <script>
      function sortTable(column) {
        const table = document.getElementById("logsTable");
        const rows = Array.from(table.rows).slice(1);
        const heading = table.rows[0].cells[column];
        const ascending = heading.classList.contains("asc");

        rows.sort((a, b) => {
          const x = a.cells[column].innerText;
          const y = b.cells[column].innerText;
          if (isNaN(x) || isNaN(y)) return ascending ? x.localeCompare(y) : y.localeCompare(x);
          return ascending ? parseFloat(x) - parseFloat(y) : parseFloat(y) - parseFloat(x);
        });
        rows.forEach(row => table.appendChild(row));
        heading.classList.toggle("asc");
      }

      function filterTable() {
        const filter = document.getElementById("tableFilter").value.toLowerCase();
        const rows = document.getElementById("logsTable").getElementsByTagName("tr");
        for (let i = 1; i < rows.length; i++) {
          const text = rows[i].innerText.toLowerCase();
          rows[i].style.display = text.includes(filter) ? "" : "none";
        }
      }
    </script>
"#;

const HEADINGS: [&str; 6] = ["S/N", "Timestamp", "Level", "Service", "Mail ID", "Message"];

/// `GET /logs`: every buffered entry, grouped by level.
pub async fn grouped(State(state): State<AppState>) -> Json<BTreeMap<String, Vec<LogEntry>>> {
    Json(state.logs.grouped())
}

/// `GET /logs/print`: formatted lines, newest first.
pub async fn print_all(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(lines(state.logs.snapshot(), None))
}

/// `GET /logs/print/{level}`
pub async fn print_level(
    State(state): State<AppState>,
    Path(level): Path<String>,
) -> Json<Vec<String>> {
    Json(lines(state.logs.snapshot(), Some(&level)))
}

/// `GET /logs/printhtml`
pub async fn html_all(State(state): State<AppState>) -> Html<String> {
    Html(render_page(&state.logs.snapshot(), None))
}

/// `GET /logs/printhtml/{level}`
pub async fn html_level(
    State(state): State<AppState>,
    Path(level): Path<String>,
) -> Html<String> {
    Html(render_page(&state.logs.snapshot(), Some(&level)))
}

fn matches_level(entry: &LogEntry, level: Option<&str>) -> bool {
    level.is_none_or(|level| entry.level.eq_ignore_ascii_case(level))
}

fn lines(entries: Vec<LogEntry>, level: Option<&str>) -> Vec<String> {
    entries
        .into_iter()
        .rev()
        .filter(|entry| matches_level(entry, level))
        .map(|entry| entry.line())
        .collect()
}

/// Render the log viewer page, newest entries first.
///
/// `entries` is expected oldest first, as returned by the buffer.
#[must_use]
pub fn render_page(entries: &[LogEntry], level: Option<&str>) -> String {
    let title = level.map_or_else(
        || "Session Logs | Courier".to_string(),
        |level| format!("Session Logs - {} | Courier", escape(&level.to_uppercase())),
    );

    let mut levels: Vec<&str> = entries.iter().map(|entry| entry.level.as_str()).collect();
    levels.sort_unstable();
    levels.dedup();

    let mut page = String::with_capacity(4096);
    let _ = write!(
        page,
        "<!DOCTYPE html>\n<html>\n<head>\n    <style>{STYLE}    </style>\n    <title>{title}</title>\n</head>\n<body><h1>{title}</h1>\n"
    );

    page.push_str("<h3 class=\"levels\">");
    push_button(&mut page, "/logs/printhtml", "ALL", level.is_none());
    for name in &levels {
        let current = level.is_some_and(|level| level.eq_ignore_ascii_case(name));
        push_button(&mut page, &format!("/logs/printhtml/{name}"), name, current);
    }
    page.push_str("</h3>\n");

    page.push_str(
        "<h3>Filter: <input type=\"text\" id=\"tableFilter\" placeholder=\"Type text to filter...\" oninput=\"filterTable()\"></h3>\n",
    );

    page.push_str("<table id=\"logsTable\">");
    let mut rows = entries
        .iter()
        .rev()
        .filter(|entry| matches_level(entry, level))
        .peekable();

    if rows.peek().is_some() {
        page.push_str("<tr>");
        for (index, heading) in HEADINGS.iter().enumerate() {
            let _ = write!(page, "<th onclick=\"sortTable({index})\">{heading}</th>");
        }
        page.push_str("</tr>");

        for entry in rows {
            push_row(&mut page, entry);
        }
    }
    page.push_str("</table>\n");

    page.push_str(SCRIPT);
    page.push_str("</body></html>");
    page
}

fn push_button(page: &mut String, href: &str, label: &str, current: bool) {
    let class = if current { "current button" } else { "button" };
    let _ = write!(
        page,
        "<a class=\"{class}\" href=\"{}\">{}</a>",
        escape(href),
        escape(label)
    );
}

fn push_row(page: &mut String, entry: &LogEntry) {
    let mut message = entry.message.clone();
    for (key, value) in &entry.fields {
        let _ = write!(message, " {key}={value}");
    }

    let _ = write!(
        page,
        "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
        entry.seq,
        entry.timestamp.to_rfc3339(),
        escape(&entry.level),
        escape(&entry.service),
        escape(entry.mail_id.as_deref().unwrap_or("")),
        escape(&message).replace('\n', "<br>"),
    );
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
