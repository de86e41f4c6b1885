//! Student table view: sort state, ordering and row rendering.

use serde::Serialize;
use std::cmp::Ordering;

use crate::calc::format_gbp;

pub const TABLE_COLUMNS: usize = 5;
pub const INDICATOR_ASC: &str = "▲";
pub const INDICATOR_DESC: &str = "▼";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Name,
    Age,
    Level,
    PricePerClass,
}

impl SortKey {
    pub const ALL: [SortKey; 4] = [
        SortKey::Name,
        SortKey::Age,
        SortKey::Level,
        SortKey::PricePerClass,
    ];

    pub fn parse(raw: &str) -> Option<SortKey> {
        match raw.trim() {
            "name" => Some(SortKey::Name),
            "age" => Some(SortKey::Age),
            "level" => Some(SortKey::Level),
            "price_per_class" | "pricePerClass" => Some(SortKey::PricePerClass),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SortKey::Name => "name",
            SortKey::Age => "age",
            SortKey::Level => "level",
            SortKey::PricePerClass => "price_per_class",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDir {
    Asc,
    Desc,
}

impl SortDir {
    pub fn parse(raw: &str) -> Option<SortDir> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "asc" => Some(SortDir::Asc),
            "desc" => Some(SortDir::Desc),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SortDir::Asc => "asc",
            SortDir::Desc => "desc",
        }
    }

    fn flipped(self) -> SortDir {
        match self {
            SortDir::Asc => SortDir::Desc,
            SortDir::Desc => SortDir::Asc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SortState {
    pub key: SortKey,
    pub dir: SortDir,
}

impl Default for SortState {
    fn default() -> Self {
        SortState {
            key: SortKey::Name,
            dir: SortDir::Asc,
        }
    }
}

impl SortState {
    /// Header click: same column flips direction, another column starts ascending.
    pub fn toggle(&mut self, key: SortKey) {
        if self.key == key {
            self.dir = self.dir.flipped();
        } else {
            self.key = key;
            self.dir = SortDir::Asc;
        }
    }

    pub fn indicator_for(&self, key: SortKey) -> &'static str {
        if self.key != key {
            return "";
        }
        match self.dir {
            SortDir::Asc => INDICATOR_ASC,
            SortDir::Desc => INDICATOR_DESC,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub id: i64,
    pub name: String,
    pub age: Option<i64>,
    pub level: String,
    pub price_pence: i64,
}

fn compare_by(a: &StudentRow, b: &StudentRow, key: SortKey) -> Ordering {
    match key {
        SortKey::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        SortKey::Level => a.level.to_lowercase().cmp(&b.level.to_lowercase()),
        // None < Some, so unknown ages come first ascending.
        SortKey::Age => a.age.cmp(&b.age),
        SortKey::PricePerClass => a.price_pence.cmp(&b.price_pence),
    }
}

/// Stable sort; ties keep their incoming order in both directions.
pub fn sort_rows(rows: &mut [StudentRow], sort: SortState) {
    rows.sort_by(|a, b| {
        let o = compare_by(a, b, sort.key);
        match sort.dir {
            SortDir::Asc => o,
            SortDir::Desc => o.reverse(),
        }
    });
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn render_row(s: &StudentRow) -> String {
    let name = escape_html(&s.name);
    let age = s.age.map(|a| a.to_string()).unwrap_or_default();
    format!(
        concat!(
            "<tr>",
            "<td>{name}</td>",
            "<td>{age}</td>",
            "<td>{level}</td>",
            "<td>{price}</td>",
            "<td class=\"actions\">",
            "<a class=\"btn btn-sm btn-info\" href=\"/students/{id}\">View</a>",
            "<a class=\"btn btn-sm btn-warning\" href=\"/students/{id}/edit\">Edit</a>",
            "<button class=\"btn btn-sm btn-outline-primary download-report-btn\" data-id=\"{id}\" data-name=\"{name}\">Download Report</button>",
            "<button class=\"btn btn-sm btn-danger delete-btn\" data-id=\"{id}\">Delete</button>",
            "</td>",
            "</tr>"
        ),
        name = name,
        age = age,
        level = escape_html(&s.level),
        price = escape_html(&format_gbp(s.price_pence)),
        id = s.id,
    )
}

pub fn render_empty() -> String {
    format!(
        "<tr><td colspan=\"{}\" class=\"text-center\">No students found. <a href=\"/students/create\">Add a student</a></td></tr>",
        TABLE_COLUMNS
    )
}

pub fn render_load_error(unauthorized: bool) -> String {
    if unauthorized {
        format!(
            "<tr><td colspan=\"{}\">Please <a href=\"/auth/login\">login</a> to view students.</td></tr>",
            TABLE_COLUMNS
        )
    } else {
        format!(
            "<tr><td colspan=\"{}\">Could not load students.</td></tr>",
            TABLE_COLUMNS
        )
    }
}

/// In-memory roster: the fetched rows plus the active sort.
#[derive(Debug, Clone, Default)]
pub struct RosterView {
    rows: Vec<StudentRow>,
    pub sort: SortState,
}

impl RosterView {
    pub fn new(rows: Vec<StudentRow>, sort: SortState) -> Self {
        RosterView { rows, sort }
    }

    pub fn click_header(&mut self, key: SortKey) {
        self.sort.toggle(key);
    }

    /// Drops a row after a successful delete; true if it was present.
    pub fn remove(&mut self, id: i64) -> bool {
        let before = self.rows.len();
        self.rows.retain(|r| r.id != id);
        self.rows.len() != before
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn sorted(&self) -> Vec<StudentRow> {
        let mut rows = self.rows.clone();
        sort_rows(&mut rows, self.sort);
        rows
    }

    pub fn render(&self) -> String {
        if self.is_empty() {
            return render_empty();
        }
        self.sorted().iter().map(render_row).collect()
    }

    pub fn indicators(&self) -> serde_json::Map<String, serde_json::Value> {
        SortKey::ALL
            .iter()
            .map(|k| {
                (
                    k.as_str().to_string(),
                    serde_json::Value::String(self.sort.indicator_for(*k).to_string()),
                )
            })
            .collect()
    }
}
