//! Per-student attendance/fee report and its PDF rendering.

use anyhow::Context;
use chrono::NaiveDate;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream, StringFormat};
use serde_json::json;

use crate::calc::{self, CalcError, DateRange};

const MM: f32 = 72.0 / 25.4;
// A4 portrait.
const PAGE_W_MM: f32 = 210.0;
const PAGE_H_MM: f32 = 297.0;

const TITLE: &str = "Individual Student Report";
const TABLE_LEFT_MM: f32 = 14.0;
const TABLE_RIGHT_MM: f32 = 196.0;
const TABLE_START_MM: f32 = 70.0;
const TABLE_TOP_NEXT_PAGE_MM: f32 = 15.0;
const TABLE_BOTTOM_MM: f32 = 282.0;
const HEAD_H_MM: f32 = 8.0;
const ROW_H_MM: f32 = 7.0;
const CELL_PAD_MM: f32 = 2.0;
const HEAD_FILL: [f32; 3] = [41.0 / 255.0, 128.0 / 255.0, 185.0 / 255.0];

const FONT_REGULAR: &str = "F1";
const FONT_BOLD: &str = "F2";

#[derive(Debug, Clone)]
pub struct AttendanceReport {
    pub student_id: i64,
    pub student_name: String,
    pub range: DateRange,
    pub price_pence: i64,
    /// Newest first, as listed by the attendance query.
    pub dates: Vec<NaiveDate>,
}

impl AttendanceReport {
    pub fn display_name(&self) -> String {
        let t = self.student_name.trim();
        if t.is_empty() {
            format!("student_{}", self.student_id)
        } else {
            t.to_string()
        }
    }

    pub fn classes_attended(&self) -> usize {
        self.dates.len()
    }

    pub fn total_fees(&self) -> Result<i64, CalcError> {
        calc::total_fees(self.classes_attended(), self.price_pence)
    }

    pub fn to_json(&self) -> Result<serde_json::Value, CalcError> {
        let total = self.total_fees()?;
        Ok(json!({
            "studentId": self.student_id,
            "studentName": self.display_name(),
            "startDate": calc::iso_date(self.range.start),
            "endDate": calc::iso_date(self.range.end),
            "period": self.range.period_label(),
            "classesAttended": self.classes_attended(),
            "pricePerClass": calc::format_price(self.price_pence),
            "totalFees": calc::format_price(total),
            "pricePerClassDisplay": calc::format_gbp(self.price_pence),
            "totalFeesDisplay": calc::format_gbp(total),
            "dates": self.dates.iter().map(|d| calc::iso_date(*d)).collect::<Vec<_>>(),
        }))
    }

    /// `attendance-report-<name>-<today>.pdf`, safe to use as a single path component.
    pub fn file_name(&self, today: NaiveDate) -> String {
        let mut slug = String::new();
        let mut in_space = false;
        for c in self.display_name().chars() {
            if c.is_whitespace() {
                if !in_space {
                    slug.push('_');
                }
                in_space = true;
                continue;
            }
            in_space = false;
            slug.push(if c == '/' || c == '\\' { '_' } else { c });
        }
        format!("attendance-report-{}-{}.pdf", slug, calc::iso_date(today))
    }

    pub fn render_pdf(&self) -> anyhow::Result<Vec<u8>> {
        let total = self
            .total_fees()
            .map_err(|e| anyhow::anyhow!(e.message))?;
        let mut pages: Vec<PageCanvas> = Vec::new();

        let mut first = PageCanvas::default();
        first.text_centered(TITLE, FONT_REGULAR, 18.0, 20.0);
        first.text_centered(&self.display_name(), FONT_REGULAR, 12.0, 28.0);
        first.text_centered(&self.range.period_label(), FONT_REGULAR, 10.0, 35.0);
        first.text(
            &format!("Classes Attended: {}", self.classes_attended()),
            FONT_REGULAR,
            11.0,
            20.0,
            45.0,
        );
        first.text(
            &format!("Price per Class: {}", calc::format_gbp(self.price_pence)),
            FONT_REGULAR,
            11.0,
            20.0,
            52.0,
        );
        first.text(
            &format!("Total Fees: {}", calc::format_gbp(total)),
            FONT_BOLD,
            11.0,
            20.0,
            59.0,
        );

        let mut page = first;
        let mut y = page.table_head(TABLE_START_MM);
        for d in &self.dates {
            if y + ROW_H_MM > TABLE_BOTTOM_MM {
                pages.push(std::mem::take(&mut page));
                y = page.table_head(TABLE_TOP_NEXT_PAGE_MM);
            }
            page.table_row(&calc::display_date(*d), y);
            y += ROW_H_MM;
        }
        pages.push(page);

        build_document(pages, &self.display_name())
    }
}

#[derive(Default)]
struct PageCanvas {
    ops: Vec<Operation>,
}

fn num(v: f32) -> Object {
    v.into()
}

fn x_pt(mm: f32) -> Object {
    num(mm * MM)
}

// jsPDF-style top-down millimetres to PDF user space.
fn y_pt(mm_from_top: f32) -> Object {
    num((PAGE_H_MM - mm_from_top) * MM)
}

impl PageCanvas {
    fn text(&mut self, s: &str, font: &str, size: f32, x_mm: f32, y_mm: f32) {
        self.ops.push(Operation::new("BT", vec![]));
        self.ops
            .push(Operation::new("Tf", vec![font.into(), num(size)]));
        self.ops
            .push(Operation::new("Td", vec![x_pt(x_mm), y_pt(y_mm)]));
        self.ops.push(Operation::new(
            "Tj",
            vec![Object::String(win_ansi(s), StringFormat::Literal)],
        ));
        self.ops.push(Operation::new("ET", vec![]));
    }

    fn text_centered(&mut self, s: &str, font: &str, size: f32, y_mm: f32) {
        let width_mm = text_width_pt(s, size) / MM;
        self.text(s, font, size, (PAGE_W_MM - width_mm) / 2.0, y_mm);
    }

    fn fill_rgb(&mut self, rgb: [f32; 3]) {
        self.ops.push(Operation::new(
            "rg",
            rgb.iter().map(|c| num(*c)).collect(),
        ));
    }

    fn rect(&mut self, top_mm: f32, height_mm: f32, op: &str) {
        self.ops.push(Operation::new(
            "re",
            vec![
                x_pt(TABLE_LEFT_MM),
                y_pt(top_mm + height_mm),
                num((TABLE_RIGHT_MM - TABLE_LEFT_MM) * MM),
                num(height_mm * MM),
            ],
        ));
        self.ops.push(Operation::new(op, vec![]));
    }

    /// Draws the header band at `top_mm`; returns the y where rows start.
    fn table_head(&mut self, top_mm: f32) -> f32 {
        self.fill_rgb(HEAD_FILL);
        self.rect(top_mm, HEAD_H_MM, "f");
        self.fill_rgb([1.0, 1.0, 1.0]);
        self.text(
            "Date",
            FONT_BOLD,
            10.0,
            TABLE_LEFT_MM + CELL_PAD_MM,
            top_mm + HEAD_H_MM - 2.5,
        );
        self.fill_rgb([0.0, 0.0, 0.0]);
        top_mm + HEAD_H_MM
    }

    fn table_row(&mut self, label: &str, top_mm: f32) {
        self.ops.push(Operation::new("w", vec![num(0.1 * MM)]));
        self.ops.push(Operation::new(
            "RG",
            vec![num(0.78), num(0.78), num(0.78)],
        ));
        self.rect(top_mm, ROW_H_MM, "S");
        self.text(
            label,
            FONT_REGULAR,
            10.0,
            TABLE_LEFT_MM + CELL_PAD_MM,
            top_mm + ROW_H_MM - 2.2,
        );
    }
}

fn build_document(pages: Vec<PageCanvas>, title: &str) -> anyhow::Result<Vec<u8>> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let regular_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let bold_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            FONT_REGULAR => regular_id,
            FONT_BOLD => bold_id,
        },
    });

    let mut kids: Vec<ObjectId> = Vec::with_capacity(pages.len());
    for page in pages {
        let content = Content {
            operations: page.ops,
        };
        let bytes = content.encode().context("failed to encode page content")?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, bytes));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id);
    }

    let pages_dict = dictionary! {
        "Type" => "Pages",
        "Kids" => kids.iter().map(|id| Object::Reference(*id)).collect::<Vec<_>>(),
        "Count" => kids.len() as i64,
        "Resources" => resources_id,
        "MediaBox" => vec![
            Object::Integer(0),
            Object::Integer(0),
            num(PAGE_W_MM * MM),
            num(PAGE_H_MM * MM),
        ],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages_dict));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = doc.add_object(dictionary! {
        "Title" => Object::String(win_ansi(title), StringFormat::Literal),
        "Producer" => Object::string_literal(concat!("attendanced ", env!("CARGO_PKG_VERSION"))),
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);
    doc.compress();

    let mut out = Vec::new();
    doc.save_to(&mut out).context("failed to serialize pdf")?;
    Ok(out)
}

/// Encodes text for the standard fonts' WinAnsiEncoding; unmapped chars become '?'.
fn win_ansi(s: &str) -> Vec<u8> {
    s.chars()
        .map(|c| match c {
            ' '..='~' => c as u8,
            '€' => 0x80,
            '‘' => 0x91,
            '’' => 0x92,
            '“' => 0x93,
            '”' => 0x94,
            '–' => 0x96,
            '—' => 0x97,
            '\u{a0}'..='\u{ff}' => c as u32 as u8,
            _ => b'?',
        })
        .collect()
}

// Helvetica advance widths (1/1000 em) for ' '..='~'.
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '..'/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // 0..9
    278, 278, 584, 584, 584, 556, 1015, // ':'..'@'
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, // A..M
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, // N..Z
    278, 278, 278, 469, 556, 333, // '['..'`'
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, // a..m
    556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, // n..z
    334, 260, 334, 584, // '{'..'~'
];

fn text_width_pt(s: &str, size: f32) -> f32 {
    let units: u32 = win_ansi(s)
        .iter()
        .map(|b| match *b {
            0x20..=0x7e => HELVETICA_WIDTHS[(*b - 0x20) as usize] as u32,
            _ => 556,
        })
        .sum();
    units as f32 * size / 1000.0
}
