use chrono::{Datelike, NaiveDate};
use serde::Serialize;

/// Prices are stored in pence: NUMERIC(10, 2) on the wire.
pub const PRICE_MAX_DIGITS: usize = 10;
pub const PRICE_DECIMAL_PLACES: usize = 2;

pub const MSG_RANGE_MISSING: &str = "Please provide both start and end dates.";
pub const MSG_RANGE_REVERSED: &str = "End date cannot be earlier than start date.";

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn period_label(&self) -> String {
        format!(
            "Period: {} - {}",
            display_date(self.start),
            display_date(self.end)
        )
    }
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, CalcError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        CalcError::bad_params(format!("date must be YYYY-MM-DD, got {:?}", raw.trim()))
    })
}

pub fn iso_date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

/// en-GB short date, as shown in reports.
pub fn display_date(d: NaiveDate) -> String {
    d.format("%d/%m/%Y").to_string()
}

pub fn validate_range(start: Option<&str>, end: Option<&str>) -> Result<DateRange, CalcError> {
    let start = start.map(str::trim).filter(|s| !s.is_empty());
    let end = end.map(str::trim).filter(|s| !s.is_empty());
    let (Some(start), Some(end)) = (start, end) else {
        return Err(CalcError::bad_params(MSG_RANGE_MISSING));
    };
    let start = parse_date(start)?;
    let end = parse_date(end)?;
    if end < start {
        let mut e = CalcError::bad_params(MSG_RANGE_REVERSED);
        e.details = Some(serde_json::json!({
            "startDate": iso_date(start),
            "endDate": iso_date(end),
        }));
        return Err(e);
    }
    Ok(DateRange { start, end })
}

/// First day of the current month through today.
pub fn default_range(today: NaiveDate) -> DateRange {
    let start = today.with_day(1).unwrap_or(today);
    DateRange { start, end: today }
}

pub fn parse_price_str(raw: &str) -> Result<i64, CalcError> {
    let t = raw.trim();
    let t = t.strip_prefix('+').unwrap_or(t);
    if t.starts_with('-') {
        return Err(CalcError::bad_params("pricePerClass must be positive"));
    }
    let (whole, frac) = match t.split_once('.') {
        Some((w, f)) => (w, f),
        None => (t, ""),
    };
    let digits_ok = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if (whole.is_empty() && frac.is_empty()) || !digits_ok(whole) || !digits_ok(frac) {
        return Err(CalcError::bad_params(format!(
            "pricePerClass must be a decimal number, got {:?}",
            raw.trim()
        )));
    }
    let frac = frac.trim_end_matches('0');
    if frac.len() > PRICE_DECIMAL_PLACES {
        return Err(CalcError::bad_params(
            "pricePerClass allows at most 2 decimal places",
        ));
    }
    let whole = whole.trim_start_matches('0');
    if whole.len() > PRICE_MAX_DIGITS - PRICE_DECIMAL_PLACES {
        return Err(CalcError::bad_params("pricePerClass is too large"));
    }
    let whole_val: i64 = if whole.is_empty() {
        0
    } else {
        whole
            .parse()
            .map_err(|_| CalcError::bad_params("pricePerClass is too large"))?
    };
    let mut frac_val: i64 = 0;
    for (i, c) in frac.chars().enumerate() {
        let d = c.to_digit(10).unwrap_or(0) as i64;
        frac_val += if i == 0 { d * 10 } else { d };
    }
    let pence = whole_val * 100 + frac_val;
    if pence <= 0 {
        return Err(CalcError::bad_params("pricePerClass must be positive"));
    }
    Ok(pence)
}

pub fn parse_price(v: &serde_json::Value) -> Result<i64, CalcError> {
    match v {
        serde_json::Value::String(s) => parse_price_str(s),
        serde_json::Value::Number(n) => parse_price_str(&n.to_string()),
        _ => Err(CalcError::bad_params(
            "pricePerClass must be a number or decimal string",
        )),
    }
}

/// `5000` -> `"50.00"`.
pub fn format_price(pence: i64) -> String {
    let sign = if pence < 0 { "-" } else { "" };
    let p = pence.unsigned_abs();
    format!("{}{}.{:02}", sign, p / 100, p % 100)
}

/// en-GB currency: `123450` -> `"£1,234.50"`.
pub fn format_gbp(pence: i64) -> String {
    let sign = if pence < 0 { "-" } else { "" };
    let p = pence.unsigned_abs();
    let whole = (p / 100).to_string();
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, c) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    format!("{}£{}.{:02}", sign, grouped, p % 100)
}

pub fn total_fees(classes: usize, price_pence: i64) -> Result<i64, CalcError> {
    i64::try_from(classes)
        .ok()
        .and_then(|c| c.checked_mul(price_pence))
        .ok_or_else(|| CalcError::new("report_failed", "total fees overflow"))
}
