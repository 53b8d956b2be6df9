//! Filter criteria and operator parsing

use crate::errors::QueryError;
use crate::schema::FieldType;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// Storage format of timestamp columns
pub const SQL_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One filter criterion: `(field, operator, value, invert)`
///
/// `operator` is optional; its meaning depends on the field's datatype.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    pub value: String,
    #[serde(default)]
    pub invert: bool,
}

impl Filter {
    pub fn new(field: impl Into<String>, operator: Option<&str>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            operator: operator.map(str::to_string),
            value: value.into(),
            invert: false,
        }
    }

    pub fn inverted(mut self) -> Self {
        self.invert = !self.invert;
        self
    }
}

/// Match mode for text fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringOp {
    /// No operator given: case-insensitive substring, wildcards allowed
    ///
    /// Evaluated with SQLite `LIKE`, which folds case for ASCII letters
    /// only: `WEB` finds `web-1`, `ä` does not find `Ä`.
    Substring,
    /// `like`: anchored glob pattern, same ASCII-only case folding
    Like,
    /// `eq`: exact match
    Eq,
}

/// Comparison for numeric and date fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

fn invalid_operator(field: &str, operator: &str, field_type: FieldType) -> QueryError {
    QueryError::InvalidOperator {
        field: field.to_string(),
        operator: operator.to_string(),
        field_type: field_type.to_string(),
    }
}

fn invalid_argument(field: &str, value: &str, field_type: FieldType) -> QueryError {
    QueryError::InvalidArgument {
        field: field.to_string(),
        value: value.to_string(),
        field_type: field_type.to_string(),
    }
}

pub(crate) fn parse_string_op(field: &str, operator: Option<&str>) -> Result<StringOp, QueryError> {
    match operator.map(|o| o.trim().to_ascii_lowercase()) {
        None => Ok(StringOp::Substring),
        Some(op) => match op.as_str() {
            "" => Ok(StringOp::Substring),
            "like" => Ok(StringOp::Like),
            "eq" | "=" => Ok(StringOp::Eq),
            _ => Err(invalid_operator(field, &op, FieldType::Text)),
        },
    }
}

/// Both symbolic and two-letter aliases are accepted; no operator means `eq`
pub(crate) fn parse_compare_op(
    field: &str,
    operator: Option<&str>,
    field_type: FieldType,
) -> Result<CompareOp, QueryError> {
    let op = operator.map(|o| o.trim().to_ascii_lowercase());
    match op.as_deref() {
        None | Some("") | Some("eq") | Some("=") => Ok(CompareOp::Eq),
        Some("ne") | Some("!=") => Ok(CompareOp::Ne),
        Some("lt") | Some("<") => Ok(CompareOp::Lt),
        Some("le") | Some("<=") => Ok(CompareOp::Le),
        Some("gt") | Some(">") => Ok(CompareOp::Gt),
        Some("ge") | Some(">=") => Ok(CompareOp::Ge),
        Some(other) => Err(invalid_operator(field, other, field_type)),
    }
}

/// Translate a glob pattern into a LIKE pattern
///
/// `*` becomes `%`, `?` becomes `_`; literal `%`, `_` and `\` are escaped
/// with `\` (queries use `ESCAPE '\'`).
pub fn glob_to_like(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 2);
    for c in pattern.chars() {
        match c {
            '\\' | '%' | '_' => {
                out.push('\\');
                out.push(c);
            }
            '*' => out.push('%'),
            '?' => out.push('_'),
            _ => out.push(c),
        }
    }
    out
}

pub(crate) fn parse_integer(field: &str, value: &str) -> Result<i64, QueryError> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| invalid_argument(field, value, FieldType::Integer))
}

pub(crate) fn parse_float(field: &str, value: &str) -> Result<f64, QueryError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| invalid_argument(field, value, FieldType::Float))
}

/// Half-open day range `[start, next)` covering the given date
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayRange {
    pub start: String,
    pub next: String,
}

/// Accepts `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS` or RFC 3339; only the date
/// part is used.
pub(crate) fn parse_day_range(field: &str, value: &str) -> Result<DayRange, QueryError> {
    let trimmed = value.trim();
    let date = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(trimmed, SQL_DATETIME_FORMAT)
                .ok()
                .map(|dt| dt.date())
        })
        .or_else(|| {
            DateTime::parse_from_rfc3339(trimmed)
                .ok()
                .map(|dt| dt.date_naive())
        })
        .ok_or_else(|| invalid_argument(field, value, FieldType::Date))?;
    let next = date
        .succ_opt()
        .ok_or_else(|| invalid_argument(field, value, FieldType::Date))?;

    Ok(DayRange {
        start: start_of_day(date),
        next: start_of_day(next),
    })
}

fn start_of_day(date: NaiveDate) -> String {
    NaiveDateTime::new(date, NaiveTime::default())
        .format(SQL_DATETIME_FORMAT)
        .to_string()
}
