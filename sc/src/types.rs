//! Query, request and result types
//!
//! These mirror the JSON the dashboard host exchanges with data sources so
//! they can be passed to the backend as-is.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::template::ScopedVars;

/// How the backend should shape the result of a query
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Format {
    TimeSeries,
    #[default]
    Table,
    Logs,
}

impl Format {
    /// Pick a format from the SQL text
    ///
    /// A query selecting a column `as time` is plotted as a time series,
    /// anything else is rendered as a table.
    pub fn detect(sql: &str) -> Self {
        debug!(sql_len = sql.len(), "Format::detect: called");
        if sql.to_lowercase().contains("as time") {
            Format::TimeSeries
        } else {
            Format::Table
        }
    }
}

impl From<Format> for u8 {
    fn from(format: Format) -> Self {
        match format {
            Format::TimeSeries => 0,
            Format::Table => 1,
            Format::Logs => 2,
        }
    }
}

impl TryFrom<u8> for Format {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Format::TimeSeries),
            1 => Ok(Format::Table),
            2 => Ok(Format::Logs),
            other => Err(format!("Unknown query format: {}", other)),
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TimeSeries => write!(f, "time_series"),
            Self::Table => write!(f, "table"),
            Self::Logs => write!(f, "logs"),
        }
    }
}

/// A single SQL query target
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlQuery {
    /// Identifies this target within a request and its result frames
    #[serde(default)]
    pub ref_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_sql: Option<String>,

    #[serde(default)]
    pub format: Format,
}

impl SqlQuery {
    pub fn new(ref_id: impl Into<String>, sql: impl Into<String>) -> Self {
        let sql = sql.into();
        Self {
            ref_id: ref_id.into(),
            format: Format::detect(&sql),
            raw_sql: Some(sql),
        }
    }

    /// True when there is SQL worth sending
    ///
    /// Empty SQL makes some drivers panic, so blank targets never leave the
    /// data source.
    pub fn has_sql(&self) -> bool {
        self.raw_sql.as_deref().is_some_and(|sql| !sql.trim().is_empty())
    }
}

/// Absolute time range of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    /// The range ending now and spanning `span` into the past
    pub fn last(span: Duration) -> Self {
        let to = Utc::now();
        Self { from: to - span, to }
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::last(Duration::hours(6))
    }
}

/// Everything the data source receives for one query execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    #[serde(default)]
    pub request_id: String,

    /// Tag naming the caller that issued this request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,

    #[serde(default)]
    pub targets: Vec<SqlQuery>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<TimeRange>,

    /// Variables scoped to this request only
    #[serde(default, skip_serializing_if = "ScopedVars::is_empty")]
    pub scoped_vars: ScopedVars,
}

impl QueryRequest {
    pub fn new(targets: Vec<SqlQuery>) -> Self {
        Self {
            request_id: uuid::Uuid::now_v7().to_string(),
            app: None,
            targets,
            range: None,
            scoped_vars: ScopedVars::new(),
        }
    }

    pub fn with_range(mut self, range: TimeRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_scoped_vars(mut self, scoped_vars: ScopedVars) -> Self {
        self.scoped_vars = scoped_vars;
        self
    }

    pub fn with_app(mut self, app: impl Into<String>) -> Self {
        self.app = Some(app.into());
        self
    }
}

/// A named column of values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub values: Vec<serde_json::Value>,
}

impl Field {
    pub fn new(name: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// Column-oriented result of one query target
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub fields: Vec<Field>,
}

impl DataFrame {
    pub fn new(ref_id: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            ref_id: Some(ref_id.into()),
            name: None,
            fields,
        }
    }

    /// Number of rows, taken from the longest field
    pub fn len(&self) -> usize {
        self.fields.iter().map(|f| f.values.len()).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of a query execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub data: Vec<DataFrame>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResponse {
    /// `{ data: [] }`
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_frames(data: Vec<DataFrame>) -> Self {
        Self { data, error: None }
    }

    pub fn first_frame(&self) -> Option<&DataFrame> {
        self.data.first()
    }
}

/// One option of a dashboard template variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricFindValue {
    pub text: String,
    pub value: serde_json::Value,
}

impl MetricFindValue {
    pub fn new(text: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            text: text.into(),
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_detect() {
        assert_eq!(Format::detect("SELECT ts AS time, v FROM m"), Format::TimeSeries);
        assert_eq!(Format::detect("select ts as time from m"), Format::TimeSeries);
        assert_eq!(Format::detect("SELECT name FROM hosts"), Format::Table);
    }

    #[test]
    fn test_format_serializes_as_number() {
        assert_eq!(serde_json::to_value(Format::TimeSeries).unwrap(), json!(0));
        assert_eq!(serde_json::to_value(Format::Logs).unwrap(), json!(2));

        let format: Format = serde_json::from_value(json!(1)).unwrap();
        assert_eq!(format, Format::Table);
        assert!(serde_json::from_value::<Format>(json!(7)).is_err());
    }

    #[test]
    fn test_sql_query_wire_names() {
        let query = SqlQuery::new("A", "SELECT 1");
        let value = serde_json::to_value(&query).unwrap();
        assert_eq!(value["refId"], "A");
        assert_eq!(value["rawSql"], "SELECT 1");
        assert_eq!(value["format"], 1);
    }

    #[test]
    fn test_has_sql() {
        assert!(SqlQuery::new("A", "SELECT 1").has_sql());
        assert!(!SqlQuery::new("A", "   \n").has_sql());
        assert!(!SqlQuery::default().has_sql());
    }

    #[test]
    fn test_request_builders() {
        let request = QueryRequest::new(vec![SqlQuery::new("A", "SELECT 1")]).with_app("dashboard");
        assert_eq!(request.app.as_deref(), Some("dashboard"));
        assert!(!request.request_id.is_empty());
        assert!(request.range.is_none());
    }

    #[test]
    fn test_frame_len() {
        let frame = DataFrame::new(
            "A",
            vec![
                Field::new("id", vec![json!(1), json!(2)]),
                Field::new("name", vec![json!("a"), json!("b"), json!("c")]),
            ],
        );
        assert_eq!(frame.len(), 3);
        assert!(DataFrame::default().is_empty());
    }

    #[test]
    fn test_empty_response() {
        let response = QueryResponse::empty();
        assert!(response.data.is_empty());
        assert!(response.first_frame().is_none());
        assert_eq!(serde_json::to_value(&response).unwrap(), json!({"data": []}));
    }
}
