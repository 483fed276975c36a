//! Typed analysis results and error-shape detection.
//!
//! `/analyze` returns a loosely-shaped JSON payload discriminated by a `type`
//! tag. Legacy error payloads come in three disguises: an `error` flag, a
//! `type` of `"error"`, or a bare `message` with no tag at all. Those must be
//! suppressed from the structured view (the chat explanation still covers
//! them), so classification happens before any variant parsing.

use serde::Deserialize;
use serde_json::Value;

/// Chart description attached to forecast/predict results.
#[derive(Debug, Clone, Deserialize)]
pub struct Visualization {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub data: Vec<Value>,
    #[serde(default)]
    pub x: Option<String>,
    /// A single series name or a list of them.
    #[serde(default)]
    pub y: Option<Value>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, rename = "xLabel")]
    pub x_label: Option<String>,
    #[serde(default, rename = "yLabel")]
    pub y_label: Option<String>,
}

/// Dataset overview: column inventory, per-column stats, date ranges.
/// The nested stats blob is backend-shaped and passed through untyped.
#[derive(Debug, Clone, Deserialize)]
pub struct SummaryResult {
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForecastMetrics {
    #[serde(default)]
    pub mse: Option<f64>,
    #[serde(default)]
    pub r2: Option<f64>,
}

/// Trend/forecast over a time column.
#[derive(Debug, Clone, Deserialize)]
pub struct ForecastResult {
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub metrics: Option<ForecastMetrics>,
    #[serde(default)]
    pub visualization: Option<Visualization>,
}

/// Group-by aggregation rows.
#[derive(Debug, Clone, Deserialize)]
pub struct AggregationResult {
    #[serde(default)]
    pub group_by_columns: Vec<String>,
    #[serde(default)]
    pub agg_column: Option<String>,
    #[serde(default)]
    pub agg_function: Option<String>,
    #[serde(default)]
    pub data: Vec<Value>,
}

/// Filtered rows plus the conditions that produced them.
#[derive(Debug, Clone, Deserialize)]
pub struct FilterResult {
    #[serde(default)]
    pub conditions: Vec<Value>,
    #[serde(default)]
    pub row_count: u64,
    #[serde(default)]
    pub data: Vec<Value>,
}

/// Fallback free-form query result (row sample, optionally a scalar answer).
#[derive(Debug, Clone, Deserialize)]
pub struct QueryResult {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub data: Vec<Value>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub note: Option<String>,
}

/// Model prediction: rows, error metrics, and an optional chart block.
#[derive(Debug, Clone, Deserialize)]
pub struct PredictResult {
    #[serde(default, alias = "data")]
    pub rows: Vec<Value>,
    #[serde(default)]
    pub mae: Option<f64>,
    #[serde(default)]
    pub r2: Option<f64>,
    #[serde(default)]
    pub visualization: Option<Visualization>,
}

/// What-if scenario: a single predicted value plus the scenario note.
#[derive(Debug, Clone, Deserialize)]
pub struct WhatIfResult {
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub note: Option<String>,
}

/// The structured result shown in the analysis sidebar. Immutable once parsed;
/// exactly one is current at a time.
#[derive(Debug, Clone)]
pub enum AnalysisResult {
    Summary(SummaryResult),
    Forecast(ForecastResult),
    Aggregation(AggregationResult),
    Filter(FilterResult),
    Query(QueryResult),
    Predict(PredictResult),
    WhatIf(WhatIfResult),
    /// A tag we do not recognize; the raw payload is kept as-is.
    Unknown(Value),
}

impl AnalysisResult {
    /// The discriminant tag, used for the cache entry `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisResult::Summary(_) => "summary",
            AnalysisResult::Forecast(_) => "forecast",
            AnalysisResult::Aggregation(_) => "aggregation",
            AnalysisResult::Filter(_) => "filter",
            AnalysisResult::Query(_) => "query",
            AnalysisResult::Predict(_) => "predict",
            AnalysisResult::WhatIf(_) => "whatif",
            AnalysisResult::Unknown(_) => "unknown",
        }
    }
}

/// Outcome of classifying a raw `/analyze` result payload.
#[derive(Debug, Clone)]
pub enum ResultShape {
    /// An error in result's clothing; never surfaced in the sidebar.
    ErrorShaped,
    Typed(AnalysisResult),
}

/// Detect error-shaped payloads, then parse the genuine ones by their tag.
/// A variant that fails to parse degrades to `Unknown` rather than erroring;
/// the raw payload is still displayable.
pub fn classify_result(value: &Value) -> ResultShape {
    let has_error_flag = value
        .get("error")
        .map(|v| !matches!(v, Value::Bool(false) | Value::Null))
        .unwrap_or(false);
    let type_tag = value.get("type").and_then(|v| v.as_str());
    if has_error_flag
        || type_tag == Some("error")
        || (value.get("message").is_some() && type_tag.is_none())
    {
        return ResultShape::ErrorShaped;
    }

    fn parse<T: for<'de> Deserialize<'de>>(
        value: &Value,
        wrap: fn(T) -> AnalysisResult,
    ) -> AnalysisResult {
        serde_json::from_value::<T>(value.clone())
            .map(wrap)
            .unwrap_or_else(|e| {
                log::warn!("analysis result did not match its tag: {}", e);
                AnalysisResult::Unknown(value.clone())
            })
    }

    let result = match type_tag {
        Some("summary") => parse(value, AnalysisResult::Summary),
        Some("forecast") | Some("trend") => parse(value, AnalysisResult::Forecast),
        Some("aggregation") => parse(value, AnalysisResult::Aggregation),
        Some("filter") => parse(value, AnalysisResult::Filter),
        Some("query") => parse(value, AnalysisResult::Query),
        Some("predict") => parse(value, AnalysisResult::Predict),
        Some("whatif") => parse(value, AnalysisResult::WhatIf),
        _ => AnalysisResult::Unknown(value.clone()),
    };
    ResultShape::Typed(result)
}
