use rusqlite::types::ValueRef;
use rusqlite::{params_from_iter, Connection, Row};
use serde::{Deserialize, Serialize};
use usage_metrics::{LabeledValue, MetricValue};

use crate::error::{CollectError, CollectResult};
use crate::executor::CommandExecutor;
use crate::session::DbSession;

/// How one metric is extracted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CollectionStrategy {
    Query(QueryStrategy),
    Command(CommandStrategy),
}

impl CollectionStrategy {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Query(_) => "query",
            Self::Command(_) => "command",
        }
    }

    pub fn needs_connection(&self) -> bool {
        matches!(self, Self::Query(_))
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Query(query) => query.validate(),
            Self::Command(command) => command.validate(),
        }
    }
}

/// Result-set shape of a query metric
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultShape {
    /// First column of the first row
    #[default]
    Scalar,
    /// One entry per row: value in column 0, label in column 1
    Labeled,
}

/// Parameterized read-only SQL query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryStrategy {
    pub sql: String,
    /// Bound positionally as `?1`, `?2`, ...
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default)]
    pub shape: ResultShape,
}

impl QueryStrategy {
    pub fn scalar(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            shape: ResultShape::Scalar,
        }
    }

    pub fn labeled(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            shape: ResultShape::Labeled,
        }
    }

    pub fn with_params(mut self, params: Vec<String>) -> Self {
        self.params = params;
        self
    }

    fn validate(&self) -> Result<(), String> {
        let keyword = self
            .sql
            .split_whitespace()
            .next()
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| "query is empty".to_string())?;

        match keyword.as_str() {
            "select" | "with" => Ok(()),
            other => Err(format!("query must be read-only, starts with '{}'", other)),
        }
    }

    pub async fn collect(&self, session: &DbSession) -> CollectResult<MetricValue> {
        let sql = self.sql.clone();
        let params = self.params.clone();
        let shape = self.shape;

        session
            .with_connection(move |connection| run_query(connection, &sql, &params, shape))
            .await
    }
}

fn run_query(
    connection: &Connection,
    sql: &str,
    params: &[String],
    shape: ResultShape,
) -> CollectResult<MetricValue> {
    let mut statement = connection.prepare(sql)?;
    if !statement.readonly() {
        return Err(CollectError::Configuration(
            "statement is not read-only".to_string(),
        ));
    }

    let mut rows = statement.query(params_from_iter(params.iter()))?;
    match shape {
        ResultShape::Scalar => {
            let row = rows
                .next()?
                .ok_or_else(|| CollectError::MalformedInput("query returned no rows".to_string()))?;
            Ok(MetricValue::Scalar(numeric_column(row, 0)?))
        }
        ResultShape::Labeled => {
            let mut entries = Vec::new();
            while let Some(row) = rows.next()? {
                let value = numeric_column(row, 0)?;
                let label = label_column(row, 1)?;
                entries.push(LabeledValue::new(label, value));
            }
            Ok(MetricValue::Labeled(entries))
        }
    }
}

fn numeric_column(row: &Row<'_>, index: usize) -> CollectResult<f64> {
    match row.get_ref(index)? {
        ValueRef::Integer(value) => Ok(value as f64),
        ValueRef::Real(value) => Ok(value),
        ValueRef::Text(bytes) => std::str::from_utf8(bytes)
            .ok()
            .and_then(|text| text.trim().parse::<f64>().ok())
            .ok_or_else(|| {
                CollectError::MalformedInput(format!("column {} is not numeric", index))
            }),
        ValueRef::Null => Err(CollectError::MalformedInput(format!(
            "column {} is NULL",
            index
        ))),
        ValueRef::Blob(_) => Err(CollectError::MalformedInput(format!(
            "column {} is a blob",
            index
        ))),
    }
}

fn label_column(row: &Row<'_>, index: usize) -> CollectResult<String> {
    match row.get_ref(index)? {
        ValueRef::Text(bytes) => Ok(String::from_utf8_lossy(bytes).trim().to_string()),
        ValueRef::Integer(value) => Ok(value.to_string()),
        ValueRef::Real(value) => Ok(value.to_string()),
        ValueRef::Null | ValueRef::Blob(_) => Err(CollectError::MalformedInput(format!(
            "label column {} is not text",
            index
        ))),
    }
}

/// One split step over probe output: split on `delimiter` (whitespace when
/// unset) and keep the token at `index`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSelector {
    #[serde(default)]
    pub delimiter: Option<String>,
    pub index: usize,
}

impl FieldSelector {
    pub fn new(delimiter: impl Into<String>, index: usize) -> Self {
        Self {
            delimiter: Some(delimiter.into()),
            index,
        }
    }

    fn pick<'a>(&self, input: &'a str) -> Option<&'a str> {
        match &self.delimiter {
            None => input.split_whitespace().nth(self.index),
            Some(delimiter) => input.split(delimiter.as_str()).nth(self.index),
        }
    }
}

/// Required token count of the probe line, split on `delimiter`
/// (whitespace when unset)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCount {
    #[serde(default)]
    pub delimiter: Option<String>,
    pub count: usize,
}

impl TokenCount {
    pub fn new(delimiter: impl Into<String>, count: usize) -> Self {
        Self {
            delimiter: Some(delimiter.into()),
            count,
        }
    }

    fn check(&self, line: &str) -> CollectResult<()> {
        let found = match &self.delimiter {
            None => line.split_whitespace().count(),
            Some(delimiter) => line.split(delimiter.as_str()).count(),
        };
        if found != self.count {
            return Err(CollectError::MalformedInput(format!(
                "expected {} tokens, found {} in '{}'",
                self.count, found, line
            )));
        }
        Ok(())
    }
}

/// Value derived as `numerator / denominator`, each picked from the probe
/// line by its own selector chain (e.g. used and total memory)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatioSelector {
    pub numerator: Vec<FieldSelector>,
    pub denominator: Vec<FieldSelector>,
}

impl RatioSelector {
    pub fn new(numerator: FieldSelector, denominator: FieldSelector) -> Self {
        Self {
            numerator: vec![numerator],
            denominator: vec![denominator],
        }
    }
}

/// Read-only external probe whose output holds the value at a fixed position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandStrategy {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Applied in order to the first non-empty output line
    #[serde(default)]
    pub select: Vec<FieldSelector>,
    /// Reject lines that do not split into exactly this many tokens
    #[serde(default)]
    pub expect_tokens: Option<TokenCount>,
    /// Replaces `select` when set
    #[serde(default)]
    pub ratio: Option<RatioSelector>,
}

impl CommandStrategy {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            select: Vec::new(),
            expect_tokens: None,
            ratio: None,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn select(mut self, selector: FieldSelector) -> Self {
        self.select.push(selector);
        self
    }

    pub fn expect_tokens(mut self, expected: TokenCount) -> Self {
        self.expect_tokens = Some(expected);
        self
    }

    pub fn ratio(mut self, ratio: RatioSelector) -> Self {
        self.ratio = Some(ratio);
        self
    }

    fn validate(&self) -> Result<(), String> {
        if self.program.trim().is_empty() {
            return Err("probe program cannot be empty".to_string());
        }
        if let Some(ratio) = &self.ratio {
            if !self.select.is_empty() {
                return Err("use either select or ratio, not both".to_string());
            }
            if ratio.numerator.is_empty() || ratio.denominator.is_empty() {
                return Err("ratio needs numerator and denominator selectors".to_string());
            }
        }
        if self.expect_tokens.as_ref().is_some_and(|expected| expected.count == 0) {
            return Err("expect_tokens count must be non-zero".to_string());
        }
        Ok(())
    }

    pub async fn collect(&self, executor: &dyn CommandExecutor) -> CollectResult<MetricValue> {
        let output = executor.execute(&self.program, &self.args).await?;
        self.parse_output(&output).map(MetricValue::Scalar)
    }

    pub fn parse_output(&self, output: &str) -> CollectResult<f64> {
        let line = output
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or_else(|| CollectError::MalformedInput("probe produced no output".to_string()))?;

        if let Some(expected) = &self.expect_tokens {
            expected.check(line)?;
        }

        if let Some(ratio) = &self.ratio {
            let numerator = pick_number(line, &ratio.numerator)?;
            let denominator = pick_number(line, &ratio.denominator)?;
            if denominator == 0.0 {
                return Err(CollectError::MalformedInput(format!(
                    "ratio denominator is zero in '{}'",
                    line
                )));
            }
            return Ok(numerator / denominator);
        }

        if self.select.is_empty() {
            return pick_number(line, &[FieldSelector::default()]);
        }
        pick_number(line, &self.select)
    }
}

fn pick_number(line: &str, selectors: &[FieldSelector]) -> CollectResult<f64> {
    let mut token = line;
    for selector in selectors {
        token = selector.pick(token).ok_or_else(|| {
            CollectError::MalformedInput(format!(
                "no token at position {} in '{}'",
                selector.index, line
            ))
        })?;
    }

    token.trim().parse::<f64>().map_err(|_| {
        CollectError::MalformedInput(format!("token '{}' is not numeric", token.trim()))
    })
}
