//! HTTP pipeline executor.
//!
//! Sends one or more statements to the backing store as a single
//! JSON-encoded pipeline request and decodes the typed column/value
//! pairs back into [`Row`]s.

use super::retry::RetryPolicy;
use super::row::{Row, Value};
use super::{Executor, Statement};
use crate::config::Credentials;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default HTTP timeout for a pipeline round trip.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Executor speaking the SQL-over-HTTP pipeline protocol.
pub struct HttpExecutor {
    endpoint: String,
    token: Option<String>,
    client: reqwest::blocking::Client,
    retry: RetryPolicy,
}

impl HttpExecutor {
    /// Creates an executor for the given pipeline endpoint.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: None,
            client: build_client(DEFAULT_TIMEOUT),
            retry: RetryPolicy::default(),
        }
    }

    /// Creates an executor from resolved credentials.
    #[must_use]
    pub fn from_credentials(credentials: &Credentials) -> Self {
        let mut executor = Self::new(credentials.url.clone());
        if let Some(token) = &credentials.token {
            executor.token = Some(token.clone());
        }
        executor
    }

    /// Sets the bearer token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the round-trip timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = build_client(timeout);
        self
    }

    /// One pipeline round trip; transport failures are typed with their
    /// transience, statement failures land in their slot.
    fn round_trip(&self, stmts: &[Statement]) -> Result<Vec<Result<Vec<Row>>>> {
        let body = PipelineRequest::from_statements(stmts);

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            // 429 and 5xx are worth retrying; 4xx are not.
            let transient = status.as_u16() == 429 || status.is_server_error();
            return Err(Error::Connectivity {
                cause: format!("HTTP {status}"),
                transient,
            });
        }

        let decoded: PipelineResponse = response.json().map_err(classify_transport_error)?;

        let mut outcomes = Vec::with_capacity(stmts.len());
        // The trailing close entry produces one extra result; only the
        // first N correspond to statements.
        for outcome in decoded.results.into_iter().take(stmts.len()) {
            outcomes.push(match outcome {
                StmtOutcome::Ok { response } => decode_rows(response),
                StmtOutcome::Error { error } => Err(Error::Remote {
                    code: error.code.unwrap_or_else(|| "UNKNOWN".to_string()),
                    message: error.message,
                }),
            });
        }
        if outcomes.len() < stmts.len() {
            return Err(Error::Remote {
                code: "PROTOCOL".to_string(),
                message: format!(
                    "pipeline returned {} results for {} statements",
                    outcomes.len(),
                    stmts.len()
                ),
            });
        }
        Ok(outcomes)
    }
}

impl Executor for HttpExecutor {
    fn exec(&self, stmt: Statement) -> Result<Vec<Row>> {
        let stmts = [stmt];
        let mut outcomes = self.retry.run("exec", || self.round_trip(&stmts))?;
        outcomes.swap_remove(0)
    }

    fn exec_batch(&self, stmts: Vec<Statement>) -> Result<Vec<Result<Vec<Row>>>> {
        if stmts.is_empty() {
            return Ok(Vec::new());
        }
        self.retry.run("exec_batch", || self.round_trip(&stmts))
    }
}

fn build_client(timeout: Duration) -> reqwest::blocking::Client {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

/// Types a reqwest failure with its transience. Timeouts, connect and
/// TLS failures are transient; request construction and body decode
/// failures are not.
fn classify_transport_error(err: reqwest::Error) -> Error {
    let transient = err.is_timeout() || err.is_connect();
    Error::Connectivity {
        cause: err.to_string(),
        transient,
    }
}

fn decode_rows(response: Option<ExecuteResponse>) -> Result<Vec<Row>> {
    let Some(result) = response.and_then(|r| r.result) else {
        return Ok(Vec::new());
    };
    let columns: Vec<String> = result
        .cols
        .into_iter()
        .map(|c| c.name.unwrap_or_default())
        .collect();
    let mut rows = Vec::with_capacity(result.rows.len());
    for wire_row in result.rows {
        let mut values = Vec::with_capacity(wire_row.len());
        for cell in wire_row {
            values.push(decode_cell(cell)?);
        }
        rows.push(Row::new(columns.clone(), values));
    }
    Ok(rows)
}

fn decode_cell(cell: WireCell) -> Result<Value> {
    let malformed = |detail: String| Error::Remote {
        code: "PROTOCOL".to_string(),
        message: detail,
    };
    match cell.kind.as_str() {
        "null" => Ok(Value::Null),
        "text" => match cell.value {
            Some(serde_json::Value::String(s)) => Ok(Value::Text(s)),
            other => Err(malformed(format!("text cell with value {other:?}"))),
        },
        // 64-bit integers travel as JSON strings to survive double
        // precision; accept plain numbers too.
        "integer" => match cell.value {
            Some(serde_json::Value::String(s)) => s
                .parse()
                .map(Value::Integer)
                .map_err(|_| malformed(format!("integer cell with value {s:?}"))),
            Some(serde_json::Value::Number(n)) => n
                .as_i64()
                .map(Value::Integer)
                .ok_or_else(|| malformed(format!("integer cell with value {n}"))),
            other => Err(malformed(format!("integer cell with value {other:?}"))),
        },
        "float" => match cell.value {
            Some(serde_json::Value::Number(n)) => n
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| malformed(format!("float cell with value {n}"))),
            other => Err(malformed(format!("float cell with value {other:?}"))),
        },
        other => Err(malformed(format!("unknown cell type {other:?}"))),
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Serialize)]
struct PipelineRequest<'a> {
    requests: Vec<RequestEntry<'a>>,
}

impl<'a> PipelineRequest<'a> {
    fn from_statements(stmts: &'a [Statement]) -> Self {
        let mut requests: Vec<RequestEntry<'a>> = stmts
            .iter()
            .map(|stmt| RequestEntry::Execute {
                stmt: WireStmt {
                    sql: &stmt.sql,
                    args: stmt
                        .args
                        .iter()
                        .map(|arg| {
                            arg.as_deref()
                                .map_or(WireArg::Null, |value| WireArg::Text { value })
                        })
                        .collect(),
                },
            })
            .collect();
        requests.push(RequestEntry::Close);
        Self { requests }
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum RequestEntry<'a> {
    Execute { stmt: WireStmt<'a> },
    Close,
}

#[derive(Serialize)]
struct WireStmt<'a> {
    sql: &'a str,
    args: Vec<WireArg<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireArg<'a> {
    Text { value: &'a str },
    Null,
}

#[derive(Deserialize)]
struct PipelineResponse {
    #[serde(default)]
    results: Vec<StmtOutcome>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum StmtOutcome {
    Ok {
        #[serde(default)]
        response: Option<ExecuteResponse>,
    },
    Error {
        error: WireError,
    },
}

#[derive(Deserialize)]
struct WireError {
    #[serde(default)]
    code: Option<String>,
    message: String,
}

#[derive(Clone, Deserialize)]
struct ExecuteResponse {
    #[serde(default)]
    result: Option<ResultSet>,
}

#[derive(Clone, Deserialize)]
struct ResultSet {
    #[serde(default)]
    cols: Vec<Col>,
    #[serde(default)]
    rows: Vec<Vec<WireCell>>,
}

#[derive(Clone, Deserialize)]
struct Col {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Clone, Deserialize)]
struct WireCell {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    value: Option<serde_json::Value>,
}
