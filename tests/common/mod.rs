//! In-process stub of the BigQuery REST API.
//!
//! Keeps datasets, tables, rows and jobs in memory for a single project and
//! answers with the same JSON shapes as the real service. Supports:
//! - 409 / 404 error envelopes
//! - `maxResults` / `pageToken` paging of table lists, datasets and rows
//! - insert-ID dedup and per-row insert errors
//! - `select <cols> from [<dataset>.]<table>` queries
//! - jobs that stay RUNNING for a configurable number of polls
//! - injected failures (e.g. 503) for retry tests, before or after the
//!   request is applied

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, Request, State};
use axum::http::{StatusCode, header::AUTHORIZATION};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bqclient::{Client, ClientConfig};
use bqclient::models::QueryConfig;
use serde_json::{Map, Value, json};
use tokio::task::JoinHandle;

pub const PROJECT: &str = "stub-project";
pub const TOKEN: &str = "stub-token";
const LOCATION: &str = "US";

type Params = Query<HashMap<String, String>>;

#[derive(Default)]
struct StubTable {
    schema: Value,
    friendly_name: Option<String>,
    description: Option<String>,
    expiration_time: Option<Value>,
    creation_time: i64,
    last_modified_time: i64,
    rows: Vec<Map<String, Value>>,
    seen_insert_ids: HashSet<String>,
}

impl StubTable {
    fn fields(&self) -> Vec<Value> {
        self.schema["fields"].as_array().cloned().unwrap_or_default()
    }

    fn has_field(&self, name: &str) -> bool {
        self.fields().iter().any(|f| f["name"] == name)
    }
}

#[derive(Default)]
struct StubDataset {
    tables: BTreeMap<String, StubTable>,
    creation_time: i64,
}

/// Materialized output of a query job.
struct QueryOutput {
    fields: Vec<Value>,
    rows: Vec<Value>,
}

struct StubJob {
    /// `Err` holds the reason the job failed
    output: Result<QueryOutput, String>,
    polls_left: u32,
    cancelled: bool,
    location: String,
}

#[derive(Default)]
struct Warehouse {
    datasets: BTreeMap<String, StubDataset>,
    jobs: BTreeMap<String, StubJob>,
    /// Status to answer the next N requests with, before routing
    injected: Option<(StatusCode, u32)>,
    /// Status to replace the next N responses with, after routing
    injected_after: Option<(StatusCode, u32)>,
    /// Location reported for new jobs (`US` when None)
    job_location: Option<String>,
    /// Polls a new job stays RUNNING for
    pending_polls: u32,
    requests: Vec<String>,
    /// Requests as `"METHOD /path?query"`
    uris: Vec<String>,
    job_seq: u64,
}

impl Warehouse {
    fn job_location(&self) -> String {
        self.job_location.clone().unwrap_or_else(|| LOCATION.to_string())
    }
}

/// Count down an injected failure; returns the status to answer with.
fn take_injected(slot: &mut Option<(StatusCode, u32)>) -> Option<StatusCode> {
    match *slot {
        Some((status, count)) if count > 0 => {
            *slot = (count > 1).then_some((status, count - 1));
            Some(status)
        }
        _ => None,
    }
}

#[derive(Clone)]
struct StubState {
    warehouse: Arc<Mutex<Warehouse>>,
}

impl StubState {
    fn lock(&self) -> std::sync::MutexGuard<'_, Warehouse> {
        self.warehouse.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Handle for the stub server; the server stops when it is dropped.
pub struct StubHandle {
    base_url: String,
    join: JoinHandle<()>,
    state: StubState,
}

impl StubHandle {
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Client with fast retries and polling, pointed at this stub.
    pub fn client(&self) -> Client {
        self.client_with(|_, _| {})
    }

    /// Client with settings adjusted by `tweak`.
    pub fn client_with(&self, tweak: impl FnOnce(&mut ClientConfig, &mut QueryConfig)) -> Client {
        let mut config = self.client_config();
        let mut query = QueryConfig {
            poll_interval_ms: 1,
            max_poll_attempts: 20,
            ..Default::default()
        };
        tweak(&mut config, &mut query);
        Client::with_query_config(&config, Some(TOKEN.to_string()), query)
            .expect("stub client config is valid")
    }

    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(PROJECT);
        config.base_url = self.base_url.clone();
        config.initial_backoff_ms = 1;
        config.max_retries = 3;
        config.timeout_secs = 10;
        config
    }

    /// Answer the next `count` requests with `status` and a Google error envelope.
    pub fn fail_next(&self, count: u32, status: u16) {
        let status = StatusCode::from_u16(status).expect("valid status code");
        self.state.lock().injected = Some((status, count));
    }

    /// Apply the next `count` requests, then answer them with `status` anyway.
    pub fn fail_after_next(&self, count: u32, status: u16) {
        let status = StatusCode::from_u16(status).expect("valid status code");
        self.state.lock().injected_after = Some((status, count));
    }

    /// Report `location` for jobs created from now on.
    pub fn set_job_location(&self, location: &str) {
        self.state.lock().job_location = Some(location.to_string());
    }

    /// Keep new jobs RUNNING for `polls` status/result requests.
    pub fn set_pending_polls(&self, polls: u32) {
        self.state.lock().pending_polls = polls;
    }

    /// Requests seen so far, as `"METHOD /path"`.
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().requests.clone()
    }

    /// Requests seen so far, as `"METHOD /path?query"`.
    pub fn request_uris(&self) -> Vec<String> {
        self.state.lock().uris.clone()
    }

    /// Number of requests whose `"METHOD /path"` line ends with `suffix`.
    pub fn count_requests(&self, method: &str, suffix: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.starts_with(method) && r.ends_with(suffix))
            .count()
    }

    pub fn row_count(&self, dataset: &str, table: &str) -> usize {
        self.state
            .lock()
            .datasets
            .get(dataset)
            .and_then(|d| d.tables.get(table))
            .map_or(0, |t| t.rows.len())
    }

    pub fn job_cancelled(&self, job_id: &str) -> bool {
        self.state
            .lock()
            .jobs
            .get(job_id)
            .is_some_and(|j| j.cancelled)
    }
}

impl Drop for StubHandle {
    fn drop(&mut self) {
        self.join.abort();
    }
}

/// Spawn the stub on an ephemeral local port.
pub async fn spawn_stub() -> StubHandle {
    let state = StubState {
        warehouse: Arc::new(Mutex::new(Warehouse::default())),
    };

    let app = Router::new()
        .route(
            "/projects/{project}/datasets",
            get(list_datasets).post(create_dataset),
        )
        .route(
            "/projects/{project}/datasets/{dataset}",
            get(get_dataset).delete(delete_dataset),
        )
        .route(
            "/projects/{project}/datasets/{dataset}/tables",
            get(list_tables).post(create_table),
        )
        .route(
            "/projects/{project}/datasets/{dataset}/tables/{table}",
            get(get_table).patch(patch_table).delete(delete_table),
        )
        .route(
            "/projects/{project}/datasets/{dataset}/tables/{table}/insertAll",
            post(insert_all),
        )
        .route(
            "/projects/{project}/datasets/{dataset}/tables/{table}/data",
            get(list_rows),
        )
        .route("/projects/{project}/queries", post(run_query))
        .route("/projects/{project}/queries/{job}", get(query_results))
        .route("/projects/{project}/jobs", post(insert_job))
        .route("/projects/{project}/jobs/{job}", get(get_job))
        .route("/projects/{project}/jobs/{job}/cancel", post(cancel_job))
        .layer(middleware::from_fn_with_state(state.clone(), intercept))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub listener");
    let base_url = format!("http://{}", listener.local_addr().expect("local addr"));
    let join = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    StubHandle {
        base_url,
        join,
        state,
    }
}

// ═══════════════════════════════════════════════════════════════════
// Middleware
// ═══════════════════════════════════════════════════════════════════

async fn intercept(State(state): State<StubState>, request: Request, next: Next) -> Response {
    let line = format!("{} {}", request.method(), request.uri().path());
    let uri = format!("{} {}", request.method(), request.uri());
    let injected = {
        let mut w = state.lock();
        w.requests.push(line);
        w.uris.push(uri);
        take_injected(&mut w.injected)
    };
    if let Some(status) = injected {
        return api_error(status, "backendError", "Injected failure".to_string());
    }

    let authorized = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"));
    if !authorized {
        return api_error(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "Request is missing valid credentials".to_string(),
        );
    }

    let response = next.run(request).await;
    let injected_after = take_injected(&mut state.lock().injected_after);
    match injected_after {
        Some(status) => api_error(status, "backendError", "Injected failure after commit".to_string()),
        None => response,
    }
}

// ═══════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════

fn api_error(status: StatusCode, reason: &str, message: String) -> Response {
    let canonical = match status.as_u16() {
        400 => "INVALID_ARGUMENT",
        401 => "UNAUTHENTICATED",
        404 => "NOT_FOUND",
        409 => "ALREADY_EXISTS",
        429 => "RESOURCE_EXHAUSTED",
        503 => "UNAVAILABLE",
        _ => "INTERNAL",
    };
    let body = json!({
        "error": {
            "code": status.as_u16(),
            "message": message,
            "status": canonical,
            "errors": [{"reason": reason, "message": message, "domain": "global"}]
        }
    });
    (status, Json(body)).into_response()
}

fn not_found(what: String) -> Response {
    api_error(StatusCode::NOT_FOUND, "notFound", format!("Not found: {what}"))
}

fn ok(body: Value) -> Response {
    (StatusCode::OK, Json(body)).into_response()
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Slice `items` according to `maxResults` / `pageToken`; returns the page and next token.
fn page<T: Clone>(items: &[T], params: &HashMap<String, String>) -> (Vec<T>, Option<String>) {
    let start: usize = params
        .get("pageToken")
        .and_then(|t| t.parse().ok())
        .unwrap_or(0)
        .min(items.len());
    let size = params
        .get("maxResults")
        .and_then(|n| n.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(usize::MAX);
    let end = start.saturating_add(size).min(items.len());
    let next = (end < items.len()).then(|| end.to_string());
    (items[start..end].to_vec(), next)
}

fn table_json(project: &str, dataset: &str, id: &str, table: &StubTable) -> Value {
    let mut body = json!({
        "kind": "bigquery#table",
        "id": format!("{project}:{dataset}.{id}"),
        "tableReference": {"projectId": project, "datasetId": dataset, "tableId": id},
        "type": "TABLE",
        "schema": table.schema,
        "creationTime": table.creation_time.to_string(),
        "lastModifiedTime": table.last_modified_time.to_string(),
        "numRows": table.rows.len().to_string(),
        "numBytes": "0"
    });
    if let Some(name) = &table.friendly_name {
        body["friendlyName"] = json!(name);
    }
    if let Some(description) = &table.description {
        body["description"] = json!(description);
    }
    if let Some(expiration) = &table.expiration_time {
        body["expirationTime"] = expiration.clone();
    }
    body
}

fn dataset_json(project: &str, id: &str, dataset: &StubDataset) -> Value {
    json!({
        "kind": "bigquery#dataset",
        "id": format!("{project}:{id}"),
        "datasetReference": {"projectId": project, "datasetId": id},
        "location": LOCATION,
        "creationTime": dataset.creation_time.to_string(),
        "lastModifiedTime": dataset.creation_time.to_string()
    })
}

/// Wire cell: every scalar is a string; null stays null.
fn cell(value: Option<&Value>) -> Value {
    match value {
        None | Some(Value::Null) => Value::Null,
        Some(Value::String(s)) => json!(s),
        Some(Value::Bool(b)) => json!(b.to_string()),
        Some(Value::Number(n)) => json!(n.to_string()),
        Some(other) => json!(other.to_string()),
    }
}

fn wire_row(row: &Map<String, Value>, fields: &[Value]) -> Value {
    let cells: Vec<Value> = fields
        .iter()
        .map(|f| json!({"v": cell(f["name"].as_str().and_then(|n| row.get(n)))}))
        .collect();
    json!({"f": cells})
}

/// Evaluate `select <cols> from [<dataset>.]<table>`.
fn run_sql(
    w: &Warehouse,
    sql: &str,
    default_dataset: Option<&str>,
) -> Result<QueryOutput, String> {
    let sql = sql.trim().trim_end_matches(';').trim();
    let lower = sql.to_ascii_lowercase();
    if !lower.starts_with("select ") {
        return Err(format!("Syntax error: expected SELECT in {sql:?}"));
    }
    let from_at = lower
        .find(" from ")
        .ok_or_else(|| format!("Syntax error: expected FROM in {sql:?}"))?;
    let columns = sql["select ".len()..from_at].trim();
    let table_ref = sql[from_at + " from ".len()..].trim();

    let (dataset_id, table_id) = match table_ref.split_once('.') {
        Some((d, t)) => (d, t),
        None => (
            default_dataset
                .ok_or_else(|| format!("Table name {table_ref:?} missing dataset"))?,
            table_ref,
        ),
    };
    let table = w
        .datasets
        .get(dataset_id)
        .and_then(|d| d.tables.get(table_id))
        .ok_or_else(|| format!("Not found: Table {PROJECT}:{dataset_id}.{table_id}"))?;

    let all_fields = table.fields();
    let fields: Vec<Value> = if columns == "*" {
        all_fields
    } else {
        columns
            .split(',')
            .map(str::trim)
            .map(|c| {
                all_fields
                    .iter()
                    .find(|f| f["name"].as_str().is_some_and(|n| n.eq_ignore_ascii_case(c)))
                    .cloned()
                    .ok_or_else(|| format!("Unrecognized name: {c}"))
            })
            .collect::<Result<_, _>>()?
    };
    let rows = table.rows.iter().map(|r| wire_row(r, &fields)).collect();
    Ok(QueryOutput { fields, rows })
}

fn default_dataset_of(config: &Value) -> Option<String> {
    config["defaultDataset"]["datasetId"]
        .as_str()
        .map(str::to_string)
}

fn job_reference(project: &str, job_id: &str, location: &str) -> Value {
    json!({"projectId": project, "jobId": job_id, "location": location})
}

fn job_json(project: &str, job_id: &str, job: &StubJob) -> Value {
    let status = if job.polls_left > 0 && !job.cancelled {
        json!({"state": "RUNNING"})
    } else {
        match &job.output {
            Ok(_) => json!({"state": "DONE"}),
            Err(reason) => {
                let detail = json!({"reason": "invalidQuery", "location": "query", "message": reason});
                json!({"state": "DONE", "errorResult": detail, "errors": [detail]})
            }
        }
    };
    json!({
        "kind": "bigquery#job",
        "id": format!("{project}:{}.{job_id}", job.location),
        "jobReference": job_reference(project, job_id, &job.location),
        "status": status
    })
}

/// `getQueryResults`-shaped body for one page of a finished job.
fn results_json(
    project: &str,
    job_id: &str,
    location: &str,
    output: &QueryOutput,
    params: &HashMap<String, String>,
) -> Value {
    let (rows, next) = page(&output.rows, params);
    let mut body = json!({
        "kind": "bigquery#getQueryResultsResponse",
        "jobReference": job_reference(project, job_id, location),
        "jobComplete": true,
        "schema": {"fields": output.fields},
        "rows": rows,
        "totalRows": output.rows.len().to_string()
    });
    if let Some(token) = next {
        body["pageToken"] = json!(token);
    }
    body
}

// ═══════════════════════════════════════════════════════════════════
// Datasets
// ═══════════════════════════════════════════════════════════════════

async fn create_dataset(
    State(state): State<StubState>,
    Path(project): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let Some(id) = body["datasetReference"]["datasetId"].as_str() else {
        return api_error(StatusCode::BAD_REQUEST, "invalid", "Missing datasetId".to_string());
    };
    let mut w = state.lock();
    if w.datasets.contains_key(id) {
        return api_error(
            StatusCode::CONFLICT,
            "duplicate",
            format!("Already Exists: Dataset {project}:{id}"),
        );
    }
    let dataset = StubDataset {
        tables: BTreeMap::new(),
        creation_time: now_millis(),
    };
    let response = dataset_json(&project, id, &dataset);
    w.datasets.insert(id.to_string(), dataset);
    ok(response)
}

async fn list_datasets(
    State(state): State<StubState>,
    Path(project): Path<String>,
    Query(params): Params,
) -> Response {
    let w = state.lock();
    let ids: Vec<String> = w.datasets.keys().cloned().collect();
    let (ids, next) = page(&ids, &params);
    let datasets: Vec<Value> = ids
        .iter()
        .map(|id| json!({"id": format!("{project}:{id}"), "datasetReference": {"projectId": project, "datasetId": id}}))
        .collect();
    let mut body = json!({"kind": "bigquery#datasetList", "datasets": datasets});
    if let Some(token) = next {
        body["nextPageToken"] = json!(token);
    }
    ok(body)
}

async fn get_dataset(
    State(state): State<StubState>,
    Path((project, dataset)): Path<(String, String)>,
) -> Response {
    let w = state.lock();
    match w.datasets.get(&dataset) {
        Some(d) => ok(dataset_json(&project, &dataset, d)),
        None => not_found(format!("Dataset {project}:{dataset}")),
    }
}

async fn delete_dataset(
    State(state): State<StubState>,
    Path((project, dataset)): Path<(String, String)>,
) -> Response {
    let mut w = state.lock();
    match w.datasets.get(&dataset) {
        None => not_found(format!("Dataset {project}:{dataset}")),
        Some(d) if !d.tables.is_empty() => api_error(
            StatusCode::BAD_REQUEST,
            "resourceInUse",
            format!("Dataset {project}:{dataset} is still in use"),
        ),
        Some(_) => {
            w.datasets.remove(&dataset);
            StatusCode::NO_CONTENT.into_response()
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// Tables
// ═══════════════════════════════════════════════════════════════════

async fn create_table(
    State(state): State<StubState>,
    Path((project, dataset)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    let Some(id) = body["tableReference"]["tableId"].as_str() else {
        return api_error(StatusCode::BAD_REQUEST, "invalid", "Missing tableId".to_string());
    };
    let mut w = state.lock();
    let Some(d) = w.datasets.get_mut(&dataset) else {
        return not_found(format!("Dataset {project}:{dataset}"));
    };
    if d.tables.contains_key(id) {
        return api_error(
            StatusCode::CONFLICT,
            "duplicate",
            format!("Already Exists: Table {project}:{dataset}.{id}"),
        );
    }
    let now = now_millis();
    let table = StubTable {
        schema: body.get("schema").cloned().unwrap_or_else(|| json!({"fields": []})),
        friendly_name: body["friendlyName"].as_str().map(str::to_string),
        description: body["description"].as_str().map(str::to_string),
        expiration_time: body.get("expirationTime").cloned(),
        creation_time: now,
        last_modified_time: now,
        ..Default::default()
    };
    let response = table_json(&project, &dataset, id, &table);
    d.tables.insert(id.to_string(), table);
    ok(response)
}

async fn list_tables(
    State(state): State<StubState>,
    Path((project, dataset)): Path<(String, String)>,
    Query(params): Params,
) -> Response {
    let w = state.lock();
    let Some(d) = w.datasets.get(&dataset) else {
        return not_found(format!("Dataset {project}:{dataset}"));
    };
    let ids: Vec<String> = d.tables.keys().cloned().collect();
    let (ids, next) = page(&ids, &params);
    let tables: Vec<Value> = ids
        .iter()
        .map(|id| {
            json!({
                "kind": "bigquery#table",
                "id": format!("{project}:{dataset}.{id}"),
                "tableReference": {"projectId": project, "datasetId": dataset, "tableId": id},
                "type": "TABLE"
            })
        })
        .collect();
    let mut body = json!({"kind": "bigquery#tableList", "tables": tables, "totalItems": d.tables.len()});
    if let Some(token) = next {
        body["nextPageToken"] = json!(token);
    }
    ok(body)
}

async fn get_table(
    State(state): State<StubState>,
    Path((project, dataset, table)): Path<(String, String, String)>,
) -> Response {
    let w = state.lock();
    match w.datasets.get(&dataset).and_then(|d| d.tables.get(&table)) {
        Some(t) => ok(table_json(&project, &dataset, &table, t)),
        None => not_found(format!("Table {project}:{dataset}.{table}")),
    }
}

async fn patch_table(
    State(state): State<StubState>,
    Path((project, dataset, table)): Path<(String, String, String)>,
    Json(body): Json<Value>,
) -> Response {
    let mut w = state.lock();
    let Some(t) = w
        .datasets
        .get_mut(&dataset)
        .and_then(|d| d.tables.get_mut(&table))
    else {
        return not_found(format!("Table {project}:{dataset}.{table}"));
    };
    if let Some(description) = body.get("description") {
        t.description = description.as_str().map(str::to_string);
    }
    if let Some(name) = body.get("friendlyName") {
        t.friendly_name = name.as_str().map(str::to_string);
    }
    t.last_modified_time = now_millis();
    ok(table_json(&project, &dataset, &table, t))
}

async fn delete_table(
    State(state): State<StubState>,
    Path((project, dataset, table)): Path<(String, String, String)>,
) -> Response {
    let mut w = state.lock();
    let removed = w
        .datasets
        .get_mut(&dataset)
        .and_then(|d| d.tables.remove(&table));
    match removed {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => not_found(format!("Table {project}:{dataset}.{table}")),
    }
}

// ═══════════════════════════════════════════════════════════════════
// Rows
// ═══════════════════════════════════════════════════════════════════

async fn insert_all(
    State(state): State<StubState>,
    Path((project, dataset, table)): Path<(String, String, String)>,
    Json(body): Json<Value>,
) -> Response {
    let mut w = state.lock();
    let Some(t) = w
        .datasets
        .get_mut(&dataset)
        .and_then(|d| d.tables.get_mut(&table))
    else {
        return not_found(format!("Table {project}:{dataset}.{table}"));
    };

    let skip_invalid = body["skipInvalidRows"].as_bool().unwrap_or(false);
    let ignore_unknown = body["ignoreUnknownValues"].as_bool().unwrap_or(false);
    let rows = body["rows"].as_array().cloned().unwrap_or_default();

    let mut insert_errors = Vec::new();
    let mut valid = Vec::new();
    for (index, row) in rows.iter().enumerate() {
        let json_row = row["json"].as_object().cloned().unwrap_or_default();
        let unknown: Vec<&String> = json_row.keys().filter(|k| !t.has_field(k)).collect();
        if !unknown.is_empty() && !ignore_unknown {
            insert_errors.push(json!({
                "index": index,
                "errors": [{"reason": "invalid", "location": unknown[0], "message": "no such field"}]
            }));
            continue;
        }
        let json_row = json_row
            .into_iter()
            .filter(|(k, _)| t.has_field(k))
            .collect::<Map<String, Value>>();
        valid.push((index, row["insertId"].as_str().map(str::to_string), json_row));
    }

    if !insert_errors.is_empty() && !skip_invalid {
        // The whole request is rejected; valid rows are reported as stopped
        for (index, _, _) in &valid {
            insert_errors.push(json!({
                "index": index,
                "errors": [{"reason": "stopped", "message": ""}]
            }));
        }
        return ok(json!({"kind": "bigquery#tableDataInsertAllResponse", "insertErrors": insert_errors}));
    }

    for (_, insert_id, json_row) in valid {
        if let Some(id) = insert_id {
            if !t.seen_insert_ids.insert(id) {
                continue;
            }
        }
        t.rows.push(json_row);
    }

    let mut response = json!({"kind": "bigquery#tableDataInsertAllResponse"});
    if !insert_errors.is_empty() {
        response["insertErrors"] = json!(insert_errors);
    }
    ok(response)
}

async fn list_rows(
    State(state): State<StubState>,
    Path((project, dataset, table)): Path<(String, String, String)>,
    Query(params): Params,
) -> Response {
    let w = state.lock();
    let Some(t) = w.datasets.get(&dataset).and_then(|d| d.tables.get(&table)) else {
        return not_found(format!("Table {project}:{dataset}.{table}"));
    };
    let fields = t.fields();
    let (rows, next) = page(&t.rows, &params);
    let rows: Vec<Value> = rows.iter().map(|r| wire_row(r, &fields)).collect();
    let mut body = json!({
        "kind": "bigquery#tableDataList",
        "rows": rows,
        "totalRows": t.rows.len().to_string()
    });
    if let Some(token) = next {
        body["pageToken"] = json!(token);
    }
    ok(body)
}

// ═══════════════════════════════════════════════════════════════════
// Queries and jobs
// ═══════════════════════════════════════════════════════════════════

async fn run_query(
    State(state): State<StubState>,
    Path(project): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let mut w = state.lock();
    let sql = body["query"].as_str().unwrap_or_default();
    let output = match run_sql(&w, sql, default_dataset_of(&body).as_deref()) {
        Ok(output) => output,
        Err(reason) => return api_error(StatusCode::BAD_REQUEST, "invalidQuery", reason),
    };

    w.job_seq += 1;
    let job_id = format!("job_stub_{}", w.job_seq);
    let job = StubJob {
        output: Ok(output),
        polls_left: w.pending_polls,
        cancelled: false,
        location: w.job_location(),
    };

    let mut params = HashMap::new();
    if let Some(n) = body["maxResults"].as_u64() {
        params.insert("maxResults".to_string(), n.to_string());
    }
    let response = match (&job.output, job.polls_left) {
        (Ok(output), 0) => results_json(&project, &job_id, &job.location, output, &params),
        _ => json!({
            "kind": "bigquery#queryResponse",
            "jobReference": job_reference(&project, &job_id, &job.location),
            "jobComplete": false
        }),
    };
    w.jobs.insert(job_id, job);
    ok(response)
}

async fn query_results(
    State(state): State<StubState>,
    Path((project, job_id)): Path<(String, String)>,
    Query(params): Params,
) -> Response {
    let mut w = state.lock();
    let Some(job) = w.jobs.get_mut(&job_id) else {
        return not_found(format!("Job {project}:{LOCATION}.{job_id}"));
    };
    if job.polls_left > 0 {
        job.polls_left -= 1;
        return ok(json!({
            "kind": "bigquery#getQueryResultsResponse",
            "jobReference": job_reference(&project, &job_id, &job.location),
            "jobComplete": false
        }));
    }
    match &job.output {
        Ok(output) => ok(results_json(&project, &job_id, &job.location, output, &params)),
        Err(reason) => api_error(StatusCode::BAD_REQUEST, "invalidQuery", reason.clone()),
    }
}

async fn insert_job(
    State(state): State<StubState>,
    Path(project): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let mut w = state.lock();
    let job_id = match body["jobReference"]["jobId"].as_str() {
        Some(id) => id.to_string(),
        None => {
            w.job_seq += 1;
            format!("job_stub_{}", w.job_seq)
        }
    };
    if w.jobs.contains_key(&job_id) {
        return api_error(
            StatusCode::CONFLICT,
            "duplicate",
            format!("Already Exists: Job {project}:{LOCATION}.{job_id}"),
        );
    }
    let config = &body["configuration"]["query"];
    let sql = config["query"].as_str().unwrap_or_default();
    let output = run_sql(&w, sql, default_dataset_of(config).as_deref());
    let job = StubJob {
        output,
        polls_left: w.pending_polls,
        cancelled: false,
        location: w.job_location(),
    };
    let response = job_json(&project, &job_id, &job);
    w.jobs.insert(job_id, job);
    ok(response)
}

async fn get_job(
    State(state): State<StubState>,
    Path((project, job_id)): Path<(String, String)>,
) -> Response {
    let mut w = state.lock();
    let Some(job) = w.jobs.get_mut(&job_id) else {
        return not_found(format!("Job {project}:{LOCATION}.{job_id}"));
    };
    let response = job_json(&project, &job_id, job);
    job.polls_left = job.polls_left.saturating_sub(1);
    ok(response)
}

async fn cancel_job(
    State(state): State<StubState>,
    Path((project, job_id)): Path<(String, String)>,
) -> Response {
    let mut w = state.lock();
    let Some(job) = w.jobs.get_mut(&job_id) else {
        return not_found(format!("Job {project}:{LOCATION}.{job_id}"));
    };
    job.cancelled = true;
    job.polls_left = 0;
    ok(json!({"kind": "bigquery#jobCancelResponse", "job": job_json(&project, &job_id, job)}))
}
