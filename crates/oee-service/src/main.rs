use std::net::SocketAddr;

use anyhow::Result;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection, StringRejection};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use oee_api::{
    BatchReport, LatestMetrics, OeeApi, RangeQuery, RangeSummary, API_CONTRACT_VERSION,
};
use oee_core::{NewProductionRecord, OeeError, ProductionRecord, RecordId};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const EXPORT_FILE_NAME: &str = "oee_records.csv";

#[derive(Debug, Clone)]
struct ServiceState {
    api: OeeApi,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    #[serde(skip)]
    status: StatusCode,
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone, Deserialize)]
struct SampleRequest {
    count: u32,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    record_count: usize,
}

#[derive(Debug, Parser)]
#[command(name = "oee-service")]
#[command(about = "HTTP service for OEE production records")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
    /// Insert this many generated records (1-100) before serving.
    #[arg(long)]
    seed_sample: Option<u32>,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl ServiceError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            service_contract_version: SERVICE_CONTRACT_VERSION,
            error: message.into(),
        }
    }
}

impl From<OeeError> for ServiceError {
    fn from(err: OeeError) -> Self {
        let status = match err {
            OeeError::Validation(_) => StatusCode::BAD_REQUEST,
            OeeError::NotFound(_) => StatusCode::NOT_FOUND,
        };
        Self {
            status,
            service_contract_version: SERVICE_CONTRACT_VERSION,
            error: err.message().to_string(),
        }
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn csv_response(body: String, file_name: &str) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{file_name}\"")),
        ],
        body,
    )
        .into_response()
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/oee-records", get(list_records).post(create_record))
        .route("/oee-records/latest", get(latest_record))
        .route("/oee-records/latest/metrics", get(latest_metrics))
        .route("/oee-records/summary", get(summary))
        .route("/oee-records/csv", post(upload_csv))
        .route("/oee-records/sample", post(generate_sample))
        .route("/oee-records/export", get(export_csv))
        .route("/oee-records/template", get(csv_template))
        .route("/oee-records/:id", get(record_by_id))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,oee_service=info,oee_api=info")),
        )
        .init();

    let args = Args::parse();
    let state = ServiceState { api: OeeApi::new() };
    if let Some(count) = args.seed_sample {
        let report = state.api.generate_sample(count)?;
        tracing::info!(inserted = report.inserted, "seeded sample records");
    }

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!("OEE service listening on http://{}", args.bind);
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health(State(state): State<ServiceState>) -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok", record_count: state.api.record_count() }))
}

async fn create_record(
    State(state): State<ServiceState>,
    payload: Result<Json<NewProductionRecord>, JsonRejection>,
) -> Result<Json<ServiceEnvelope<ProductionRecord>>, ServiceError> {
    let Json(input) = payload.map_err(|rejection| {
        tracing::warn!(error = %rejection, "rejected production record body");
        ServiceError::bad_request(format!("invalid OEE record data: {}", rejection.body_text()))
    })?;
    let record = state.api.add_record(input)?;
    Ok(Json(envelope(record)))
}

fn range_query(query: Result<Query<RangeQuery>, QueryRejection>) -> Result<RangeQuery, ServiceError> {
    query
        .map(|Query(query)| query)
        .map_err(|rejection| {
            ServiceError::bad_request(format!(
                "invalid time range parameters: {}",
                rejection.body_text()
            ))
        })
}

async fn list_records(
    State(state): State<ServiceState>,
    query: Result<Query<RangeQuery>, QueryRejection>,
) -> Result<Json<ServiceEnvelope<Vec<ProductionRecord>>>, ServiceError> {
    let records = state.api.list_records(&range_query(query)?)?;
    Ok(Json(envelope(records)))
}

async fn latest_record(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<ProductionRecord>>, ServiceError> {
    let record = state.api.latest_record()?;
    Ok(Json(envelope(record)))
}

async fn latest_metrics(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<LatestMetrics>>, ServiceError> {
    let latest = state.api.latest_metrics()?;
    Ok(Json(envelope(latest)))
}

async fn summary(
    State(state): State<ServiceState>,
    query: Result<Query<RangeQuery>, QueryRejection>,
) -> Result<Json<ServiceEnvelope<RangeSummary>>, ServiceError> {
    let summary = state.api.summary(&range_query(query)?)?;
    Ok(Json(envelope(summary)))
}

async fn record_by_id(
    State(state): State<ServiceState>,
    id: Result<Path<u64>, PathRejection>,
) -> Result<Json<ServiceEnvelope<ProductionRecord>>, ServiceError> {
    let Path(id) = id.map_err(|rejection| {
        ServiceError::bad_request(format!("invalid record id: {}", rejection.body_text()))
    })?;
    let record = state.api.record(RecordId(id))?;
    Ok(Json(envelope(record)))
}

async fn upload_csv(
    State(state): State<ServiceState>,
    body: Result<String, StringRejection>,
) -> Result<Json<ServiceEnvelope<BatchReport>>, ServiceError> {
    let body = body.map_err(|rejection| {
        tracing::warn!(error = %rejection, "rejected CSV upload body");
        ServiceError::bad_request(format!("invalid CSV upload: {}", rejection.body_text()))
    })?;
    let report = state.api.ingest_csv(&body)?;
    Ok(Json(envelope(report)))
}

async fn generate_sample(
    State(state): State<ServiceState>,
    payload: Result<Json<SampleRequest>, JsonRejection>,
) -> Result<Json<ServiceEnvelope<BatchReport>>, ServiceError> {
    let Json(request) = payload.map_err(|rejection| {
        ServiceError::bad_request(format!("invalid sample request: {}", rejection.body_text()))
    })?;
    let report = state.api.generate_sample(request.count)?;
    Ok(Json(envelope(report)))
}

async fn export_csv(
    State(state): State<ServiceState>,
    query: Result<Query<RangeQuery>, QueryRejection>,
) -> Result<Response, ServiceError> {
    let body = state.api.export_csv(&range_query(query)?)?;
    Ok(csv_response(body, EXPORT_FILE_NAME))
}

async fn csv_template(State(state): State<ServiceState>) -> Response {
    csv_response(state.api.csv_template(), oee_api::csv::TEMPLATE_FILE_NAME)
}
