#![forbid(unsafe_code)]

use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::State,
    http::StatusCode,
    response::Redirect,
    routing::{get, post},
    Form, Json, Router,
};
use ehr_adapter::{
    status_code_for, AdapterConfig, AdapterHealthResponse, AdapterRuntime, CreateEhrForm,
    CreatePatientForm, FileUploadForm, GetEhrForm, OperationAdapterRequest,
    OperationAdapterResponse, UpdateEhrForm,
};
use ehr_kernel_contracts::RecordError;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

type SharedRuntime = Arc<AdapterRuntime>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AdapterConfig::from_env();
    init_tracing(config.log_json);
    let addr: SocketAddr = config.bind.parse()?;

    let runtime: SharedRuntime = Arc::new(AdapterRuntime::from_config(&config)?);
    // GET on the form routes reads the query string, so an unsubmitted page load is harmless.
    let app = Router::new()
        .route("/", get(|| async { Redirect::temporary("/createEHR") }))
        .route("/healthz", get(healthz))
        .route("/v1/operations", post(run_operation))
        .route("/createPatient", get(create_patient).post(create_patient))
        .route("/createEHR", get(create_ehr).post(create_ehr))
        .route("/getEHR", get(get_ehr).post(get_ehr))
        .route("/updateEHR", get(update_ehr).post(update_ehr))
        .route(
            "/updateFileUploads",
            get(update_file_uploads).post(update_file_uploads),
        )
        .with_state(runtime);

    info!(%addr, schema = %config.schema, "ehr_adapter_http listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
    }
}

fn respond(
    result: Result<OperationAdapterResponse, RecordError>,
) -> (StatusCode, Json<OperationAdapterResponse>) {
    match result {
        Ok(response) => (StatusCode::OK, Json(response)),
        Err(err) => {
            let status = StatusCode::from_u16(status_code_for(err.kind()))
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(OperationAdapterResponse::rejected(&err)))
        }
    }
}

async fn healthz(
    State(runtime): State<SharedRuntime>,
) -> (StatusCode, Json<AdapterHealthResponse>) {
    match runtime.health_report() {
        Ok(response) => (StatusCode::OK, Json(response)),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(AdapterHealthResponse {
                status: "error".to_string(),
                outcome: "UNHEALTHY".to_string(),
                reason: Some(err.to_string()),
                schema: runtime.schema().to_string(),
                committed_keys: 0,
            }),
        ),
    }
}

async fn run_operation(
    State(runtime): State<SharedRuntime>,
    Json(request): Json<OperationAdapterRequest>,
) -> (StatusCode, Json<OperationAdapterResponse>) {
    respond(runtime.run_operation(request))
}

async fn create_patient(
    State(runtime): State<SharedRuntime>,
    Form(form): Form<CreatePatientForm>,
) -> (StatusCode, Json<OperationAdapterResponse>) {
    respond(runtime.run_form(form))
}

async fn create_ehr(
    State(runtime): State<SharedRuntime>,
    Form(form): Form<CreateEhrForm>,
) -> (StatusCode, Json<OperationAdapterResponse>) {
    respond(runtime.run_form(form))
}

async fn get_ehr(
    State(runtime): State<SharedRuntime>,
    Form(form): Form<GetEhrForm>,
) -> (StatusCode, Json<OperationAdapterResponse>) {
    respond(runtime.run_form(form))
}

async fn update_ehr(
    State(runtime): State<SharedRuntime>,
    Form(form): Form<UpdateEhrForm>,
) -> (StatusCode, Json<OperationAdapterResponse>) {
    respond(runtime.run_form(form))
}

async fn update_file_uploads(
    State(runtime): State<SharedRuntime>,
    Form(form): Form<FileUploadForm>,
) -> (StatusCode, Json<OperationAdapterResponse>) {
    respond(runtime.run_form(form))
}
