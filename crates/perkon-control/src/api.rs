//! Control-plane REST API routes (warp-based).

use crate::artifact::ArtifactError;
use crate::context::{AppContext, ControlError};
use crate::registry::RegistryError;
use perkon_core::alert::AlertSeverity;
use perkon_core::model::{InstanceId, InstanceInfo, ModelHealthTag, ModelInstance, ModelMetadata};
use perkon_core::FeatureVector;
use perkon_monitor::alerts::AlertError;
use perkon_serving::balancer::BalancerError;
use perkon_serving::optimizer::OptimizeError;
use perkon_serving::predictor::{HttpPredictor, PredictError};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

/// Shared control-plane state.
pub type SharedContext = Arc<AppContext>;

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterModelRequest {
    pub name: String,
    pub version: String,
    pub model_type: String,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub performance_metrics: FeatureVector,
    /// Remote serving endpoint. Absent means the artifact source resolves
    /// the handle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictRequest {
    pub features: FeatureVector,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchPredictRequest {
    pub inputs: Vec<FeatureVector>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateMetricsRequest {
    pub metrics: FeatureVector,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddInstanceRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub endpoint: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AcknowledgeRequest {
    pub acknowledged_by: String,
}

#[derive(Debug, Deserialize)]
pub struct AlertQuery {
    pub model: Option<String>,
    pub severity: Option<String>,
}

/// Build all control-plane API routes under `/api/v1/`, plus the
/// unauthenticated `/health` liveness probe.
pub fn control_routes(
    context: SharedContext,
    admin_key: Option<String>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let api = warp::path("api").and(warp::path("v1"));

    let register_model = api
        .and(warp::path("models"))
        .and(warp::path::end())
        .and(warp::post())
        .and(with_optional_auth(admin_key.clone()))
        .and(warp::body::json())
        .and(with_context(context.clone()))
        .and_then(handle_register_model);

    let list_models = api
        .and(warp::path("models"))
        .and(warp::path::end())
        .and(warp::get())
        .and(with_optional_auth(admin_key.clone()))
        .and(with_context(context.clone()))
        .and_then(handle_list_models);

    let get_model = api
        .and(warp::path("models"))
        .and(warp::path::param::<String>())
        .and(warp::path::end())
        .and(warp::get())
        .and(with_optional_auth(admin_key.clone()))
        .and(with_context(context.clone()))
        .and_then(handle_get_model);

    let unload_model = api
        .and(warp::path("models"))
        .and(warp::path::param::<String>())
        .and(warp::path::end())
        .and(warp::delete())
        .and(with_optional_auth(admin_key.clone()))
        .and(with_context(context.clone()))
        .and_then(handle_unload_model);

    let reload_model = api
        .and(warp::path("models"))
        .and(warp::path::param::<String>())
        .and(warp::path("reload"))
        .and(warp::path::end())
        .and(warp::post())
        .and(with_optional_auth(admin_key.clone()))
        .and(with_context(context.clone()))
        .and_then(handle_reload_model);

    let model_health = api
        .and(warp::path("models"))
        .and(warp::path::param::<String>())
        .and(warp::path("health"))
        .and(warp::path::end())
        .and(warp::get())
        .and(with_optional_auth(admin_key.clone()))
        .and(with_context(context.clone()))
        .and_then(handle_model_health);

    let update_metrics = api
        .and(warp::path("models"))
        .and(warp::path::param::<String>())
        .and(warp::path("metrics"))
        .and(warp::path::end())
        .and(warp::put())
        .and(with_optional_auth(admin_key.clone()))
        .and(warp::body::json())
        .and(with_context(context.clone()))
        .and_then(handle_update_metrics);

    // --- Serving endpoints ---

    let predict = api
        .and(warp::path("models"))
        .and(warp::path::param::<String>())
        .and(warp::path("predict"))
        .and(warp::path::end())
        .and(warp::post())
        .and(with_optional_auth(admin_key.clone()))
        .and(warp::body::json())
        .and(with_context(context.clone()))
        .and_then(handle_predict);

    let predict_batch = api
        .and(warp::path("models"))
        .and(warp::path::param::<String>())
        .and(warp::path("predict-batch"))
        .and(warp::path::end())
        .and(warp::post())
        .and(with_optional_auth(admin_key.clone()))
        .and(warp::body::json())
        .and(with_context(context.clone()))
        .and_then(handle_predict_batch);

    let job_status = api
        .and(warp::path("jobs"))
        .and(warp::path::param::<String>())
        .and(warp::path::end())
        .and(warp::get())
        .and(with_optional_auth(admin_key.clone()))
        .and(with_context(context.clone()))
        .and_then(handle_job_status);

    let cancel_job = api
        .and(warp::path("jobs"))
        .and(warp::path::param::<String>())
        .and(warp::path::end())
        .and(warp::delete())
        .and(with_optional_auth(admin_key.clone()))
        .and(with_context(context.clone()))
        .and_then(handle_cancel_job);

    let cache_stats = api
        .and(warp::path("cache"))
        .and(warp::path("stats"))
        .and(warp::path::end())
        .and(warp::get())
        .and(with_optional_auth(admin_key.clone()))
        .and(with_context(context.clone()))
        .and_then(handle_cache_stats);

    // --- Instance endpoints ---

    let list_instances = api
        .and(warp::path("models"))
        .and(warp::path::param::<String>())
        .and(warp::path("instances"))
        .and(warp::path::end())
        .and(warp::get())
        .and(with_optional_auth(admin_key.clone()))
        .and(with_context(context.clone()))
        .and_then(handle_list_instances);

    let add_instance = api
        .and(warp::path("models"))
        .and(warp::path::param::<String>())
        .and(warp::path("instances"))
        .and(warp::path::end())
        .and(warp::post())
        .and(with_optional_auth(admin_key.clone()))
        .and(warp::body::json())
        .and(with_context(context.clone()))
        .and_then(handle_add_instance);

    let remove_instance = api
        .and(warp::path("models"))
        .and(warp::path::param::<String>())
        .and(warp::path("instances"))
        .and(warp::path::param::<String>())
        .and(warp::path::end())
        .and(warp::delete())
        .and(with_optional_auth(admin_key.clone()))
        .and(with_context(context.clone()))
        .and_then(handle_remove_instance);

    let activate_instance = api
        .and(warp::path("models"))
        .and(warp::path::param::<String>())
        .and(warp::path("instances"))
        .and(warp::path::param::<String>())
        .and(warp::path("activate"))
        .and(warp::path::end())
        .and(warp::post())
        .and(with_optional_auth(admin_key.clone()))
        .and(with_context(context.clone()))
        .and_then(handle_activate_instance);

    // --- Alert endpoints ---

    let list_alerts = api
        .and(warp::path("alerts"))
        .and(warp::path::end())
        .and(warp::get())
        .and(with_optional_auth(admin_key.clone()))
        .and(warp::query::<AlertQuery>())
        .and(with_context(context.clone()))
        .and_then(handle_list_alerts);

    let acknowledge_alert = api
        .and(warp::path("alerts"))
        .and(warp::path::param::<String>())
        .and(warp::path("acknowledge"))
        .and(warp::path::end())
        .and(warp::post())
        .and(with_optional_auth(admin_key))
        .and(warp::body::json())
        .and(with_context(context.clone()))
        .and_then(handle_acknowledge_alert);

    // --- Liveness probe, intentionally unauthenticated ---

    let liveness = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_context(context))
        .and_then(handle_liveness);

    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
        .allow_headers(vec!["content-type", "x-api-key", "authorization"]);

    // Group routes to avoid warp recursive type overflow
    let model_routes = register_model
        .or(list_models)
        .or(get_model)
        .or(unload_model)
        .or(reload_model)
        .or(model_health)
        .or(update_metrics)
        .boxed();

    let serving_routes = predict
        .or(predict_batch)
        .or(job_status)
        .or(cancel_job)
        .or(cache_stats)
        .boxed();

    let instance_routes = list_instances
        .or(add_instance)
        .or(remove_instance)
        .or(activate_instance)
        .boxed();

    let alert_routes = list_alerts.or(acknowledge_alert).boxed();

    model_routes
        .or(serving_routes)
        .or(instance_routes)
        .or(alert_routes)
        .or(liveness)
        .with(cors)
}

// =============================================================================
// Filters
// =============================================================================

fn with_context(
    context: SharedContext,
) -> impl Filter<Extract = (SharedContext,), Error = Infallible> + Clone {
    warp::any().map(move || context.clone())
}

fn with_optional_auth(
    admin_key: Option<String>,
) -> impl Filter<Extract = ((),), Error = Rejection> + Clone {
    let key = admin_key.clone();
    warp::any()
        .and(warp::header::optional::<String>("x-api-key"))
        .and_then(move |provided: Option<String>| {
            let key = key.clone();
            async move {
                match &key {
                    None => Ok::<(), Rejection>(()), // no auth required
                    Some(expected) => match provided {
                        Some(ref p) if p == expected => Ok(()),
                        _ => Err(warp::reject::custom(Unauthorized)),
                    },
                }
            }
        })
}

#[derive(Debug)]
struct Unauthorized;
impl warp::reject::Reject for Unauthorized {}

// =============================================================================
// Handlers
// =============================================================================

async fn handle_register_model(
    _auth: (),
    body: RegisterModelRequest,
    context: SharedContext,
) -> Result<impl Reply, Infallible> {
    let mut metadata =
        ModelMetadata::new(&body.name, &body.version, &body.model_type, body.features);
    metadata.performance_metrics = body.performance_metrics;

    let result = match &body.endpoint {
        Some(endpoint) => match HttpPredictor::new(endpoint) {
            Ok(predictor) => context.registry.register(metadata, Arc::new(predictor)),
            Err(e) => {
                return Ok(error_response(
                    StatusCode::BAD_REQUEST,
                    &format!("Invalid endpoint: {}", e),
                ))
            }
        },
        None => context.registry.register_from_source(metadata).await,
    };

    match result {
        Ok(metadata) => Ok(
            warp::reply::with_status(warp::reply::json(&metadata), StatusCode::CREATED)
                .into_response(),
        ),
        Err(e) => Ok(control_error_response(e.into())),
    }
}

async fn handle_list_models(
    _auth: (),
    context: SharedContext,
) -> Result<impl Reply, Infallible> {
    let models = context.registry.list().await;
    let resp = serde_json::json!({
        "models": models,
        "total": models.len(),
    });
    Ok(warp::reply::with_status(warp::reply::json(&resp), StatusCode::OK).into_response())
}

async fn handle_get_model(
    name: String,
    _auth: (),
    context: SharedContext,
) -> Result<impl Reply, Infallible> {
    match context.registry.get_metadata(&name) {
        Some(metadata) => {
            let loaded = context.registry.is_loaded(&name).unwrap_or(false);
            let health = context
                .registry
                .health_tag(&name)
                .await
                .unwrap_or(ModelHealthTag::Unknown);
            let resp = serde_json::json!({
                "model": metadata,
                "loaded": loaded,
                "health": health,
            });
            Ok(warp::reply::with_status(warp::reply::json(&resp), StatusCode::OK).into_response())
        }
        None => Ok(error_response(StatusCode::NOT_FOUND, "Model not found")),
    }
}

async fn handle_unload_model(
    name: String,
    _auth: (),
    context: SharedContext,
) -> Result<impl Reply, Infallible> {
    match context.registry.unload(&name) {
        Ok(()) => Ok(warp::reply::with_status(
            warp::reply::json(&serde_json::json!({"model": name, "unloaded": true})),
            StatusCode::OK,
        )
        .into_response()),
        Err(e) => Ok(control_error_response(e.into())),
    }
}

async fn handle_reload_model(
    name: String,
    _auth: (),
    context: SharedContext,
) -> Result<impl Reply, Infallible> {
    match context.registry.reload(&name).await {
        Ok(metadata) => {
            Ok(warp::reply::with_status(warp::reply::json(&metadata), StatusCode::OK)
                .into_response())
        }
        Err(e) => Ok(control_error_response(e.into())),
    }
}

async fn handle_model_health(
    name: String,
    _auth: (),
    context: SharedContext,
) -> Result<impl Reply, Infallible> {
    match context.model_health(&name).await {
        Ok(report) => {
            Ok(warp::reply::with_status(warp::reply::json(&report), StatusCode::OK)
                .into_response())
        }
        Err(e) => Ok(control_error_response(e)),
    }
}

async fn handle_update_metrics(
    name: String,
    _auth: (),
    body: UpdateMetricsRequest,
    context: SharedContext,
) -> Result<impl Reply, Infallible> {
    match context.registry.update_metrics(&name, &body.metrics) {
        Ok(metadata) => {
            Ok(warp::reply::with_status(warp::reply::json(&metadata), StatusCode::OK)
                .into_response())
        }
        Err(e) => Ok(control_error_response(e.into())),
    }
}

async fn handle_predict(
    name: String,
    _auth: (),
    body: PredictRequest,
    context: SharedContext,
) -> Result<impl Reply, Infallible> {
    match context.predict(&name, body.features).await {
        Ok(response) => {
            Ok(warp::reply::with_status(warp::reply::json(&response), StatusCode::OK)
                .into_response())
        }
        Err(e) => Ok(control_error_response(e)),
    }
}

async fn handle_predict_batch(
    name: String,
    _auth: (),
    body: BatchPredictRequest,
    context: SharedContext,
) -> Result<impl Reply, Infallible> {
    if body.inputs.is_empty() {
        return Ok(error_response(
            StatusCode::BAD_REQUEST,
            "Batch must contain at least one input",
        ));
    }
    match context.predict_batch(&name, body.inputs).await {
        Ok(response) => {
            Ok(warp::reply::with_status(warp::reply::json(&response), StatusCode::OK)
                .into_response())
        }
        Err(e) => Ok(control_error_response(e)),
    }
}

async fn handle_job_status(
    job_id: String,
    _auth: (),
    context: SharedContext,
) -> Result<impl Reply, Infallible> {
    match context.batch.job_status(&job_id) {
        Some(status) => Ok(warp::reply::with_status(
            warp::reply::json(&serde_json::json!({"job_id": job_id, "status": status})),
            StatusCode::OK,
        )
        .into_response()),
        None => Ok(error_response(StatusCode::NOT_FOUND, "Job not found")),
    }
}

async fn handle_cancel_job(
    job_id: String,
    _auth: (),
    context: SharedContext,
) -> Result<impl Reply, Infallible> {
    if context.batch.job_status(&job_id).is_none() {
        return Ok(error_response(StatusCode::NOT_FOUND, "Job not found"));
    }
    if context.batch.cancel(&job_id) {
        Ok(warp::reply::with_status(
            warp::reply::json(&serde_json::json!({"job_id": job_id, "cancelled": true})),
            StatusCode::OK,
        )
        .into_response())
    } else {
        Ok(error_response(
            StatusCode::CONFLICT,
            "Job already finished",
        ))
    }
}

async fn handle_cache_stats(
    _auth: (),
    context: SharedContext,
) -> Result<impl Reply, Infallible> {
    let resp = serde_json::json!({
        "cache": context.cache.stats(),
        "batch": context.batch.stats(),
    });
    Ok(warp::reply::with_status(warp::reply::json(&resp), StatusCode::OK).into_response())
}

async fn handle_list_instances(
    name: String,
    _auth: (),
    context: SharedContext,
) -> Result<impl Reply, Infallible> {
    if !context.registry.contains(&name) {
        return Ok(error_response(StatusCode::NOT_FOUND, "Model not found"));
    }
    let instances: Vec<InstanceInfo> = context.balancer.instances(&name);
    let resp = serde_json::json!({
        "instances": instances,
        "active": context.balancer.active_count(&name),
        "total": instances.len(),
    });
    Ok(warp::reply::with_status(warp::reply::json(&resp), StatusCode::OK).into_response())
}

async fn handle_add_instance(
    name: String,
    _auth: (),
    body: AddInstanceRequest,
    context: SharedContext,
) -> Result<impl Reply, Infallible> {
    if !context.registry.contains(&name) {
        return Ok(error_response(StatusCode::NOT_FOUND, "Model not found"));
    }
    let id = body
        .id
        .map(InstanceId)
        .unwrap_or_else(InstanceId::generate);
    let instance = ModelInstance::new(id, &body.endpoint, body.weight);
    let info = InstanceInfo::from(&instance);
    context.balancer.add_instance(&name, instance);
    Ok(warp::reply::with_status(warp::reply::json(&info), StatusCode::CREATED).into_response())
}

async fn handle_remove_instance(
    name: String,
    instance_id: String,
    _auth: (),
    context: SharedContext,
) -> Result<impl Reply, Infallible> {
    match context
        .balancer
        .remove_instance(&name, &InstanceId(instance_id))
    {
        Ok(()) => Ok(warp::reply::with_status(
            warp::reply::json(&serde_json::json!({"removed": true})),
            StatusCode::OK,
        )
        .into_response()),
        Err(e) => Ok(balancer_error_response(e)),
    }
}

async fn handle_activate_instance(
    name: String,
    instance_id: String,
    _auth: (),
    context: SharedContext,
) -> Result<impl Reply, Infallible> {
    match context.balancer.activate(&name, &InstanceId(instance_id)) {
        Ok(()) => Ok(warp::reply::with_status(
            warp::reply::json(&serde_json::json!({"active": true})),
            StatusCode::OK,
        )
        .into_response()),
        Err(e) => Ok(balancer_error_response(e)),
    }
}

async fn handle_list_alerts(
    _auth: (),
    query: AlertQuery,
    context: SharedContext,
) -> Result<impl Reply, Infallible> {
    let severity = match query.severity.as_deref() {
        Some(raw) => match raw.parse::<AlertSeverity>() {
            Ok(severity) => Some(severity),
            Err(e) => return Ok(error_response(StatusCode::BAD_REQUEST, &e)),
        },
        None => None,
    };
    let alerts = context.alerts.active(query.model.as_deref(), severity);
    let resp = serde_json::json!({
        "alerts": alerts,
        "total": alerts.len(),
    });
    Ok(warp::reply::with_status(warp::reply::json(&resp), StatusCode::OK).into_response())
}

async fn handle_acknowledge_alert(
    alert_id: String,
    _auth: (),
    body: AcknowledgeRequest,
    context: SharedContext,
) -> Result<impl Reply, Infallible> {
    match context.alerts.acknowledge(&alert_id, &body.acknowledged_by) {
        Ok(alert) => {
            Ok(warp::reply::with_status(warp::reply::json(&alert), StatusCode::OK).into_response())
        }
        Err(e) => Ok(control_error_response(e.into())),
    }
}

async fn handle_liveness(context: SharedContext) -> Result<impl Reply, Infallible> {
    let resp = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": context.uptime_secs(),
        "models": context.registry.names().len(),
        "active_alerts": context.alerts.active_count(),
    });
    Ok(warp::reply::with_status(warp::reply::json(&resp), StatusCode::OK).into_response())
}

// =============================================================================
// Error handling
// =============================================================================

#[derive(Debug, Serialize)]
struct ApiError {
    error: String,
    code: String,
}

fn error_response(status: StatusCode, message: &str) -> warp::reply::Response {
    let body = ApiError {
        error: message.to_string(),
        code: status.as_str().to_string(),
    };
    warp::reply::with_status(warp::reply::json(&body), status).into_response()
}

fn control_error_response(err: ControlError) -> warp::reply::Response {
    let (status, code) = match &err {
        ControlError::Registry(e) => match e {
            RegistryError::RegistrationRejected { .. } => {
                (StatusCode::BAD_REQUEST, "registration_rejected")
            }
            RegistryError::UnknownModel(_) => (StatusCode::NOT_FOUND, "unknown_model"),
            RegistryError::ModelUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "model_unavailable")
            }
            RegistryError::Artifact(ArtifactError::NotFound { .. }) => {
                (StatusCode::NOT_FOUND, "artifact_not_found")
            }
            RegistryError::Artifact(ArtifactError::Unavailable(_)) => {
                (StatusCode::BAD_GATEWAY, "artifact_unavailable")
            }
            RegistryError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store_error"),
        },
        ControlError::Optimize(e) => match e {
            OptimizeError::NoActiveInstances(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "no_active_instances")
            }
            OptimizeError::Predict(p) => match p {
                PredictError::Unavailable(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "model_unavailable")
                }
                PredictError::Backend(_) => (StatusCode::BAD_GATEWAY, "backend_error"),
                PredictError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "prediction_timeout"),
                PredictError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
            },
        },
        ControlError::Alert(e) => match e {
            AlertError::NotFound(_) => (StatusCode::NOT_FOUND, "alert_not_found"),
            AlertError::AlreadyAcknowledged(_) => (StatusCode::CONFLICT, "already_acknowledged"),
            AlertError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store_error"),
        },
    };
    let body = ApiError {
        error: err.to_string(),
        code: code.to_string(),
    };
    warp::reply::with_status(warp::reply::json(&body), status).into_response()
}

fn balancer_error_response(err: BalancerError) -> warp::reply::Response {
    let (status, code) = match &err {
        BalancerError::UnknownModel(_) => (StatusCode::NOT_FOUND, "unknown_model"),
        BalancerError::UnknownInstance(_, _) => (StatusCode::NOT_FOUND, "unknown_instance"),
        BalancerError::NoActiveInstances(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, "no_active_instances")
        }
    };
    let body = ApiError {
        error: err.to_string(),
        code: code.to_string(),
    };
    warp::reply::with_status(warp::reply::json(&body), status).into_response()
}

/// Handle warp rejections with specific HTTP status codes and messages.
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    if err.find::<Unauthorized>().is_some() {
        Ok(error_response(
            StatusCode::UNAUTHORIZED,
            "Invalid or missing API key",
        ))
    } else if err.find::<warp::reject::MissingHeader>().is_some() {
        Ok(error_response(
            StatusCode::UNAUTHORIZED,
            "Missing API key header",
        ))
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        Ok(error_response(
            StatusCode::BAD_REQUEST,
            &format!("Invalid request body: {}", e),
        ))
    } else if err.find::<warp::reject::InvalidQuery>().is_some() {
        Ok(error_response(
            StatusCode::BAD_REQUEST,
            "Invalid query parameters",
        ))
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        Ok(error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            "Request payload too large",
        ))
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        Ok(error_response(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Unsupported media type",
        ))
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        Ok(error_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "Method not allowed",
        ))
    } else if err.is_not_found() {
        Ok(error_response(StatusCode::NOT_FOUND, "Not found"))
    } else {
        tracing::error!("Unhandled rejection: {:?}", err);
        Ok(error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error",
        ))
    }
}
