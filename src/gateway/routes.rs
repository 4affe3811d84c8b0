//! `warp` filters for the gateway's HTTP surface

use super::billing::{self, BillingRequest, TierRequest};
use super::hardware::{ControlReceipt, ControlRequest};
use super::initiatives::{
    self, AwgScheduleRequest, ForecastRequest, FungalRequest, GeothermalRequest, NutrientRequest,
};
use super::projects::{project_listing, readiness_report};
use super::state::SharedState;
use super::validation::{DeploymentRequest, FirmwareRequest, IngestRequest, TokenRequest};
use crate::checklist::execute_all_initiatives;
use crate::dispatcher::DispatchAction;
use crate::error::{sanitize_error_message, ErrorBody, GatewayError};
use crate::forecasting::BulbTelemetry;
use crate::gateway::auth::{bearer_token, AuthError};
use crate::observability::metrics;
use crate::protocol::ControlCommand;
use crate::request_span;
use chrono::Utc;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::convert::Infallible;
use warp::http::StatusCode;
use warp::reply::{self, Json};
use warp::{Filter, Rejection, Reply};
use tracing::{debug, error, warn};

/// Largest JSON body accepted
pub const MAX_BODY_BYTES: u64 = 256 * 1024;

pub const DISPATCHER_NAME: &str = "ECOS";

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
    version: &'static str,
}

#[derive(Debug, Deserialize)]
struct DispatchRequest {
    action: String,
    #[serde(default)]
    params: Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct DispatchEnvelope<T> {
    dispatcher: &'static str,
    result: T,
}

#[derive(Debug, Default, Deserialize)]
struct VerifyRequest {
    #[serde(default)]
    token: Option<String>,
}

#[derive(Debug, Serialize)]
struct VerifyResponse {
    valid: bool,
    claims: super::auth::Claims,
}

/// Every route, with rejection handling, request spans and HTTP metrics
pub fn routes(state: SharedState) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    core_routes(state.clone())
        .or(initiative_routes())
        .unify()
        .or(dispatcher_routes(state.clone()))
        .unify()
        .or(platform_routes(state))
        .unify()
        .recover(handle_rejection)
        .with(warp::trace(|info| {
            request_span!(method = %info.method(), path = %info.path())
        }))
        .with(warp::log::custom(|info| {
            let success = !info.status().is_server_error();
            metrics().http_request_completed(info.elapsed(), success);
            debug!(
                method = %info.method(),
                path = %info.path(),
                status = info.status().as_u16(),
                elapsed_ms = info.elapsed().as_millis() as u64,
                "HTTP request completed"
            );
        }))
}

fn with_state(state: SharedState) -> impl Filter<Extract = (SharedState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn json_body<T: DeserializeOwned + Send>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

fn reject(error: impl Into<GatewayError>) -> Rejection {
    warp::reject::custom(error.into())
}

/// Health, projects, checklist, hardware and metrics
fn core_routes(state: SharedState) -> warp::filters::BoxedFilter<(Json,)> {
    let health = warp::path!("health").and(warp::get()).map(|| {
        reply::json(&HealthResponse {
            status: "operational",
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION"),
        })
    });

    let projects = warp::path!("projects")
        .and(warp::get())
        .map(|| reply::json(&project_listing(&execute_all_initiatives(None))));

    let readiness = warp::path!("api" / "checklist" / "readiness")
        .and(warp::get())
        .map(|| reply::json(&readiness_report(execute_all_initiatives(None))));

    let manifest = warp::path!("hardware" / "manifest")
        .and(warp::get())
        .and(with_state(state.clone()))
        .map(|state: SharedState| reply::json(&state.manifest));

    let profile = warp::path!("hardware" / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(hardware_profile);

    let control = warp::path!("hardware" / String / "control")
        .and(warp::post())
        .and(json_body::<ControlRequest>())
        .and(with_state(state))
        .and_then(hardware_control);

    let metrics_route = warp::path!("metrics")
        .and(warp::get())
        .map(|| reply::json(&metrics().get_metrics()));

    health
        .or(projects)
        .unify()
        .or(readiness)
        .unify()
        .or(manifest)
        .unify()
        .or(profile)
        .unify()
        .or(control)
        .unify()
        .or(metrics_route)
        .unify()
        .boxed()
}

async fn hardware_profile(project_code: String, state: SharedState) -> Result<Json, Rejection> {
    let profile = state.manifest.require_profile(&project_code).map_err(reject)?;
    Ok(reply::json(profile))
}

async fn hardware_control(
    project_code: String,
    request: ControlRequest,
    state: SharedState,
) -> Result<Json, Rejection> {
    request.validate().map_err(reject)?;
    let profile = state.manifest.require_profile(&project_code).map_err(reject)?;
    profile.check_action(&request.action).map_err(reject)?;

    let mqtt_enabled = state.mqtt_enabled();
    let published = match (&state.transport, mqtt_enabled) {
        (Some(transport), true) => {
            let command = ControlCommand::new(&request.action, request.params.clone());
            match transport
                .publish_control(&project_code, &request.device_id, &command)
                .await
            {
                Ok(()) => true,
                Err(e) => {
                    error!(
                        project_code = %project_code,
                        device_id = %request.device_id,
                        action = %request.action,
                        error = %e,
                        "Failed to publish control command"
                    );
                    false
                }
            }
        }
        _ => false,
    };

    Ok(reply::json(&ControlReceipt::accepted(
        profile,
        &request,
        mqtt_enabled,
        published,
    )))
}

/// Forecasting and optimisation endpoints, one per initiative
fn initiative_routes() -> warp::filters::BoxedFilter<(Json,)> {
    let hydro = warp::path!("api" / "hydro" / "forecast")
        .and(warp::post())
        .and(json_body::<ForecastRequest>())
        .and_then(|request: ForecastRequest| async move {
            initiatives::hydro_forecast(&request)
                .map(|result| reply::json(&result))
                .map_err(reject)
        });

    let solar = warp::path!("api" / "solar" / "forecast")
        .and(warp::post())
        .and(json_body::<ForecastRequest>())
        .and_then(|request: ForecastRequest| async move {
            initiatives::solar_forecast(&request)
                .map(|result| reply::json(&result))
                .map_err(reject)
        });

    let awg_forecast = warp::path!("api" / "awg" / "forecast")
        .and(warp::post())
        .and(json_body::<ForecastRequest>())
        .and_then(|request: ForecastRequest| async move {
            initiatives::awg_forecast(&request)
                .map(|result| reply::json(&result))
                .map_err(reject)
        });

    let awg_optimize = warp::path!("api" / "awg" / "optimize")
        .and(warp::post())
        .and(json_body::<AwgScheduleRequest>())
        .and_then(|request: AwgScheduleRequest| async move {
            // Branch and bound can run for a while; keep it off the async workers
            let outcome = tokio::task::spawn_blocking(move || initiatives::awg_optimize(&request))
                .await
                .map_err(|e| reject(GatewayError::internal(format!("AWG solver task failed: {e}"))))?;
            outcome.map(|result| reply::json(&result)).map_err(reject)
        });

    let bulb = warp::path!("api" / "bulb" / "predict")
        .and(warp::post())
        .and(json_body::<BulbTelemetry>())
        .map(|telemetry: BulbTelemetry| reply::json(&initiatives::bulb_predict(&telemetry)));

    let farm = warp::path!("api" / "farm" / "optimize")
        .and(warp::post())
        .and(json_body::<NutrientRequest>())
        .and_then(|request: NutrientRequest| async move {
            initiatives::farm_optimize(&request)
                .map(|result| reply::json(&result))
                .map_err(reject)
        });

    let geothermal = warp::path!("api" / "geothermal" / "optimize")
        .and(warp::post())
        .and(json_body::<GeothermalRequest>())
        .and_then(|request: GeothermalRequest| async move {
            initiatives::geothermal_optimize(&request)
                .map(|result| reply::json(&result))
                .map_err(reject)
        });

    let symbiosis = warp::path!("api" / "symbiosis" / "recommend")
        .and(warp::post())
        .and(json_body::<FungalRequest>())
        .map(|request: FungalRequest| reply::json(&initiatives::symbiosis_recommend(&request)));

    hydro
        .or(solar)
        .unify()
        .or(awg_forecast)
        .unify()
        .or(awg_optimize)
        .unify()
        .or(bulb)
        .unify()
        .or(farm)
        .unify()
        .or(geothermal)
        .unify()
        .or(symbiosis)
        .unify()
        .boxed()
}

/// Cross-project coordination
fn dispatcher_routes(state: SharedState) -> warp::filters::BoxedFilter<(Json,)> {
    let dispatch = warp::path!("api" / "dispatch")
        .and(warp::post())
        .and(json_body::<DispatchRequest>())
        .and(with_state(state.clone()))
        .and_then(|request: DispatchRequest, state: SharedState| async move {
            let action = DispatchAction::parse(&request.action, &request.params).map_err(reject)?;
            let result = state.dispatcher.dispatch(action);
            Ok::<_, Rejection>(reply::json(&DispatchEnvelope {
                dispatcher: DISPATCHER_NAME,
                result,
            }))
        });

    let status = warp::path!("api" / "dispatch" / "status")
        .and(warp::get())
        .and(with_state(state))
        .map(|state: SharedState| reply::json(&state.dispatcher.system_status()));

    dispatch.or(status).unify().boxed()
}

/// Connectivity, auth, billing, firmware, deployment and SaaS tiers
fn platform_routes(state: SharedState) -> warp::filters::BoxedFilter<(Json,)> {
    let ingest = warp::path!("api" / "iot" / "ingest")
        .and(warp::post())
        .and(json_body::<IngestRequest>())
        .and_then(|request: IngestRequest| async move {
            request
                .ingest_at(Utc::now())
                .map(|receipt| reply::json(&receipt))
                .map_err(reject)
        });

    let token = warp::path!("api" / "auth" / "token")
        .and(warp::post())
        .and(json_body::<TokenRequest>())
        .and(with_state(state.clone()))
        .and_then(|request: TokenRequest, state: SharedState| async move {
            request.validate().map_err(reject)?;
            let issued = state
                .signer
                .issue(
                    &request.user_id,
                    &request.email,
                    &request.role,
                    request.project_access.clone(),
                )
                .map_err(reject)?;
            Ok::<_, Rejection>(reply::json(&issued))
        });

    let verify = warp::path!("api" / "auth" / "verify")
        .and(warp::post())
        .and(warp::header::optional::<String>("authorization"))
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::bytes())
        .and(with_state(state.clone()))
        .and_then(verify_token);

    let billing_estimate = warp::path!("api" / "billing" / "estimate")
        .and(warp::post())
        .and(json_body::<BillingRequest>())
        .and_then(|request: BillingRequest| async move {
            billing::estimate(&request)
                .map(|estimate| reply::json(&estimate))
                .map_err(reject)
        });

    let firmware = warp::path!("api" / "firmware" / "flash")
        .and(warp::post())
        .and(json_body::<FirmwareRequest>())
        .and_then(|request: FirmwareRequest| async move {
            request
                .queue()
                .map(|receipt| reply::json(&receipt))
                .map_err(reject)
        });

    let deployment = warp::path!("api" / "deployment" / "status")
        .and(warp::post())
        .and(json_body::<DeploymentRequest>())
        .and_then(|request: DeploymentRequest| async move {
            request
                .status()
                .map(|status| reply::json(&status))
                .map_err(reject)
        });

    let saas = warp::path!("api" / "saas" / "tier")
        .and(warp::post())
        .and(json_body::<TierRequest>())
        .and(with_state(state))
        .and_then(|request: TierRequest, state: SharedState| async move {
            state
                .tiers
                .describe(&request.tier)
                .map(|description| reply::json(&description))
                .map_err(reject)
        });

    ingest
        .or(token)
        .unify()
        .or(verify)
        .unify()
        .or(billing_estimate)
        .unify()
        .or(firmware)
        .unify()
        .or(deployment)
        .unify()
        .or(saas)
        .unify()
        .boxed()
}

/// Token from the JSON body when present, otherwise the bearer header
async fn verify_token(
    authorization: Option<String>,
    body: bytes::Bytes,
    state: SharedState,
) -> Result<Json, Rejection> {
    let request: VerifyRequest = if body.is_empty() {
        VerifyRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| reject(GatewayError::invalid_input(format!("Invalid JSON body: {e}"))))?
    };

    let token = match request.token {
        Some(token) => token,
        None => authorization
            .as_deref()
            .map(bearer_token)
            .unwrap_or(Err(AuthError::MissingHeader))
            .map_err(reject)?
            .to_string(),
    };

    let claims = state.signer.verify(&token).map_err(|e| {
        warn!(error = %e, "Token verification failed");
        reject(e)
    })?;
    Ok(reply::json(&VerifyResponse {
        valid: true,
        claims,
    }))
}

/// Turn every rejection into a `{"detail": ...}` body
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, detail) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not Found".to_string())
    } else if let Some(e) = err.find::<GatewayError>() {
        let status = e.status_code();
        if status.is_server_error() {
            error!(error = %e, "Request failed");
        }
        (status, e.to_error_body().detail)
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (
            StatusCode::BAD_REQUEST,
            sanitize_error_message(&e.to_string()),
        )
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            "Request body too large".to_string(),
        )
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Expected a JSON body".to_string(),
        )
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        (
            StatusCode::LENGTH_REQUIRED,
            "Content-Length required".to_string(),
        )
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            "Method Not Allowed".to_string(),
        )
    } else {
        error!(rejection = ?err, "Unhandled rejection");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_string(),
        )
    };

    Ok(reply::with_status(reply::json(&ErrorBody { detail }), status))
}
