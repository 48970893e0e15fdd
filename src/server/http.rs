// src/server/http.rs

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::error;
use serde::{Deserialize, Serialize};
use warp::filters::body::BodyDeserializeError;
use warp::filters::cors::CorsForbidden;
use warp::http::StatusCode;
use warp::reply::{self, Response};
use warp::{Filter, Rejection, Reply};

use crate::server::error::StoreError;
use crate::server::rate_limit::RateLimiter;
use crate::server::store::{PayloadKind, SessionStore};

const MAX_BODY_BYTES: u64 = 64 * 1024;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRequest {
    #[serde(rename = "type")]
    kind: Option<String>,
    content: Option<String>,
    ttl_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateResponse {
    pin: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct PinRequest {
    pin: Option<String>,
}

#[derive(Debug, Serialize)]
struct FetchResponse {
    #[serde(rename = "type")]
    kind: PayloadKind,
    content: String,
}

#[derive(Debug)]
struct RateLimited {
    retry_after_secs: u64,
}

impl warp::reject::Reject for RateLimited {}

pub fn routes(
    store: Arc<SessionStore>,
    limiter: Arc<RateLimiter>,
    cors_origin: String,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let store_filter = warp::any().map(move || store.clone());
    let limit = rate_limit(limiter);

    let health = warp::path!("api" / "health")
        .and(warp::get())
        .and(limit.clone())
        .and(store_filter.clone())
        .map(health_check);

    let create = warp::path!("api" / "create")
        .and(warp::post())
        .and(limit.clone())
        .and(json_body::<CreateRequest>())
        .and(store_filter.clone())
        .map(create_session);

    let fetch = warp::path!("api" / "fetch")
        .and(warp::post())
        .and(limit.clone())
        .and(json_body::<PinRequest>())
        .and(store_filter.clone())
        .map(fetch_session);

    let delete = warp::path!("api" / "delete")
        .and(warp::post())
        .and(limit)
        .and(json_body::<PinRequest>())
        .and(store_filter)
        .map(delete_session);

    health
        .or(create)
        .or(fetch)
        .or(delete)
        .with(cors(&cors_origin))
        .recover(handle_rejection)
        .with(warp::log("microsync::http"))
}

fn cors(origin: &str) -> warp::cors::Builder {
    let builder = warp::cors()
        .allow_methods(vec!["GET", "POST", "OPTIONS"])
        .allow_header("content-type");

    if origin == "*" {
        builder.allow_any_origin()
    } else {
        builder.allow_origin(origin).allow_credentials(true)
    }
}

fn json_body<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: for<'de> Deserialize<'de> + Send,
{
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

// Unknown remote addresses are not limited.
fn rate_limit(limiter: Arc<RateLimiter>) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::addr::remote()
        .and_then(move |remote: Option<SocketAddr>| {
            let limiter = limiter.clone();
            async move {
                match remote {
                    Some(addr) => limiter
                        .check(addr.ip())
                        .map_err(|retry_after_secs| warp::reject::custom(RateLimited { retry_after_secs })),
                    None => Ok(()),
                }
            }
        })
        .untuple_one()
}

fn health_check(store: Arc<SessionStore>) -> Response {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    reply::json(&serde_json::json!({
        "status": "ok",
        "timestamp": timestamp,
        "sessions": store.len(),
    }))
    .into_response()
}

fn create_session(req: CreateRequest, store: Arc<SessionStore>) -> Response {
    let result = match (req.kind, req.content) {
        (Some(kind), Some(content)) => kind
            .parse::<PayloadKind>()
            .and_then(|kind| store.create(kind, content, req.ttl_seconds)),
        _ => Err(StoreError::invalid("type and content are required")),
    };

    match result {
        Ok(created) => reply::json(&CreateResponse {
            pin: created.pin,
            expires_in: created.expires_in,
        })
        .into_response(),
        Err(e) => store_error(e, "creating session"),
    }
}

fn fetch_session(req: PinRequest, store: Arc<SessionStore>) -> Response {
    let pin = req.pin.unwrap_or_default();

    match store.fetch(pin.trim()) {
        Ok(payload) => reply::json(&FetchResponse {
            kind: payload.kind,
            content: payload.content,
        })
        .into_response(),
        Err(e) => store_error(e, "fetching session"),
    }
}

fn delete_session(req: PinRequest, store: Arc<SessionStore>) -> Response {
    let pin = req.pin.unwrap_or_default();
    let pin = pin.trim();
    if pin.is_empty() {
        return error_body(StatusCode::BAD_REQUEST, "PIN is required");
    }

    store.delete(pin);
    reply::json(&serde_json::json!({ "message": "Session deleted successfully" })).into_response()
}

fn store_error(e: StoreError, action: &str) -> Response {
    if let StoreError::PinSpaceExhausted { .. } = e {
        error!("Error {action}: {e}");
    }
    error_body(e.status_code(), &e.to_string())
}

fn error_body(status: StatusCode, message: &str) -> Response {
    reply::with_status(reply::json(&serde_json::json!({ "error": message })), status).into_response()
}

async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    if err.is_not_found() {
        return Ok(error_body(StatusCode::NOT_FOUND, "Route not found"));
    }

    if let Some(limited) = err.find::<RateLimited>() {
        let body = reply::json(&serde_json::json!({
            "error": "Too many requests from this IP, please try again later.",
            "retryAfterSecs": limited.retry_after_secs,
        }));
        let body = reply::with_header(body, "retry-after", limited.retry_after_secs.to_string());
        return Ok(reply::with_status(body, StatusCode::TOO_MANY_REQUESTS).into_response());
    }

    let response = if let Some(e) = err.find::<BodyDeserializeError>() {
        error_body(StatusCode::BAD_REQUEST, &format!("Invalid request body: {e}"))
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        error_body(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large")
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        error_body(StatusCode::LENGTH_REQUIRED, "Content-Length required")
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        error_body(StatusCode::UNSUPPORTED_MEDIA_TYPE, "Expected application/json")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        error_body(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
    } else if let Some(e) = err.find::<CorsForbidden>() {
        error_body(StatusCode::FORBIDDEN, &e.to_string())
    } else {
        error!("Unhandled rejection: {err:?}");
        error_body(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    };

    Ok(response)
}
