//! Route handlers.
//!
//! Every handler goes through [`handle`]: the body is opened if the request
//! carries `x-cypress-encrypted`, the request is recorded, and the reply is
//! sealed with the request's key. Scripted failures from
//! [`StubState::fail_next`] are answered in the clear.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{OriginalUri, Path, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use runrecord::HEADER_ENCRYPTED;
use runrecord::envelope::{DevEnvelopeCodec, SessionKey};
use serde_json::{Value, json};
use tracing::debug;

use crate::{RecordedRequest, StubState};

/// A request after its envelope was opened.
struct Incoming {
    body: Value,
    key: Option<SessionKey>,
    bearer: Option<String>,
}

type Reply = Result<Value, (StatusCode, Value)>;

fn handle(
    stub: &StubState,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    bytes: &[u8],
    reply: impl FnOnce(&Incoming) -> Reply,
) -> Response {
    let path = uri.path().to_string();
    let raw = parse_body(bytes);
    let encrypted = headers.contains_key(HEADER_ENCRYPTED);

    let (key, body) = if encrypted {
        match DevEnvelopeCodec.open_request(&raw) {
            Ok((key, body)) => (Some(key), body),
            Err(e) => {
                debug!(path, error = %e, "rejecting unreadable envelope");
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "message": e.to_string() })),
                )
                    .into_response();
            }
        }
    } else {
        (None, raw)
    };

    stub.record(RecordedRequest {
        method: method.to_string(),
        path: path.clone(),
        headers: headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect(),
        body: body.clone(),
        encrypted,
    });

    if let Some(status) = stub.take_failure(&path) {
        debug!(path, status, "answering with scripted failure");
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (status, Json(json!({ "message": "scripted failure" }))).into_response();
    }

    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|token| !token.trim().is_empty())
        .map(str::to_string);

    let incoming = Incoming { body, key, bearer };
    let (status, body) = match reply(&incoming) {
        Ok(body) => (StatusCode::OK, body),
        Err(failure) => failure,
    };

    match &incoming.key {
        Some(key) => {
            let sealed = DevEnvelopeCodec.seal_with(&body, key);
            (status, [(HEADER_ENCRYPTED, "1")], Json(sealed)).into_response()
        }
        None => (status, Json(body)).into_response(),
    }
}

fn parse_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

fn unauthorized() -> (StatusCode, Value) {
    (
        StatusCode::UNAUTHORIZED,
        json!({ "code": "UNAUTHORIZED", "message": "missing bearer token" }),
    )
}

/// GET /ping
pub async fn ping(
    State(stub): State<StubState>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle(&stub, &method, &uri, &headers, &body, |_| Ok(json!({})))
}

/// GET /auth: Dashboard URLs pointing back at the stub.
pub async fn auth(
    State(stub): State<StubState>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let urls = json!({
        "dashboardAuthUrl": format!("{}/login", stub.settings.origin),
        "dashboardLogoutUrl": format!("{}logout", stub.api_url()),
    });
    handle(&stub, &method, &uri, &headers, &body, |_| Ok(urls))
}

/// POST /preflight: Requires an encrypted request.
pub async fn preflight(
    State(stub): State<StubState>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let settings = stub.settings.clone();
    let api_url = settings.api_url.clone().unwrap_or_else(|| stub.api_url());
    handle(&stub, &method, &uri, &headers, &body, |req| {
        if req.key.is_none() {
            return Err((
                StatusCode::BAD_REQUEST,
                json!({ "message": "preflight must be encrypted" }),
            ));
        }
        let mut response = json!({ "encrypt": settings.encrypt, "apiUrl": api_url });
        if !settings.preflight_warnings.is_empty() {
            response["warnings"] = Value::Array(settings.preflight_warnings.clone());
        }
        Ok(response)
    })
}

/// POST /runs
pub async fn create_run(
    State(stub): State<StubState>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let origin = stub.settings.origin.clone();
    handle(&stub, &method, &uri, &headers, &body, |req| {
        if !req.body["projectId"].is_string() {
            return Err((
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "code": "MISSING_PROJECT_ID", "message": "projectId is required" }),
            ));
        }
        let id = stub.next_id();
        Ok(json!({
            "runId": format!("run-{id}"),
            "runUrl": format!("{origin}/runs/{id}"),
            "groupId": req.body.get("group").cloned().unwrap_or_else(|| json!("default")),
            "machineId": format!("machine-{id}"),
            "warnings": [],
        }))
    })
}

/// POST /runs/{run_id}/instances
pub async fn create_instance(
    State(stub): State<StubState>,
    Path(run_id): Path<String>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle(&stub, &method, &uri, &headers, &body, |req| {
        let id = stub.next_id();
        Ok(json!({
            "instanceId": format!("inst-{id}"),
            "runId": run_id,
            "spec": req.body.get("spec").cloned().unwrap_or(Value::Null),
        }))
    })
}

/// POST /instances/{instance_id}/tests
pub async fn instance_tests(
    State(stub): State<StubState>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle(&stub, &method, &uri, &headers, &body, |_| {
        Ok(json!({ "actions": [] }))
    })
}

/// PUT /instances/{instance_id}/stdout
pub async fn instance_stdout(
    State(stub): State<StubState>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle(&stub, &method, &uri, &headers, &body, |_| Ok(json!({})))
}

/// POST /instances/{instance_id}/results
pub async fn instance_results(
    State(stub): State<StubState>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle(&stub, &method, &uri, &headers, &body, |_| {
        Ok(json!({ "screenshotUploadUrls": [], "videoUploadUrl": null }))
    })
}

/// POST /exceptions: Requires a bearer token.
pub async fn exceptions(
    State(stub): State<StubState>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle(&stub, &method, &uri, &headers, &body, |req| match req.bearer {
        Some(_) => Ok(json!({})),
        None => Err(unauthorized()),
    })
}

/// POST /logout: 401 without a bearer token.
pub async fn logout(
    State(stub): State<StubState>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle(&stub, &method, &uri, &headers, &body, |req| match req.bearer {
        Some(_) => Ok(json!({})),
        None => Err(unauthorized()),
    })
}

/// GET /_stub/requests: Everything recorded so far.
pub async fn recorded_requests(State(stub): State<StubState>) -> Json<Vec<RecordedRequest>> {
    Json(stub.requests())
}
