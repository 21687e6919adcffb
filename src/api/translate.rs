#![forbid(unsafe_code)]

use std::borrow::Cow;
use std::sync::Arc;

use log::{error, info};
use poem::http::StatusCode;
use poem::web::{Data, Json};
use poem::{handler, Body, IntoResponse, Request, Response};
use serde_json::{Map, Value};

use crate::completion::forwarder::Forwarder;
use crate::utils::errors::HttpResult;
use crate::utils::server_utils::{self, RequestDebug};

// ***************************************************************************
//                          Request/Response Definiions
// ***************************************************************************
/// Per-process state shared by every call to the endpoint.  Nothing in it
/// changes after startup.
pub struct TranslateState {
    forwarder: Forwarder,
    request_property: String,
    response_property: String,
}

impl TranslateState {
    pub fn new(forwarder: Forwarder, request_property: String, response_property: String) -> Self {
        Self { forwarder, request_property, response_property }
    }
}

struct ReqTranslate<'a> {
    property: &'a str,
    text: &'a str,
}

// Implement the debug record trait for logging.
impl RequestDebug for ReqTranslate<'_> {
    fn get_request_info(&self) -> String {
        let mut s = String::with_capacity(64 + self.text.len());
        s.push_str("  Request body:");
        s.push_str("\n    ");
        s.push_str(self.property);
        s.push_str(": ");
        s.push_str(self.text);
        s
    }
}

// ------------------- HTTP Status Codes -------------------
fn make_http_200(property: &str, text: String) -> Response {
    let mut body = Map::new();
    body.insert(property.to_string(), Value::String(text));
    Json(Value::Object(body)).into_response()
}
fn make_http_400(msg: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(HttpResult::new(msg))).into_response()
}
fn make_http_500(msg: String) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(HttpResult::new(msg))).into_response()
}

// ***************************************************************************
//                                 Endpoint
// ***************************************************************************
// ---------------------------------------------------------------------------
// translate:
// ---------------------------------------------------------------------------
/** Validate the input field, forward it to the completion provider and wrap
 * the result.  Every failure is converted to a json error body here.
 */
#[handler]
pub async fn translate(http_req: &Request, body: Body, state: Data<&Arc<TranslateState>>) -> Response {
    let state = *state;
    let missing = || make_http_400(format!("No {} provided in request", state.request_property));

    // -------------------- Validate Input -------------------------
    let bytes = match body.into_bytes().await {
        Ok(b) => b,
        Err(e) => {
            error!("Unable to read request body: {}", e);
            return make_http_400("Unable to read request body".to_string());
        }
    };
    let json: Value = match serde_json::from_slice(&bytes) {
        Ok(v) => v,
        Err(_) => return make_http_400("Request body must be valid JSON".to_string()),
    };
    let text = match extract_input(&json, &state.request_property) {
        Some(t) => t,
        None => return missing(),
    };

    // Conditional logging depending on log level.
    server_utils::debug_request(http_req, &ReqTranslate { property: &state.request_property, text: &text });

    // -------------------- Forward --------------------------------
    match state.forwarder.forward(&text).await {
        Ok(output) => {
            info!("Completed request: {} input bytes, {} output bytes.", text.len(), output.len());
            make_http_200(&state.response_property, output)
        }
        Err(e) => {
            let msg = e.to_string();
            error!("{}", msg);
            make_http_500(msg)
        }
    }
}

// ---------------------------------------------------------------------------
// extract_input:
// ---------------------------------------------------------------------------
/** A missing field and any falsy value (null, false, 0, "", [], {}) count as
 * absent.  Strings are used as is, whitespace-only included; other values are
 * forwarded as their json text.
 */
fn extract_input<'a>(json: &'a Value, property: &str) -> Option<Cow<'a, str>> {
    let value = json.get(property)?;
    if is_falsy(value) {
        return None;
    }
    match value {
        Value::String(s) => Some(Cow::Borrowed(s.as_str())),
        other => Some(Cow::Owned(other.to_string())),
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}
