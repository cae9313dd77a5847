//! HTTP surface.
//!
//! Requests are JSON bodies with an `Action` member (the query-string/XML
//! encoding of the real EC2 protocol is out of scope; the error taxonomy is
//! not). Errors serialize as `{"Error": {"Code", "Message"}}` with 400 for
//! client faults and 500 for ours.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use serde_json::Value;
use tracing::debug;

use hive_core::{Ec2Error, Ec2ErrorCode};

use crate::Gateway;

/// Shared state for the router.
#[derive(Clone)]
pub struct ApiState {
    pub gateway: Arc<Gateway>,
}

/// Build the gateway router.
pub fn build_router(gateway: Arc<Gateway>) -> axum::Router {
    axum::Router::new()
        .route("/", post(dispatch))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(ApiState { gateway })
}

fn error_response(err: &Ec2Error) -> axum::response::Response {
    let status = if err.code.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (
        status,
        Json(serde_json::json!({
            "Error": {
                "Code": err.code.as_str(),
                "Message": err.message,
            }
        })),
    )
        .into_response()
}

fn decode<T: serde::de::DeserializeOwned>(body: Value) -> Result<T, Ec2Error> {
    serde_json::from_value(body).map_err(|e| {
        Ec2Error::new(
            Ec2ErrorCode::ValidationError,
            format!("malformed request body: {e}"),
        )
    })
}

fn ok<T: serde::Serialize>(value: T) -> axum::response::Response {
    Json(value).into_response()
}

async fn dispatch(State(state): State<ApiState>, Json(body): Json<Value>) -> impl IntoResponse {
    let action = body
        .get("Action")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    debug!(%action, "ec2 request");
    let gateway = &state.gateway;

    let result: Result<axum::response::Response, Ec2Error> = match action.as_str() {
        "RunInstances" => match decode(body) {
            Ok(input) => gateway.run_instances(&input).await.map(ok),
            Err(e) => Err(e),
        },
        "StartInstances" => match decode(body) {
            Ok(input) => gateway.start_instances(&input).await.map(ok),
            Err(e) => Err(e),
        },
        "StopInstances" => match decode(body) {
            Ok(input) => gateway.stop_instances(&input).await.map(ok),
            Err(e) => Err(e),
        },
        "TerminateInstances" => match decode(body) {
            Ok(input) => gateway.terminate_instances(&input).await.map(ok),
            Err(e) => Err(e),
        },
        "DescribeInstances" => match decode(body) {
            Ok(input) => gateway.describe_instances(&input).await.map(ok),
            Err(e) => Err(e),
        },
        "DescribeInstanceTypes" => match decode(body) {
            Ok(input) => gateway.describe_instance_types(&input).await.map(ok),
            Err(e) => Err(e),
        },
        "ModifyInstanceAttribute" => match decode(body) {
            Ok(input) => gateway.modify_instance_attribute(&input).await.map(ok),
            Err(e) => Err(e),
        },
        "GetConsoleOutput" => match decode(body) {
            Ok(input) => gateway.get_console_output(&input).await.map(ok),
            Err(e) => Err(e),
        },
        "CreateTags" => match decode(body) {
            Ok(input) => gateway.create_tags(&input).await.map(ok),
            Err(e) => Err(e),
        },
        "DescribeTags" => match decode(body) {
            Ok(input) => gateway.describe_tags(&input).await.map(ok),
            Err(e) => Err(e),
        },
        "DeleteTags" => match decode(body) {
            Ok(input) => gateway.delete_tags(&input).await.map(ok),
            Err(e) => Err(e),
        },
        other => Err(Ec2Error::new(
            Ec2ErrorCode::InvalidParameterValue,
            format!("unknown action {other:?}"),
        )),
    };

    match result {
        Ok(response) => response,
        Err(err) => error_response(&err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_shape_and_status() {
        let err = Ec2Error::new(Ec2ErrorCode::MissingParameter, "ImageId");
        let response = error_response(&err);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let err = Ec2Error::internal("boom");
        let response = error_response(&err);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn decode_rejects_wrong_shape() {
        let body = serde_json::json!({"Action": "RunInstances", "MinCount": "not-a-number"});
        let result: Result<hive_core::ec2::RunInstancesInput, _> = decode(body);
        assert!(result.is_err());
    }
}
