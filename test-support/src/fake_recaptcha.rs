use axum::{
    extract::{Form, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use tokio::net::TcpListener;

const VERIFY_PATH: &str = "/siteverify";

/// Stands in for the reCAPTCHA `siteverify` endpoint.
#[derive(Clone)]
pub struct FakeRecaptcha {
    required_secret: Cow<'static, str>,
    required_token: Option<String>,
    return_invalid_response: bool,
    return_token_timeout: bool,
    reject_with_status: Option<StatusCode>,
}

#[derive(Deserialize)]
struct VerifyRequestPayload {
    secret: String,
    response: String,
    #[allow(unused)]
    remoteip: Option<String>,
}

#[derive(Serialize)]
struct VerifyResponsePayload {
    success: bool,
    #[serde(rename = "error-codes")]
    error_codes: Vec<&'static str>,
}

impl FakeRecaptcha {
    pub fn new(required_secret: impl Into<Cow<'static, str>>) -> Self {
        Self {
            required_secret: required_secret.into(),
            required_token: None,
            return_invalid_response: false,
            return_token_timeout: false,
            reject_with_status: None,
        }
    }

    /// Starts serving on an ephemeral port and returns the verification URL.
    pub async fn start(self) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let app = Router::new()
            .route(VERIFY_PATH, post(verify))
            .with_state(self);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{address}{VERIFY_PATH}")
    }

    pub fn require_token(self, required_token: impl AsRef<str>) -> Self {
        Self {
            required_token: Some(required_token.as_ref().into()),
            ..self
        }
    }

    pub fn return_invalid_response(self) -> Self {
        Self {
            return_invalid_response: true,
            ..self
        }
    }

    pub fn return_token_timeout(self) -> Self {
        Self {
            return_token_timeout: true,
            ..self
        }
    }

    /// Answers every request with `status` and an empty body, as the service does when it
    /// refuses the caller outright.
    pub fn reject_with_status(self, status: StatusCode) -> Self {
        Self {
            reject_with_status: Some(status),
            ..self
        }
    }
}

fn failure(error_code: &'static str) -> Response {
    Json(VerifyResponsePayload {
        success: false,
        error_codes: vec![error_code],
    })
    .into_response()
}

async fn verify(
    State(state): State<FakeRecaptcha>,
    Form(payload): Form<VerifyRequestPayload>,
) -> Response {
    if let Some(status) = state.reject_with_status {
        status.into_response()
    } else if state.return_invalid_response {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain")],
            "Invalid response",
        )
            .into_response()
    } else if state.return_token_timeout {
        failure("timeout-or-duplicate")
    } else if payload.secret != state.required_secret {
        failure("invalid-input-secret")
    } else if payload.response.is_empty() {
        failure("missing-input-response")
    } else if state.required_token.is_some() && Some(payload.response) != state.required_token {
        failure("invalid-input-response")
    } else {
        Json(VerifyResponsePayload {
            success: true,
            error_codes: vec![],
        })
        .into_response()
    }
}
