use crate::{secrets::SecretRepository, InternalError};
use async_once_cell::OnceCell;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

pub const RECAPTCHA_DATA_NAME: &str = "recaptcha-data";
pub const RECAPTCHA_VERIFY_URL: &str = "https://www.google.com/recaptcha/api/siteverify";

#[async_trait]
pub trait CaptchaVerifier: Send + Sync {
    async fn verify(&self, token: &str, remote_ip: Option<&str>) -> Result<(), CaptchaError>;
}

/// Accepts exactly one token, [TestingCaptchaVerifier::PASSING_TOKEN], without contacting any
/// service.
#[derive(Clone, Copy, Default)]
pub struct TestingCaptchaVerifier;

impl TestingCaptchaVerifier {
    pub const PASSING_TOKEN: &'static str = "PASSED";
}

#[async_trait]
impl CaptchaVerifier for TestingCaptchaVerifier {
    async fn verify(&self, token: &str, _remote_ip: Option<&str>) -> Result<(), CaptchaError> {
        if token == Self::PASSING_TOKEN {
            Ok(())
        } else {
            Err(CaptchaError::SolutionInvalid)
        }
    }
}

#[async_trait]
impl<CaptchaVerifierT: CaptchaVerifier + ?Sized> CaptchaVerifier for Arc<CaptchaVerifierT> {
    async fn verify(&self, token: &str, remote_ip: Option<&str>) -> Result<(), CaptchaError> {
        self.as_ref().verify(token, remote_ip).await
    }
}

pub struct RecaptchaVerifier<SecretRepositoryT: SecretRepository> {
    secrets_repository: SecretRepositoryT,
    verify_url: String,
    recaptcha_data: OnceCell<RecaptchaData>,
    client: Client,
}

impl<SecretRepositoryT: SecretRepository> RecaptchaVerifier<SecretRepositoryT> {
    pub fn new(secrets_repository: SecretRepositoryT, verify_url: impl Into<String>) -> Self {
        Self {
            secrets_repository,
            verify_url: verify_url.into(),
            recaptcha_data: Default::default(),
            client: Client::new(),
        }
    }

    async fn build_payload<'a>(
        &'a self,
        token: &'a str,
        remote_ip: Option<&'a str>,
    ) -> Result<RecaptchaVerifyPayload<'a>, CaptchaError> {
        let data = self
            .recaptcha_data
            .get_or_try_init(self.secrets_repository.get_secret(RECAPTCHA_DATA_NAME))
            .await
            .map_err(|error| {
                warn!("Could not retrieve reCAPTCHA credentials {RECAPTCHA_DATA_NAME}: {error}");
                CaptchaError::BackendError(error.to_string())
            })?;

        Ok(RecaptchaVerifyPayload {
            secret: &data.secret_key,
            response: token,
            remoteip: remote_ip,
        })
    }

    async fn send_token(
        &self,
        payload: RecaptchaVerifyPayload<'_>,
    ) -> Result<Response, CaptchaError> {
        self.client
            .post(self.verify_url.as_str())
            .form(&payload)
            .send()
            .await
            .map_err(|error| {
                warn!("Error verifying reCAPTCHA token: {error}");
                CaptchaError::BackendError(error.to_string())
            })
    }

    async fn process_response(response: Response) -> Result<(), CaptchaError> {
        if response.status() == StatusCode::UNAUTHORIZED
            || response.status() == StatusCode::FORBIDDEN
        {
            return Err(CaptchaError::IncorrectSecret);
        }
        let response_body: RecaptchaResponse = response.json().await.map_err(|error| {
            warn!("Error fetching body from reCAPTCHA: {error}");
            CaptchaError::BackendError(error.to_string())
        })?;
        if response_body.success {
            return Ok(());
        }
        let has_error = |code: &str| response_body.error_codes.iter().any(|e| e == code);
        if has_error("invalid-input-secret") || has_error("missing-input-secret") {
            Err(CaptchaError::IncorrectSecret)
        } else if has_error("timeout-or-duplicate") {
            Err(CaptchaError::SolutionTimeoutOrDuplicate)
        } else if has_error("invalid-input-response") || has_error("missing-input-response") {
            Err(CaptchaError::SolutionInvalid)
        } else {
            Err(CaptchaError::UnrecognizedError(response_body.error_codes))
        }
    }
}

#[async_trait]
impl<SecretRepositoryT: SecretRepository> CaptchaVerifier for RecaptchaVerifier<SecretRepositoryT> {
    async fn verify(&self, token: &str, remote_ip: Option<&str>) -> Result<(), CaptchaError> {
        let payload = self.build_payload(token, remote_ip).await?;
        let response = self.send_token(payload).await?;
        Self::process_response(response).await
    }
}

#[derive(Deserialize, Clone)]
struct RecaptchaData {
    #[serde(rename = "RECAPTCHA_SECRET_KEY")]
    secret_key: String,
}

#[derive(Serialize)]
struct RecaptchaVerifyPayload<'a> {
    secret: &'a str,
    response: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    remoteip: Option<&'a str>,
}

#[derive(Deserialize)]
struct RecaptchaResponse {
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptchaError {
    IncorrectSecret,
    SolutionInvalid,
    SolutionTimeoutOrDuplicate,
    UnrecognizedError(Vec<String>),
    BackendError(String),
}

impl CaptchaError {
    /// Only for failures which are not the visitor's fault. Rejected tokens are reported on the
    /// form itself.
    pub fn into_internal_error(self, subject: String, body: String) -> InternalError {
        InternalError {
            description: format!("reCAPTCHA verification failed: {self}"),
            subject,
            body,
        }
    }
}

impl std::fmt::Display for CaptchaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptchaError::IncorrectSecret => write!(f, "Incorrect secret"),
            CaptchaError::SolutionInvalid => write!(f, "Solution invalid"),
            CaptchaError::SolutionTimeoutOrDuplicate => {
                write!(f, "Solution timeout or duplicate")
            }
            CaptchaError::UnrecognizedError(errors) => {
                write!(f, "Unrecognised error: {errors:?}")
            }
            CaptchaError::BackendError(description) => {
                write!(f, "reCAPTCHA backend error: {description}")
            }
        }
    }
}

impl std::error::Error for CaptchaError {}
