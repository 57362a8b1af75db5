pub mod captcha;
pub mod form;
pub mod mail;
pub mod pages;
pub mod routes;
pub mod secrets;
pub mod settings;
pub mod view;

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use form::FieldErrors;
use pages::render_error_page;
use std::fmt::Display;
use tracing::error;

#[derive(Debug)]
pub enum ContactFormError {
    /// One or more fields failed validation. The form is shown again with the errors.
    InvalidForm(FieldErrors),
    InternalError(InternalError),
}

/// Something on our side went wrong. The subject and body are kept so that the error page can
/// give the visitor their message back.
#[derive(Debug)]
pub struct InternalError {
    pub description: String,
    pub subject: String,
    pub body: String,
}

impl InternalError {
    pub fn log(&self) {
        error!("Internal error processing contact form: {}", self.description);
    }
}

impl IntoResponse for InternalError {
    fn into_response(self) -> Response {
        self.log();
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            render_error_page(self.subject.as_str(), self.body.as_str()),
        )
            .into_response()
    }
}

impl Display for InternalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Internal error: {}", self.description)
    }
}

impl std::error::Error for InternalError {}

impl From<InternalError> for ContactFormError {
    fn from(error: InternalError) -> Self {
        ContactFormError::InternalError(error)
    }
}

impl Display for ContactFormError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContactFormError::InternalError(error) => write!(f, "{error}"),
            ContactFormError::InvalidForm(errors) => write!(f, "Invalid form: {errors}"),
        }
    }
}

impl std::error::Error for ContactFormError {}

#[derive(Debug)]
pub enum EnvironmentError {
    MissingSecret(&'static str),
    MalformedSecret(&'static str, String),
}

impl Display for EnvironmentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvironmentError::MissingSecret(key) => write!(f, "Missing secret {key}"),
            EnvironmentError::MalformedSecret(key, error) => {
                write!(f, "Malformed secret {key}: {error}")
            }
        }
    }
}

impl std::error::Error for EnvironmentError {}
