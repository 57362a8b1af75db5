use crate::{
    captcha::CaptchaVerifier,
    form::{ContactForm, FieldErrors, RawSubmission},
    mail::MailTransport,
    pages::render_contact_form,
    routes::{CONTACT_FORM, CONTACT_FORM_SENT},
    settings::Settings,
    ContactFormError, InternalError,
};
use axum::response::{Html, IntoResponse, Redirect, Response};
use tracing::warn;

/// What a request to the contact form ends in.
#[derive(Debug, PartialEq, Eq)]
pub enum ViewOutcome {
    Rendered(String),
    Redirected(&'static str),
}

impl IntoResponse for ViewOutcome {
    fn into_response(self) -> Response {
        match self {
            ViewOutcome::Rendered(html) => Html(html).into_response(),
            ViewOutcome::Redirected(location) => Redirect::to(location).into_response(),
        }
    }
}

pub struct ContactFormView<CaptchaVerifierT: CaptchaVerifier, MailTransportT: MailTransport> {
    action: String,
    recipient_list: Vec<String>,
    site_key: String,
    captcha_verifier: CaptchaVerifierT,
    mail_transport: MailTransportT,
}

impl<CaptchaVerifierT: CaptchaVerifier, MailTransportT: MailTransport>
    ContactFormView<CaptchaVerifierT, MailTransportT>
{
    pub fn new(
        settings: &Settings,
        captcha_verifier: CaptchaVerifierT,
        mail_transport: MailTransportT,
    ) -> Self {
        Self {
            action: CONTACT_FORM.into(),
            recipient_list: settings.recipient_list.clone(),
            site_key: settings.recaptcha_site_key.clone(),
            captcha_verifier,
            mail_transport,
        }
    }

    /// Sends submissions through this view to `recipient_list` instead of the configured default.
    pub fn with_recipient_list(self, recipient_list: Vec<String>) -> Self {
        Self {
            recipient_list,
            ..self
        }
    }

    /// The path the rendered form posts back to.
    pub fn with_action(self, action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            ..self
        }
    }

    pub fn form(&self) -> ContactForm<'_> {
        ContactForm::new(&self.recipient_list)
    }

    pub fn get(&self) -> Result<ViewOutcome, InternalError> {
        self.render(&RawSubmission::default(), &FieldErrors::default())
    }

    pub async fn post(
        &self,
        submission: RawSubmission,
        remote_ip: Option<&str>,
    ) -> Result<ViewOutcome, InternalError> {
        let form = self.form();
        match form
            .validate(&submission, &self.captcha_verifier, remote_ip)
            .await
        {
            Ok(validated) => {
                form.compose_and_send(&validated, &self.mail_transport)
                    .await?;
                Ok(ViewOutcome::Redirected(CONTACT_FORM_SENT))
            }
            Err(ContactFormError::InvalidForm(errors)) => {
                warn!("Contact form submission rejected: {errors}");
                self.render(&submission, &errors)
            }
            Err(ContactFormError::InternalError(error)) => Err(error),
        }
    }

    fn render(
        &self,
        submission: &RawSubmission,
        errors: &FieldErrors,
    ) -> Result<ViewOutcome, InternalError> {
        render_contact_form(submission, errors, &self.action, &self.site_key)
            .map(ViewOutcome::Rendered)
            .map_err(|error| InternalError {
                description: format!("Error rendering contact form: {error}"),
                subject: submission.subject_or_placeholder(),
                body: submission.body_or_placeholder(),
            })
    }
}
