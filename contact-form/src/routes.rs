use crate::{
    captcha::CaptchaVerifier,
    form::RawSubmission,
    mail::MailTransport,
    pages::render_contact_form_sent,
    view::{ContactFormView, ViewOutcome},
    InternalError,
};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Html,
    routing::{get, MethodRouter},
    Form, Router,
};
use std::sync::Arc;
use tracing::error;

pub const CONTACT_FORM: &str = "/contact/";
pub const CONTACT_FORM_SENT: &str = "/contact/sent/";

/// The full application: the contact form backed by `view` and its confirmation page.
pub fn router<CaptchaVerifierT, MailTransportT>(
    view: ContactFormView<CaptchaVerifierT, MailTransportT>,
) -> Router
where
    CaptchaVerifierT: CaptchaVerifier + 'static,
    MailTransportT: MailTransport + 'static,
{
    mount_contact_form(Router::new(), CONTACT_FORM, view)
        .route(CONTACT_FORM_SENT, get(show_sent_page))
}

/// Serves GET and POST for `view` at `path`. Mount more than one view to serve forms with
/// different recipients. Each rendered form posts back to its own `path`.
pub fn mount_contact_form<CaptchaVerifierT, MailTransportT>(
    router: Router,
    path: &str,
    view: ContactFormView<CaptchaVerifierT, MailTransportT>,
) -> Router
where
    CaptchaVerifierT: CaptchaVerifier + 'static,
    MailTransportT: MailTransport + 'static,
{
    router.route(path, contact_form_service(view.with_action(path)))
}

fn contact_form_service<CaptchaVerifierT, MailTransportT>(
    view: ContactFormView<CaptchaVerifierT, MailTransportT>,
) -> MethodRouter
where
    CaptchaVerifierT: CaptchaVerifier + 'static,
    MailTransportT: MailTransport + 'static,
{
    get(show_form::<CaptchaVerifierT, MailTransportT>)
        .post(submit_form::<CaptchaVerifierT, MailTransportT>)
        .with_state(Arc::new(view))
}

async fn show_form<CaptchaVerifierT, MailTransportT>(
    State(view): State<Arc<ContactFormView<CaptchaVerifierT, MailTransportT>>>,
) -> Result<ViewOutcome, InternalError>
where
    CaptchaVerifierT: CaptchaVerifier + 'static,
    MailTransportT: MailTransport + 'static,
{
    view.get()
}

async fn submit_form<CaptchaVerifierT, MailTransportT>(
    State(view): State<Arc<ContactFormView<CaptchaVerifierT, MailTransportT>>>,
    headers: HeaderMap,
    Form(submission): Form<RawSubmission>,
) -> Result<ViewOutcome, InternalError>
where
    CaptchaVerifierT: CaptchaVerifier + 'static,
    MailTransportT: MailTransport + 'static,
{
    let client_ip = remote_ip(&headers);
    view.post(submission, client_ip.as_deref()).await
}

async fn show_sent_page() -> Result<Html<String>, StatusCode> {
    render_contact_form_sent().map(Html).map_err(|error| {
        error!("Error rendering confirmation page: {error}");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// The client address as reported by the load balancer in front of us.
fn remote_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("X-Forwarded-For")?
        .to_str()
        .ok()?
        .split(',')
        .next()
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::remote_ip;
    use axum::http::{HeaderMap, HeaderValue};
    use googletest::prelude::*;

    #[test]
    fn takes_first_forwarded_address() -> Result<()> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Forwarded-For",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );

        verify_that!(remote_ip(&headers), some(eq("203.0.113.7")))
    }

    #[test]
    fn has_no_address_without_header() -> Result<()> {
        verify_that!(remote_ip(&HeaderMap::new()), none())
    }
}
