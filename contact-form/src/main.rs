use contact_form::{
    captcha::{CaptchaVerifier, RecaptchaVerifier, TestingCaptchaVerifier},
    mail::{MailTransport, Outbox, SmtpMailTransport},
    routes::router,
    secrets::{AwsSecretsManagerSecretRepository, SecretRepository},
    settings::{MailTransportKind, Settings},
    view::ContactFormView,
};
use lambda_http::{run, Error};
use std::sync::Arc;
use tracing::warn;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();

    let settings = Settings::from_env()?;
    let secrets_repository = AwsSecretsManagerSecretRepository::open().await;

    let captcha_verifier: Arc<dyn CaptchaVerifier> = if settings.recaptcha_testing {
        warn!("RECAPTCHA_TESTING is set: only the test token will pass verification.");
        Arc::new(TestingCaptchaVerifier)
    } else {
        Arc::new(RecaptchaVerifier::new(
            secrets_repository.clone(),
            settings.recaptcha_verify_url.as_str(),
        ))
    };
    let mail_transport: Arc<dyn MailTransport> = match settings.mail_transport {
        MailTransportKind::Smtp => Arc::new(SmtpMailTransport::new(
            secrets_repository,
            settings.smtp_url.as_str(),
        )),
        MailTransportKind::Outbox => {
            warn!("MAIL_TRANSPORT is outbox: messages will not be delivered.");
            Arc::new(Outbox::default())
        }
    };

    run(router(ContactFormView::new(
        &settings,
        captcha_verifier,
        mail_transport,
    )))
    .await
}
