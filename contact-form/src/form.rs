use crate::{
    captcha::{CaptchaError, CaptchaVerifier},
    mail::{MailTransport, OutboundMessage},
    ContactFormError, InternalError,
};
use lettre::Address;
use serde::Deserialize;
use std::{collections::BTreeMap, fmt::Display};
use tracing::info;

pub const NAME_FIELD: &str = "name";
pub const EMAIL_FIELD: &str = "email";
pub const TITLE_FIELD: &str = "title";
pub const BODY_FIELD: &str = "body";
pub const CAPTCHA_FIELD: &str = "g-recaptcha-response";

pub const REQUIRED_MESSAGE: &str = "This field is required.";
pub const INVALID_EMAIL_MESSAGE: &str = "Enter a valid email address.";
pub const CAPTCHA_INVALID_MESSAGE: &str = "Error verifying reCAPTCHA, please try again.";

/// The form fields exactly as they arrived in the POST body.
#[derive(Deserialize, Debug, Default, Clone)]
pub struct RawSubmission {
    pub name: Option<String>,
    pub email: Option<String>,
    pub title: Option<String>,
    /// Older copies of the form call the title `subject`. `title` wins when both are sent.
    pub subject: Option<String>,
    pub body: Option<String>,
    #[serde(rename = "g-recaptcha-response")]
    pub captcha_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSubmission {
    pub name: String,
    pub email: String,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FieldErrors(BTreeMap<&'static str, Vec<String>>);

impl FieldErrors {
    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.entry(field).or_default().push(message.into());
    }

    pub fn get(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for FieldErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            for message in messages {
                if !first {
                    write!(f, "; ")?;
                }
                write!(f, "{field}: {message}")?;
                first = false;
            }
        }
        Ok(())
    }
}

enum FieldKind {
    Text,
    Email,
}

struct Field {
    name: &'static str,
    max_length: Option<usize>,
    kind: FieldKind,
}

impl Field {
    /// Returns the cleaned value. Surrounding whitespace is stripped everywhere except in the
    /// message body, which goes out as typed.
    fn clean(&self, raw: Option<&str>) -> Result<String, Vec<String>> {
        let value = match raw {
            Some(value) if self.name == BODY_FIELD => value,
            Some(value) => value.trim(),
            None => "",
        };
        if value.trim().is_empty() {
            return Err(vec![REQUIRED_MESSAGE.into()]);
        }

        let mut errors = Vec::new();
        if let FieldKind::Email = self.kind {
            if value.parse::<Address>().is_err() {
                errors.push(INVALID_EMAIL_MESSAGE.into());
            }
        }
        if let Some(max_length) = self.max_length {
            let length = value.chars().count();
            if length > max_length {
                errors.push(format!(
                    "Ensure this value has at most {max_length} characters (it has {length})."
                ));
            }
        }
        if errors.is_empty() {
            Ok(value.into())
        } else {
            Err(errors)
        }
    }
}

const FIELDS: [Field; 4] = [
    Field {
        name: NAME_FIELD,
        max_length: Some(100),
        kind: FieldKind::Text,
    },
    Field {
        name: EMAIL_FIELD,
        max_length: Some(200),
        kind: FieldKind::Email,
    },
    Field {
        name: TITLE_FIELD,
        max_length: Some(200),
        kind: FieldKind::Text,
    },
    Field {
        name: BODY_FIELD,
        max_length: None,
        kind: FieldKind::Text,
    },
];

impl RawSubmission {
    fn field(&self, name: &str) -> Option<&str> {
        match name {
            NAME_FIELD => self.name.as_deref(),
            EMAIL_FIELD => self.email.as_deref(),
            TITLE_FIELD => self.title(),
            BODY_FIELD => self.body.as_deref(),
            CAPTCHA_FIELD => self.captcha_token.as_deref(),
            _ => None,
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref().or(self.subject.as_deref())
    }

    pub fn subject_or_placeholder(&self) -> String {
        self.title().unwrap_or("(No subject)").into()
    }

    pub fn body_or_placeholder(&self) -> String {
        self.body.clone().unwrap_or_else(|| "(No message)".into())
    }
}

pub struct ContactForm<'a> {
    recipient_list: &'a [String],
}

impl<'a> ContactForm<'a> {
    pub fn new(recipient_list: &'a [String]) -> Self {
        Self { recipient_list }
    }

    pub fn recipient_list(&self) -> &[String] {
        self.recipient_list
    }

    /// Runs every field check and the CAPTCHA verification, collecting all field errors before
    /// deciding. The CAPTCHA is verified even when other fields are invalid so that the visitor
    /// sees every problem at once.
    pub async fn validate<CaptchaVerifierT: CaptchaVerifier + ?Sized>(
        &self,
        raw: &RawSubmission,
        captcha_verifier: &CaptchaVerifierT,
        remote_ip: Option<&str>,
    ) -> Result<ValidatedSubmission, ContactFormError> {
        let mut errors = FieldErrors::default();
        let mut cleaned = BTreeMap::new();
        for field in &FIELDS {
            match field.clean(raw.field(field.name)) {
                Ok(value) => {
                    cleaned.insert(field.name, value);
                }
                Err(messages) => {
                    for message in messages {
                        errors.add(field.name, message);
                    }
                }
            }
        }

        match raw.field(CAPTCHA_FIELD).map(str::trim) {
            None | Some("") => errors.add(CAPTCHA_FIELD, REQUIRED_MESSAGE),
            Some(token) => match captcha_verifier.verify(token, remote_ip).await {
                Ok(()) => {}
                Err(CaptchaError::SolutionInvalid | CaptchaError::SolutionTimeoutOrDuplicate) => {
                    errors.add(CAPTCHA_FIELD, CAPTCHA_INVALID_MESSAGE)
                }
                Err(error) => {
                    return Err(error
                        .into_internal_error(
                            raw.subject_or_placeholder(),
                            raw.body_or_placeholder(),
                        )
                        .into())
                }
            },
        }

        if !errors.is_empty() {
            return Err(ContactFormError::InvalidForm(errors));
        }
        let mut take = |field: &str| cleaned.remove(field).unwrap_or_default();
        Ok(ValidatedSubmission {
            name: take(NAME_FIELD),
            email: take(EMAIL_FIELD),
            title: take(TITLE_FIELD),
            body: take(BODY_FIELD),
        })
    }

    pub fn compose(&self, submission: &ValidatedSubmission) -> OutboundMessage {
        OutboundMessage {
            from_header: from_header(&submission.name, &submission.email),
            subject: submission.title.clone(),
            body: submission.body.clone(),
            recipients: self.recipient_list.to_vec(),
        }
    }

    pub async fn compose_and_send<MailTransportT: MailTransport + ?Sized>(
        &self,
        submission: &ValidatedSubmission,
        mail_transport: &MailTransportT,
    ) -> Result<(), InternalError> {
        let message = self.compose(submission);
        info!(
            "Sending contact form message from {} to {} recipient(s)",
            message.from_header,
            message.recipients.len()
        );
        mail_transport
            .send(message)
            .await
            .map_err(|error| InternalError {
                description: format!("Error sending message: {error}"),
                subject: submission.title.clone(),
                body: submission.body.clone(),
            })
    }
}

fn from_header(name: &str, email: &str) -> String {
    let escaped_name = name.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped_name}\" <{email}>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{captcha::TestingCaptchaVerifier, mail::Outbox};
    use async_trait::async_trait;
    use googletest::prelude::*;

    const RECIPIENTS: [&str; 1] = ["managers@example.com"];

    fn recipients() -> Vec<String> {
        RECIPIENTS.iter().map(|r| r.to_string()).collect()
    }

    fn valid_submission() -> RawSubmission {
        RawSubmission {
            name: Some("Test".into()),
            email: Some("test@example.com".into()),
            title: Some("Test".into()),
            body: Some("Test message".into()),
            captcha_token: Some(TestingCaptchaVerifier::PASSING_TOKEN.into()),
            ..Default::default()
        }
    }

    struct RejectingCaptchaVerifier(CaptchaError);

    #[async_trait]
    impl CaptchaVerifier for RejectingCaptchaVerifier {
        async fn verify(&self, _: &str, _: Option<&str>) -> std::result::Result<(), CaptchaError> {
            Err(self.0.clone())
        }
    }

    async fn field_errors(raw: RawSubmission) -> FieldErrors {
        let recipients = recipients();
        match ContactForm::new(&recipients)
            .validate(&raw, &TestingCaptchaVerifier, None)
            .await
        {
            Err(ContactFormError::InvalidForm(errors)) => errors,
            other => panic!("Expected field errors, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn accepts_valid_submission() -> Result<()> {
        let recipients = recipients();

        let submission = ContactForm::new(&recipients)
            .validate(&valid_submission(), &TestingCaptchaVerifier, None)
            .await;

        verify_that!(
            submission,
            ok(eq(ValidatedSubmission {
                name: "Test".into(),
                email: "test@example.com".into(),
                title: "Test".into(),
                body: "Test message".into(),
            }))
        )
    }

    #[tokio::test]
    async fn reports_missing_email_as_required() -> Result<()> {
        let errors = field_errors(RawSubmission {
            email: None,
            ..valid_submission()
        })
        .await;

        verify_that!(errors.get(EMAIL_FIELD).to_vec(), elements_are![eq(REQUIRED_MESSAGE)])
    }

    #[googletest::test]
    #[tokio::test]
    async fn accumulates_errors_for_every_invalid_field() {
        let errors = field_errors(RawSubmission {
            name: Some("Test".into()),
            body: Some("Test message".into()),
            ..Default::default()
        })
        .await;

        expect_that!(errors.get(NAME_FIELD).to_vec(), empty());
        expect_that!(errors.get(BODY_FIELD).to_vec(), empty());
        expect_that!(errors.get(EMAIL_FIELD).to_vec(), elements_are![eq(REQUIRED_MESSAGE)]);
        expect_that!(errors.get(TITLE_FIELD).to_vec(), elements_are![eq(REQUIRED_MESSAGE)]);
        expect_that!(errors.get(CAPTCHA_FIELD).to_vec(), elements_are![eq(REQUIRED_MESSAGE)]);
    }

    #[tokio::test]
    async fn treats_whitespace_only_value_as_missing() -> Result<()> {
        let errors = field_errors(RawSubmission {
            name: Some("   ".into()),
            ..valid_submission()
        })
        .await;

        verify_that!(errors.get(NAME_FIELD).to_vec(), elements_are![eq(REQUIRED_MESSAGE)])
    }

    #[tokio::test]
    async fn rejects_malformed_email() -> Result<()> {
        let errors = field_errors(RawSubmission {
            email: Some("not an email".into()),
            ..valid_submission()
        })
        .await;

        verify_that!(
            errors.get(EMAIL_FIELD).to_vec(),
            elements_are![eq(INVALID_EMAIL_MESSAGE)]
        )
    }

    #[tokio::test]
    async fn rejects_overlong_name() -> Result<()> {
        let errors = field_errors(RawSubmission {
            name: Some("a".repeat(101)),
            ..valid_submission()
        })
        .await;

        verify_that!(
            errors.get(NAME_FIELD).to_vec(),
            elements_are![eq(
                "Ensure this value has at most 100 characters (it has 101)."
            )]
        )
    }

    #[tokio::test]
    async fn reports_failed_captcha_on_captcha_field() -> Result<()> {
        let recipients = recipients();

        let result = ContactForm::new(&recipients)
            .validate(
                &valid_submission(),
                &RejectingCaptchaVerifier(CaptchaError::SolutionTimeoutOrDuplicate),
                None,
            )
            .await;

        verify_that!(
            result,
            err(predicate(|error: &ContactFormError| matches!(
                error,
                ContactFormError::InvalidForm(errors)
                    if errors.get(CAPTCHA_FIELD) == [CAPTCHA_INVALID_MESSAGE]
            )))
        )
    }

    #[tokio::test]
    async fn reports_captcha_backend_failure_as_internal_error() -> Result<()> {
        let recipients = recipients();

        let result = ContactForm::new(&recipients)
            .validate(
                &valid_submission(),
                &RejectingCaptchaVerifier(CaptchaError::BackendError("down".into())),
                None,
            )
            .await;

        verify_that!(
            result,
            err(predicate(|error: &ContactFormError| matches!(
                error,
                ContactFormError::InternalError(_)
            )))
        )
    }

    #[tokio::test]
    async fn accepts_subject_in_place_of_title() -> Result<()> {
        let recipients = recipients();

        let submission = ContactForm::new(&recipients)
            .validate(
                &RawSubmission {
                    title: None,
                    subject: Some("Legacy subject".into()),
                    ..valid_submission()
                },
                &TestingCaptchaVerifier,
                None,
            )
            .await;

        verify_that!(
            submission,
            ok(field!(ValidatedSubmission.title, eq("Legacy subject")))
        )
    }

    #[tokio::test]
    async fn prefers_title_when_subject_is_also_given() -> Result<()> {
        let recipients = recipients();

        let submission = ContactForm::new(&recipients)
            .validate(
                &RawSubmission {
                    subject: Some("Legacy subject".into()),
                    ..valid_submission()
                },
                &TestingCaptchaVerifier,
                None,
            )
            .await;

        verify_that!(submission, ok(field!(ValidatedSubmission.title, eq("Test"))))
    }

    #[tokio::test]
    async fn keeps_body_verbatim() -> Result<()> {
        let recipients = recipients();

        let submission = ContactForm::new(&recipients)
            .validate(
                &RawSubmission {
                    body: Some("  Indented\n\nmessage\n".into()),
                    ..valid_submission()
                },
                &TestingCaptchaVerifier,
                None,
            )
            .await;

        verify_that!(
            submission,
            ok(field!(ValidatedSubmission.body, eq("  Indented\n\nmessage\n")))
        )
    }

    #[googletest::test]
    fn composes_message_from_submission() {
        let recipients = recipients();
        let submission = ValidatedSubmission {
            name: "Test".into(),
            email: "test@example.com".into(),
            title: "Subject".into(),
            body: "Test message".into(),
        };

        let message = ContactForm::new(&recipients).compose(&submission);

        expect_that!(message.from_header, eq("\"Test\" <test@example.com>"));
        expect_that!(message.subject, eq("Subject"));
        expect_that!(message.body, eq("Test message"));
        expect_that!(message.recipients, elements_are![eq("managers@example.com")]);
    }

    #[test]
    fn escapes_quotes_in_from_header() -> Result<()> {
        verify_that!(
            from_header("Jane \"JJ\" Doe", "jane@example.com"),
            eq("\"Jane \\\"JJ\\\" Doe\" <jane@example.com>")
        )
    }

    #[tokio::test]
    async fn sends_one_message_per_call() -> Result<()> {
        let recipients = recipients();
        let form = ContactForm::new(&recipients);
        let outbox = Outbox::default();
        let submission = form
            .validate(&valid_submission(), &TestingCaptchaVerifier, None)
            .await
            .unwrap();

        form.compose_and_send(&submission, &outbox).await.unwrap();
        form.compose_and_send(&submission, &outbox).await.unwrap();

        verify_that!(outbox.len(), eq(2))
    }
}
