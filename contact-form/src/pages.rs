use crate::{
    form::{
        FieldErrors, RawSubmission, BODY_FIELD, CAPTCHA_FIELD, EMAIL_FIELD, NAME_FIELD,
        TITLE_FIELD,
    },
    routes::CONTACT_FORM,
};
use serde::Serialize;
use serde_json::Value;
use tinytemplate::{error::Error, format, TinyTemplate};

pub const CONTACT_FORM_TEMPLATE_NAME: &str = "contact_form/contact_form.html";
pub const CONTACT_FORM_SENT_TEMPLATE_NAME: &str = "contact_form/contact_form_sent.html";
pub const SEND_ERROR_TEMPLATE_NAME: &str = "contact_form/send_error.html";

const CONTACT_FORM_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/contact_form.html"
));
const CONTACT_FORM_SENT_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/contact_form_sent.html"
));
const SEND_ERROR_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/send_error.html"
));

#[derive(Serialize)]
struct FieldContext<'a> {
    value: &'a str,
    errors: &'a [String],
}

#[derive(Serialize)]
struct ContactFormContext<'a> {
    action: &'a str,
    site_key: &'a str,
    has_errors: bool,
    name: FieldContext<'a>,
    email: FieldContext<'a>,
    title: FieldContext<'a>,
    body: FieldContext<'a>,
    captcha: FieldContext<'a>,
}

#[derive(Serialize)]
struct SentContext<'a> {
    contact_form_url: &'a str,
}

#[derive(Serialize)]
struct SendErrorContext<'a> {
    contact_form_url: &'a str,
    subject: &'a str,
    body: &'a str,
}

fn templates() -> Result<TinyTemplate<'static>, Error> {
    let mut tt = TinyTemplate::new();
    tt.add_formatter("render_paragraphs", render_paragraphs);
    tt.add_template(CONTACT_FORM_TEMPLATE_NAME, CONTACT_FORM_TEMPLATE)?;
    tt.add_template(CONTACT_FORM_SENT_TEMPLATE_NAME, CONTACT_FORM_SENT_TEMPLATE)?;
    tt.add_template(SEND_ERROR_TEMPLATE_NAME, SEND_ERROR_TEMPLATE)?;
    Ok(tt)
}

/// Renders the contact form, refilled with `submission` and annotated with `errors`. An unbound
/// form is `RawSubmission::default()` with no errors. The form posts back to `action`.
pub fn render_contact_form(
    submission: &RawSubmission,
    errors: &FieldErrors,
    action: &str,
    site_key: &str,
) -> Result<String, Error> {
    let context = ContactFormContext {
        action,
        site_key,
        has_errors: !errors.is_empty(),
        name: field_context(submission.name.as_deref(), errors, NAME_FIELD),
        email: field_context(submission.email.as_deref(), errors, EMAIL_FIELD),
        title: field_context(submission.title(), errors, TITLE_FIELD),
        body: field_context(submission.body.as_deref(), errors, BODY_FIELD),
        captcha: FieldContext {
            value: "",
            errors: errors.get(CAPTCHA_FIELD),
        },
    };
    templates()?.render(CONTACT_FORM_TEMPLATE_NAME, &context)
}

fn field_context<'a>(
    value: Option<&'a str>,
    errors: &'a FieldErrors,
    name: &str,
) -> FieldContext<'a> {
    FieldContext {
        value: value.unwrap_or_default(),
        errors: errors.get(name),
    }
}

pub fn render_contact_form_sent() -> Result<String, Error> {
    templates()?.render(
        CONTACT_FORM_SENT_TEMPLATE_NAME,
        &SentContext {
            contact_form_url: CONTACT_FORM,
        },
    )
}

/// Never fails: if the template itself is broken the visitor still gets their message back as
/// plain text.
pub fn render_error_page(subject: &str, body: &str) -> String {
    let context = SendErrorContext {
        contact_form_url: CONTACT_FORM,
        subject,
        body,
    };
    templates()
        .and_then(|tt| tt.render(SEND_ERROR_TEMPLATE_NAME, &context))
        .unwrap_or_else(|_| {
            let mut escaped = String::new();
            tinytemplate::escape(&format!("{subject}\n\n{body}"), &mut escaped);
            format!("Something went wrong sending your message.\n\n{escaped}")
        })
}

fn render_paragraphs(value: &Value, output: &mut String) -> Result<(), Error> {
    output.push_str("<p>");
    let mut formatted = String::new();
    format(value, &mut formatted)?;
    output.push_str(&formatted.replace("\n\n", "</p><p>"));
    output.push_str("</p>");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use googletest::prelude::*;

    const MALICIOUS_CONTENT: &str = "<script>doEvil();</script>";
    const SITE_KEY: &str = "arbitrary site key";

    #[test]
    fn renders_unbound_form() -> Result<()> {
        let output = render_contact_form(
            &RawSubmission::default(),
            &FieldErrors::default(),
            CONTACT_FORM,
            SITE_KEY,
        )
        .unwrap();

        verify_that!(
            output,
            all!(
                contains_substring(r#"<form method="post" action="/contact/""#),
                contains_substring(r#"data-sitekey="arbitrary site key""#),
                not(contains_substring("errorlist"))
            )
        )
    }

    #[test]
    fn posts_back_to_given_action() -> Result<()> {
        let output = render_contact_form(
            &RawSubmission::default(),
            &FieldErrors::default(),
            "/support/contact/",
            SITE_KEY,
        )
        .unwrap();

        verify_that!(
            output,
            contains_substring(r#"<form method="post" action="/support/contact/">"#)
        )
    }

    #[test]
    fn refills_submitted_values_and_shows_errors() -> Result<()> {
        let mut errors = FieldErrors::default();
        errors.add(EMAIL_FIELD, "This field is required.");
        let submission = RawSubmission {
            name: Some("Test".into()),
            body: Some("Test message".into()),
            ..Default::default()
        };

        let output = render_contact_form(&submission, &errors, CONTACT_FORM, SITE_KEY).unwrap();

        verify_that!(
            output,
            all!(
                contains_substring(r#"value="Test""#),
                contains_substring("Test message</textarea>"),
                contains_substring(r#"<li>This field is required.</li>"#)
            )
        )
    }

    #[test]
    fn escapes_user_input_in_form() -> Result<()> {
        let submission = RawSubmission {
            name: Some(MALICIOUS_CONTENT.into()),
            body: Some(MALICIOUS_CONTENT.into()),
            ..Default::default()
        };

        let output =
            render_contact_form(&submission, &FieldErrors::default(), CONTACT_FORM, SITE_KEY)
                .unwrap();

        verify_that!(output, not(contains_substring(MALICIOUS_CONTENT)))
    }

    #[test]
    fn renders_sent_page() -> Result<()> {
        verify_that!(
            render_contact_form_sent(),
            ok(contains_substring("Thank you"))
        )
    }

    #[test]
    fn escapes_user_input_in_subject() -> Result<()> {
        let output = render_error_page(MALICIOUS_CONTENT, "A body");

        verify_that!(output, not(contains_substring(MALICIOUS_CONTENT)))
    }

    #[test]
    fn escapes_user_input_in_body() -> Result<()> {
        let output = render_error_page("A subject", MALICIOUS_CONTENT);

        verify_that!(output, not(contains_substring(MALICIOUS_CONTENT)))
    }

    #[test]
    fn renders_paragraphs_in_body() -> Result<()> {
        let output = render_error_page("A subject", "A paragraph\n\nAnother paragraph");

        verify_that!(
            output,
            contains_substring("<p>A paragraph</p><p>Another paragraph</p>")
        )
    }

    #[test]
    fn renders_apology_in_error_page() -> Result<()> {
        let output = render_error_page("A subject", "A body");

        verify_that!(output, contains_substring("Something went wrong"))
    }
}
