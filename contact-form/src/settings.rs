use crate::captcha::RECAPTCHA_VERIFY_URL;
use anyhow::{bail, Context};
use lettre::message::Mailbox;

const DEFAULT_RECIPIENTS: &str = "Webmaster <webmaster@localhost>";
const DEFAULT_SMTP_URL: &str = "smtps://email-smtp.eu-north-1.amazonaws.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailTransportKind {
    Smtp,
    /// Messages are kept in memory and never delivered.
    Outbox,
}

/// Process-wide configuration, read once at start-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub recipient_list: Vec<String>,
    pub smtp_url: String,
    pub mail_transport: MailTransportKind,
    pub recaptcha_site_key: String,
    pub recaptcha_verify_url: String,
    pub recaptcha_testing: bool,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let recipients = lookup("CONTACT_FORM_RECIPIENTS").unwrap_or(DEFAULT_RECIPIENTS.into());
        let recipient_list = parse_recipient_list(&recipients)
            .with_context(|| format!("Invalid CONTACT_FORM_RECIPIENTS: {recipients}"))?;

        let mail_transport = match lookup("MAIL_TRANSPORT").as_deref() {
            None | Some("smtp") => MailTransportKind::Smtp,
            Some("outbox") => MailTransportKind::Outbox,
            Some(other) => bail!("Invalid MAIL_TRANSPORT {other}, expected smtp or outbox"),
        };

        Ok(Self {
            recipient_list,
            smtp_url: lookup("SMTP_URL").unwrap_or(DEFAULT_SMTP_URL.into()),
            mail_transport,
            recaptcha_site_key: lookup("RECAPTCHA_SITE_KEY").unwrap_or_default(),
            recaptcha_verify_url: lookup("RECAPTCHA_VERIFY_URL")
                .unwrap_or(RECAPTCHA_VERIFY_URL.into()),
            recaptcha_testing: lookup("RECAPTCHA_TESTING")
                .is_some_and(|value| matches!(value.to_lowercase().as_str(), "true" | "1" | "yes")),
        })
    }
}

pub fn parse_recipient_list(recipients: &str) -> anyhow::Result<Vec<String>> {
    let recipient_list = recipients
        .split(',')
        .map(str::trim)
        .filter(|recipient| !recipient.is_empty())
        .map(|recipient| {
            recipient
                .parse::<Mailbox>()
                .with_context(|| format!("Invalid recipient {recipient}"))?;
            Ok(recipient.to_string())
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    if recipient_list.is_empty() {
        bail!("At least one recipient is required");
    }
    Ok(recipient_list)
}
