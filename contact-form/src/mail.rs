use crate::secrets::SecretRepository;
use async_once_cell::OnceCell;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::{Credentials, Mechanism},
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use serde::Deserialize;
use std::{
    fmt::Display,
    sync::{Arc, Mutex},
};
use tracing::info;

pub const SMTP_CREDENTIALS_NAME: &str = "smtp-credentials";

/// A fully prepared notification, ready to be handed to a [MailTransport].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub from_header: String,
    pub subject: String,
    pub body: String,
    pub recipients: Vec<String>,
}

impl OutboundMessage {
    fn into_email(self) -> Result<Message, MailTransportError> {
        let from: Mailbox = self
            .from_header
            .parse()
            .map_err(|_| MailTransportError::InvalidAddress(self.from_header.clone()))?;
        let mut builder = Message::builder()
            .from(from)
            .subject(self.subject)
            .header(ContentType::TEXT_PLAIN);
        for recipient in &self.recipients {
            let to: Mailbox = recipient
                .parse()
                .map_err(|_| MailTransportError::InvalidAddress(recipient.clone()))?;
            builder = builder.to(to);
        }
        builder
            .body(self.body)
            .map_err(|error| MailTransportError::BuildError(error.to_string()))
    }
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> Result<(), MailTransportError>;
}

pub struct SmtpMailTransport<SecretRepositoryT: SecretRepository> {
    secrets_repository: SecretRepositoryT,
    smtp_url: String,
    mailer: OnceCell<AsyncSmtpTransport<Tokio1Executor>>,
}

impl<SecretRepositoryT: SecretRepository> SmtpMailTransport<SecretRepositoryT> {
    pub fn new(secrets_repository: SecretRepositoryT, smtp_url: impl Into<String>) -> Self {
        Self {
            secrets_repository,
            smtp_url: smtp_url.into(),
            mailer: Default::default(),
        }
    }

    async fn initialise_mailer(
        &self,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, lambda_http::Error> {
        info!("initialise_mailer: Connecting to {}", self.smtp_url);
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::from_url(&self.smtp_url)?
            .authentication(vec![Mechanism::Plain]);

        // Credentials are only ever sent over TLS.
        if self.smtp_url.starts_with("smtps://") {
            let parsed_credentials: SmtpCredentials = self
                .secrets_repository
                .get_secret(SMTP_CREDENTIALS_NAME)
                .await?;
            builder = builder.credentials(Credentials::new(
                parsed_credentials.username,
                parsed_credentials.password,
            ));
        }

        Ok(builder.build())
    }
}

#[async_trait]
impl<SecretRepositoryT: SecretRepository> MailTransport for SmtpMailTransport<SecretRepositoryT> {
    async fn send(&self, message: OutboundMessage) -> Result<(), MailTransportError> {
        let email = message.into_email()?;
        let mailer = self
            .mailer
            .get_or_try_init(self.initialise_mailer())
            .await
            .map_err(|error| MailTransportError::ConnectionError(error.to_string()))?;
        mailer
            .send(email)
            .await
            .map_err(|error| MailTransportError::SendError(error.to_string()))?;
        Ok(())
    }
}

/// Keeps every message in memory instead of delivering it. Clones share the same outbox.
#[derive(Clone, Default)]
pub struct Outbox(Arc<Mutex<Vec<OutboundMessage>>>);

impl Outbox {
    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<OutboundMessage>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl MailTransport for Outbox {
    async fn send(&self, message: OutboundMessage) -> Result<(), MailTransportError> {
        info!("Captured message \"{}\" in outbox", message.subject);
        self.lock().push(message);
        Ok(())
    }
}

#[async_trait]
impl<MailTransportT: MailTransport + ?Sized> MailTransport for Arc<MailTransportT> {
    async fn send(&self, message: OutboundMessage) -> Result<(), MailTransportError> {
        self.as_ref().send(message).await
    }
}

#[derive(Deserialize)]
struct SmtpCredentials {
    #[serde(rename = "SMTP_USERNAME")]
    username: String,
    #[serde(rename = "SMTP_PASSWORD")]
    password: String,
}

#[derive(Debug)]
pub enum MailTransportError {
    InvalidAddress(String),
    BuildError(String),
    ConnectionError(String),
    SendError(String),
}

impl Display for MailTransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MailTransportError::InvalidAddress(address) => write!(f, "Invalid address {address}"),
            MailTransportError::BuildError(error) => write!(f, "Error building message: {error}"),
            MailTransportError::ConnectionError(error) => {
                write!(f, "Unable to connect to SMTP server: {error}")
            }
            MailTransportError::SendError(error) => write!(f, "Error sending message: {error}"),
        }
    }
}

impl std::error::Error for MailTransportError {}
