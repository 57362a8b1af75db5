use crate::EnvironmentError;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use serde::de::DeserializeOwned;

const AWS_REGION: &str = "eu-north-1";

/// Named JSON secrets, such as SMTP credentials.
#[async_trait]
pub trait SecretRepository: Send + Sync {
    async fn open() -> Self;

    async fn get_secret<T: DeserializeOwned>(
        &self,
        name: &'static str,
    ) -> Result<T, lambda_http::Error>;
}

fn parse_secret<T: DeserializeOwned>(
    name: &'static str,
    value: &str,
) -> Result<T, EnvironmentError> {
    serde_json::from_str(value)
        .map_err(|error| EnvironmentError::MalformedSecret(name, error.to_string()))
}

#[derive(Clone)]
pub struct AwsSecretsManagerSecretRepository(aws_sdk_secretsmanager::Client);

#[async_trait]
impl SecretRepository for AwsSecretsManagerSecretRepository {
    async fn open() -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(AWS_REGION);
        if let Ok(url) = std::env::var("AWS_ENDPOINT_URL") {
            loader = loader.endpoint_url(url);
        }
        let config = loader.load().await;
        Self(aws_sdk_secretsmanager::Client::new(&config))
    }

    async fn get_secret<T: DeserializeOwned>(
        &self,
        name: &'static str,
    ) -> Result<T, lambda_http::Error> {
        let output = self.0.get_secret_value().secret_id(name).send().await?;
        let value = output
            .secret_string()
            .ok_or(EnvironmentError::MissingSecret(name))?;
        Ok(parse_secret(name, value)?)
    }
}


#[cfg(test)]
mod tests {
    use super::{test_support::FakeSecretRepository, SecretRepository};
    use googletest::prelude::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Credentials {
        #[serde(rename = "SMTP_USERNAME")]
        username: String,
    }

    #[tokio::test]
    async fn reads_json_secret() -> Result<()> {
        let repository = FakeSecretRepository::open().await;
        repository.add_secret("credentials", r#"{ "SMTP_USERNAME": "user" }"#);

        verify_that!(
            repository.get_secret::<Credentials>("credentials").await,
            ok(field!(Credentials.username, eq("user")))
        )
    }

    #[tokio::test]
    async fn names_secret_with_malformed_json() -> Result<()> {
        let repository = FakeSecretRepository::open().await;
        repository.add_secret("credentials", "not json");

        let result = repository.get_secret::<Credentials>("credentials").await;

        verify_that!(
            result.map_err(|error| error.to_string()),
            err(contains_substring("Malformed secret credentials"))
        )
    }

    #[tokio::test]
    async fn reports_missing_secret() -> Result<()> {
        let repository = FakeSecretRepository::open().await;

        let result = repository.get_secret::<Credentials>("credentials").await;

        verify_that!(
            result.map_err(|error| error.to_string()),
            err(eq("Missing secret credentials"))
        )
    }
}
