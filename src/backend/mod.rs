pub mod bedrock;
#[cfg(test)]
pub mod scripted;

use crate::{
    config::BedrockConfig,
    error::Result,
    models::{BackendRequest, BackendResponse, ChatInvocation, TextStream},
};
use async_trait::async_trait;
use std::env;

pub use bedrock::BedrockBackend;

/// The remote model service. Failures must carry enough text for
/// [`crate::classifier`] to recognise them.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn invoke(&self, request: BackendRequest) -> Result<BackendResponse>;

    /// Resolves once the reply has started streaming; later failures arrive
    /// as items of the returned stream.
    async fn open_chat(&self, invocation: ChatInvocation) -> Result<TextStream>;
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn ensure_credential(&self) -> bool;
}

/// Accepts explicit keys from config, static keys in the environment, or a
/// named AWS profile.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentials {
    config: BedrockConfig,
}

impl EnvCredentials {
    pub fn new(config: BedrockConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentials {
    async fn ensure_credential(&self) -> bool {
        if self.config.access_key.is_some() && self.config.secret_key.is_some() {
            return true;
        }

        let has_env = |name: &str| env::var(name).map_or(false, |v| !v.trim().is_empty());
        if has_env("AWS_ACCESS_KEY_ID") && has_env("AWS_SECRET_ACCESS_KEY") {
            log::debug!("Using AWS credentials from the environment");
            return true;
        }
        if has_env("AWS_PROFILE") {
            log::debug!("Using AWS profile from the environment");
            return true;
        }

        log::warn!("No AWS credentials in config or environment");
        false
    }
}

/// A credential check that always returns the same answer.
#[derive(Debug, Clone, Copy)]
pub struct StaticCredential(pub bool);

#[async_trait]
impl CredentialProvider for StaticCredential {
    async fn ensure_credential(&self) -> bool {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn explicit_keys_satisfy_credential_check() {
        let creds = EnvCredentials::new(BedrockConfig::new().with_credentials("AKIA", "secret"));
        assert!(creds.ensure_credential().await);
    }

    #[tokio::test]
    async fn static_credential_reports_its_value() {
        assert!(StaticCredential(true).ensure_credential().await);
        assert!(!StaticCredential(false).ensure_credential().await);
    }
}
