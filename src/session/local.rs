//! Process-local identity provider
//!
//! Issues UUIDv4 identities for anonymous sign-in. A custom token is accepted
//! verbatim as the identity when it is 1-128 printable ASCII characters.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{EchoesError, Result};
use crate::session::{Identity, IdentityProvider};

const MAX_TOKEN_LEN: usize = 128;

/// Identity provider that needs no network
#[derive(Debug, Clone, Default)]
pub struct LocalIdentityProvider;

impl LocalIdentityProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    async fn create_anonymous_identity(&self) -> Result<Identity> {
        let uid = Uuid::new_v4().to_string();
        tracing::debug!(uid = %uid, "Issued anonymous identity");
        Ok(Identity {
            uid,
            is_anonymous: true,
        })
    }

    async fn sign_in_with_custom_token(&self, token: &str) -> Result<Identity> {
        if token.is_empty() || token.len() > MAX_TOKEN_LEN {
            return Err(EchoesError::Auth(format!(
                "Custom token must be 1-{} characters",
                MAX_TOKEN_LEN
            ))
            .into());
        }
        if !token.chars().all(|c| c.is_ascii_graphic()) {
            return Err(
                EchoesError::Auth("Custom token contains invalid characters".to_string()).into(),
            );
        }
        Ok(Identity {
            uid: token.to_string(),
            is_anonymous: false,
        })
    }
}
