//! Proxy-issued short-lived certificate provider.
//!
//! When exercised, the provider:
//!
//! 1. prompts for the operator's secret,
//! 2. generates a fresh Ed25519 key pair,
//! 3. asks the web proxy to sign the public key for `ttl`,
//! 4. persists the key and certificate to the local store,
//! 5. authenticates with the certificate.
//!
//! Nothing happens at construction time. The issued credential is cached
//! for the rest of the invocation so a proxy hop and a target hop share one
//! prompt.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use russh::client;
use russh::keys::{Algorithm, Certificate, PrivateKey, PublicKey};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::tsh::config::DEFAULT_PROXY_TIMEOUT_SECS;
use crate::tsh::error::TshError;
use crate::tsh::session::SshClientHandler;
use crate::tsh::store::LocalKeyStore;
use crate::tsh::types::Identity;

use super::prompt::SecretPrompt;
use super::traits::AuthStrategy;

/// Path of the certificate signing endpoint on the web proxy.
const CERTS_PATH: &str = "/v1/webapi/ssh/certs";

/// What is sent to the proxy for signing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    pub identity: Identity,
    /// Public key in OpenSSH format
    pub public_key: String,
    pub ttl: Duration,
    pub requested_at: DateTime<Utc>,
}

impl CertificateRequest {
    pub fn new(
        identity: Identity,
        public_key: &PublicKey,
        ttl: Duration,
        requested_at: DateTime<Utc>,
    ) -> Result<Self, String> {
        let public_key = public_key
            .to_openssh()
            .map_err(|e| format!("failed to encode public key: {}", e))?;
        Ok(Self {
            identity,
            public_key,
            ttl,
            requested_at,
        })
    }

    /// End of the validity window requested from the proxy.
    pub fn expires_at(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.requested_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// TTL in nanoseconds, the unit the proxy expects.
    fn ttl_nanos(&self) -> u64 {
        u64::try_from(self.ttl.as_nanos()).unwrap_or(u64::MAX)
    }
}

/// A credential obtained from the proxy.
#[derive(Debug)]
pub struct IssuedCredential {
    pub key: Arc<PrivateKey>,
    pub certificate: Certificate,
    pub expires_at: DateTime<Utc>,
}

/// Something that exchanges (identity, secret, public key) for a certificate.
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    async fn sign(&self, request: &CertificateRequest, secret: &str)
    -> Result<Certificate, String>;
}

#[derive(Serialize)]
struct CreateCertRequest<'a> {
    user: &'a str,
    password: &'a str,
    pub_key: &'a str,
    ttl: u64,
}

#[derive(Deserialize)]
struct CreateCertResponse {
    cert: String,
}

/// Certificate authority reached through the proxy's web API.
pub struct WebProxyAuthority {
    base_url: String,
    client: reqwest::Client,
}

impl WebProxyAuthority {
    pub fn new(proxy_address: &str, timeout: Duration) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| format!("failed to build HTTP client: {}", e))?;
        Ok(Self {
            base_url: proxy_base_url(proxy_address),
            client,
        })
    }
}

/// Normalise a proxy address into a base URL, defaulting to `https`.
pub(crate) fn proxy_base_url(address: &str) -> String {
    let address = address.trim().trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("https://{}", address)
    }
}

#[async_trait]
impl CertificateAuthority for WebProxyAuthority {
    async fn sign(
        &self,
        request: &CertificateRequest,
        secret: &str,
    ) -> Result<Certificate, String> {
        let url = format!("{}{}", self.base_url, CERTS_PATH);
        debug!("Requesting certificate for {} from {}", request.identity, url);

        let body = CreateCertRequest {
            user: request.identity.as_str(),
            password: secret,
            pub_key: &request.public_key,
            ttl: request.ttl_nanos(),
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("request to {} failed: {}", url, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(format!("proxy returned {}: {}", status, text.trim()));
        }

        let payload: CreateCertResponse = response
            .json()
            .await
            .map_err(|e| format!("invalid response from proxy: {}", e))?;

        Certificate::from_openssh(payload.cert.trim())
            .map_err(|e| format!("proxy returned an invalid certificate: {}", e))
    }
}

/// Deferred provider that obtains a certificate from the proxy on first use.
pub struct CertificateAuth {
    identity: Identity,
    proxy: Option<String>,
    ttl: Duration,
    timeout: Duration,
    store: Option<LocalKeyStore>,
    prompt: Box<dyn SecretPrompt>,
    authority: Option<Box<dyn CertificateAuthority>>,
    issued: OnceCell<IssuedCredential>,
}

impl CertificateAuth {
    /// Bind the provider. Performs no I/O and never prompts.
    pub fn new(
        store: Option<LocalKeyStore>,
        identity: Identity,
        prompt: Box<dyn SecretPrompt>,
        proxy: Option<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            identity,
            proxy: proxy.filter(|p| !p.is_empty()),
            ttl,
            timeout: Duration::from_secs(DEFAULT_PROXY_TIMEOUT_SECS),
            store,
            prompt,
            authority: None,
            issued: OnceCell::new(),
        }
    }

    /// Bound the proxy round-trip.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Use a specific authority instead of the proxy's web API.
    pub fn with_authority(mut self, authority: Box<dyn CertificateAuthority>) -> Self {
        self.authority = Some(authority);
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    /// Credential issued earlier in this invocation, if any.
    pub fn issued(&self) -> Option<&IssuedCredential> {
        self.issued.get()
    }

    /// Issue (or return the already issued) credential.
    pub async fn issue(&self) -> Result<&IssuedCredential, TshError> {
        self.issued.get_or_try_init(|| self.issue_new()).await
    }

    async fn issue_new(&self) -> Result<IssuedCredential, TshError> {
        let Some(proxy) = self.proxy.as_deref() else {
            return Err(TshError::CertificateIssuance {
                proxy: "<none>".to_string(),
                reason: "no web proxy configured (set --web-proxy)".to_string(),
            });
        };
        let issuance_error = |reason: String| TshError::CertificateIssuance {
            proxy: proxy.to_string(),
            reason,
        };

        let secret = self.prompt.secret().await.map_err(issuance_error)?;

        let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519)
            .map_err(|e| issuance_error(format!("failed to generate key: {}", e)))?;
        let request =
            CertificateRequest::new(self.identity.clone(), key.public_key(), self.ttl, Utc::now())
                .map_err(issuance_error)?;

        let certificate = match &self.authority {
            Some(authority) => authority.sign(&request, &secret).await,
            None => {
                let authority =
                    WebProxyAuthority::new(proxy, self.timeout).map_err(issuance_error)?;
                authority.sign(&request, &secret).await
            }
        }
        .map_err(issuance_error)?;

        info!(
            "Obtained certificate for {} valid until {}",
            self.identity,
            request.expires_at()
        );

        if let Some(store) = &self.store
            && let Err(e) = store
                .save(self.identity.as_str(), &key, &certificate)
                .await
        {
            warn!("Issued certificate could not be persisted: {}", e);
        }

        Ok(IssuedCredential {
            key: Arc::new(key),
            certificate,
            expires_at: request.expires_at(),
        })
    }
}

#[async_trait]
impl AuthStrategy for CertificateAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<SshClientHandler>,
        username: &str,
    ) -> Result<bool, TshError> {
        let issued = self.issue().await?;

        let result = handle
            .authenticate_openssh_cert(
                username,
                Arc::clone(&issued.key),
                issued.certificate.clone(),
            )
            .await
            .map_err(|e| {
                TshError::Authentication(format!("certificate authentication failed: {}", e))
            })?;

        Ok(result.success())
    }

    fn name(&self) -> &'static str {
        "certificate"
    }
}
