//! Credential providers and the chain that orders them.
//!
//! Each provider implements [`AuthStrategy`]. Constructing one is the cheap
//! descriptor step; [`AuthStrategy::authenticate`] is the exercise step and
//! is only invoked by the transport.
//!
//! # Providers
//!
//! - [`AgentAuth`]: identities held by a running SSH agent
//! - [`LocalAgentAuth`]: credentials persisted in the local store
//! - [`CertificateAuth`]: short-lived certificate issued by the web proxy
//!
//! # Example
//!
//! ```ignore
//! let agent = connect_agent(&settings.agent).await?;
//! let local = LocalAgentAuth::load(&store).await?;
//! let prompt = password_from_console(&settings.identity);
//! let certificate = CertificateAuth::new(
//!     Some(store),
//!     settings.identity.clone(),
//!     Box::new(prompt),
//!     settings.web_proxy.clone(),
//!     settings.login_ttl,
//! );
//!
//! let chain = AuthChain::assemble(Some(agent), Some(local), certificate);
//! ```

mod agent;
pub mod certificate;
mod chain;
mod local;
mod prompt;
mod traits;

pub use agent::{AgentAuth, AgentConnection, connect_agent};
pub use certificate::{
    CertificateAuth, CertificateAuthority, CertificateRequest, IssuedCredential,
    WebProxyAuthority,
};
pub use chain::{AuthChain, admit};
pub use local::LocalAgentAuth;
pub use prompt::{ConsolePrompt, SecretPrompt, password_from_console};
pub use traits::AuthStrategy;
