//! Assistant crate - Webmail task assistant core
//!
//! This crate provides:
//! - The message contract between the token keeper and the agents
//! - The token keeper: sole holder of the backend credential, sign-in and
//!   authenticated backend proxy
//! - A timeout-bounded client agents use to reach the keeper
//! - Page and popup agents with view-models and HTML rendering
//!
//! The backend credential never leaves the keeper. Agents only ever see
//! token presence and proxied response envelopes.

pub mod agents;
pub mod client;
pub mod config;
pub mod keeper;
pub mod protocol;

pub use agents::{
    ConnectionStatus, MutationSignal, PageAgent, PageHost, PanelView, PopupAgent, PopupView, Toast,
    WaitOutcome,
};
pub use client::{ClientError, KeeperClient, Subscription};
pub use self::config::{AssistantConfig, GoogleCredentials};
pub use keeper::{
    Credential, CredentialStore, FileCredentialStore, GoogleIdentity, HttpTransport,
    IdentityProvider, InstallReason, KeeperHandle, KeeperRuntime, MemoryCredentialStore,
    TokenKeeper, UreqTransport,
};
pub use protocol::{
    AuthStatus, Notification, OAuthResult, ProxyRequest, ProxyResponse, Request, Task, UserProfile,
};
