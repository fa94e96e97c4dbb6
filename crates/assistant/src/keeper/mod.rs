//! Token keeper (background context)
//!
//! This module provides:
//! - Credential storage behind a get/set/clear trait
//! - Identity provider sign-in (Google OAuth loopback flow)
//! - HTTP transport for backend calls
//! - The keeper service and the thread that hosts it

mod credential;
mod identity;
mod runtime;
mod service;
mod transport;

pub use credential::{
    CREDENTIAL_FILE, Credential, CredentialStore, DEFAULT_TOKEN_TYPE, FileCredentialStore,
    MemoryCredentialStore,
};
pub use identity::{GoogleIdentity, IdentityError, IdentityProvider, SCOPES};
pub use runtime::{KeeperGone, KeeperHandle, KeeperRuntime};
pub use service::{Dispatch, InstallReason, TokenKeeper};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, UreqTransport};
