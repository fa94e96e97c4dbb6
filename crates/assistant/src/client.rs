//! Agent-side wrapper around the keeper's message API
//!
//! Every call is bounded by a timeout, so an agent never waits forever on a
//! keeper that stopped answering. Transport failures are folded into the
//! same envelopes the keeper returns, which keeps agent code uniform.

use log::warn;
use serde::de::DeserializeOwned;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use crate::keeper::KeeperHandle;
use crate::protocol::{
    AuthStatus, Notification, OAuthResult, ProxyRequest, ProxyResponse, Request, TokenPresence,
};

/// Failure to get an answer from the keeper
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Token keeper is not running")]
    Disconnected,

    #[error("No response from token keeper after {0:?}")]
    TimedOut(Duration),

    #[error("Malformed message: {0}")]
    Protocol(#[from] serde_json::Error),
}

#[derive(Clone)]
pub struct KeeperClient {
    handle: KeeperHandle,
    timeout: Duration,
    oauth_timeout: Duration,
}

impl KeeperClient {
    /// # Arguments
    /// * `timeout` - Bound on ordinary requests
    /// * `oauth_timeout` - Bound on `initiate_oauth`, which waits for the user
    pub fn new(handle: KeeperHandle, timeout: Duration, oauth_timeout: Duration) -> Self {
        Self {
            handle,
            timeout,
            oauth_timeout,
        }
    }

    /// Send a request and decode the reply
    pub fn call<R: DeserializeOwned>(
        &self,
        request: &Request,
        timeout: Duration,
    ) -> Result<R, ClientError> {
        let payload = serde_json::to_string(request)?;
        let started = Instant::now();
        let rx = self
            .handle
            .post(payload, timeout)
            .map_err(|_| ClientError::Disconnected)?;

        let reply = rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => ClientError::TimedOut(timeout),
            // The keeper drops requests that outlive their deadline
            RecvTimeoutError::Disconnected if started.elapsed() >= timeout => {
                ClientError::TimedOut(timeout)
            }
            RecvTimeoutError::Disconnected => ClientError::Disconnected,
        })?;
        Ok(serde_json::from_str(&reply)?)
    }

    pub fn check_auth(&self) -> AuthStatus {
        self.call(&Request::CheckAuth, self.timeout)
            .unwrap_or_else(|e| {
                warn!("Auth check failed: {}", e);
                AuthStatus::invalid(e.to_string())
            })
    }

    pub fn initiate_oauth(&self) -> OAuthResult {
        self.call(&Request::InitiateOAuth, self.oauth_timeout)
            .unwrap_or_else(|e| {
                warn!("Sign-in request failed: {}", e);
                OAuthResult::failed(e.to_string())
            })
    }

    pub fn fetch(&self, request: ProxyRequest) -> ProxyResponse {
        self.call(&Request::Fetch(request), self.timeout)
            .unwrap_or_else(|e| {
                warn!("API request failed: {}", e);
                ProxyResponse::failure(e.to_string())
            })
    }

    /// Whether the keeper holds a credential
    pub fn has_token(&self) -> bool {
        self.call::<TokenPresence>(&Request::GetAuthToken, self.timeout)
            .map(|p| p.has_token)
            .unwrap_or(false)
    }

    /// Register for keeper broadcasts
    pub fn subscribe(&self) -> Result<Subscription, ClientError> {
        let rx = self
            .handle
            .subscribe()
            .map_err(|_| ClientError::Disconnected)?;
        Ok(Subscription { rx })
    }
}

/// Broadcasts addressed to one page agent
pub struct Subscription {
    rx: Receiver<String>,
}

impl Subscription {
    /// Next pending notification without blocking
    pub fn try_next(&self) -> Option<Notification> {
        while let Ok(raw) = self.rx.try_recv() {
            if let Some(notification) = decode(&raw) {
                return Some(notification);
            }
        }
        None
    }

    /// Wait up to `timeout` for the next notification
    pub fn next_timeout(&self, timeout: Duration) -> Option<Notification> {
        let raw = self.rx.recv_timeout(timeout).ok()?;
        decode(&raw)
    }
}

fn decode(raw: &str) -> Option<Notification> {
    match serde_json::from_str(raw) {
        Ok(notification) => Some(notification),
        Err(e) => {
            warn!("Ignoring unrecognized broadcast: {}", e);
            None
        }
    }
}
