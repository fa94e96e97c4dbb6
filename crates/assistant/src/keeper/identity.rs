//! Identity provider sign-in
//!
//! The keeper obtains a provider access token interactively, then trades
//! it with the backend for a backend credential. [`GoogleIdentity`] runs the
//! OAuth2 authorization code flow with a loopback redirect: it opens the
//! consent page in the browser and waits (bounded) for the redirect.

use log::{debug, info, warn};
use serde::Deserialize;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;
use url::Url;

use super::transport::{HttpRequest, HttpTransport};
use crate::config::GoogleCredentials;
use crate::protocol::Method;

/// Scopes requested during consent
pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/gmail.modify",
    "https://www.googleapis.com/auth/gmail.labels",
    "https://www.googleapis.com/auth/userinfo.profile",
    "https://www.googleapis.com/auth/userinfo.email",
];

/// Failure to obtain a provider token
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Sign-in was denied: {0}")]
    Denied(String),

    #[error("Identity provider unavailable: {0}")]
    Unavailable(String),

    #[error("Timed out waiting for sign-in after {0:?}")]
    TimedOut(Duration),

    #[error("No token received from identity provider")]
    NoToken,
}

/// Source of interactive provider tokens
pub trait IdentityProvider: Send + Sync {
    /// Run the consent flow and return a provider access token
    fn request_token(&self) -> Result<String, IdentityError>;
}

/// Token response from Google
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Result parsed from the loopback redirect
#[derive(Debug, PartialEq, Eq)]
enum Callback {
    Code(String),
    Error(String),
    Missing,
}

/// Google OAuth2 loopback flow
pub struct GoogleIdentity {
    credentials: GoogleCredentials,
    transport: Arc<dyn HttpTransport>,
    wait_timeout: Duration,
}

impl GoogleIdentity {
    const AUTH_URL: &'static str = "https://accounts.google.com/o/oauth2/v2/auth";
    const TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";

    /// Port range to try for the loopback redirect
    const PORT_RANGE_START: u16 = 8080;
    const PORT_RANGE_END: u16 = 8090;

    pub fn new(
        credentials: GoogleCredentials,
        transport: Arc<dyn HttpTransport>,
        wait_timeout: Duration,
    ) -> Self {
        Self {
            credentials,
            transport,
            wait_timeout,
        }
    }

    fn consent_url(&self, redirect_uri: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=online&prompt=consent",
            Self::AUTH_URL,
            urlencoding::encode(&self.credentials.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&SCOPES.join(" ")),
        )
    }

    fn bind_loopback(&self) -> Result<(TcpListener, u16), IdentityError> {
        for port in Self::PORT_RANGE_START..=Self::PORT_RANGE_END {
            if let Ok(listener) = TcpListener::bind(("127.0.0.1", port)) {
                return Ok((listener, port));
            }
        }
        Err(IdentityError::Unavailable(format!(
            "could not bind a loopback port in {}-{}",
            Self::PORT_RANGE_START,
            Self::PORT_RANGE_END
        )))
    }

    /// Wait for the redirect, giving up after `wait_timeout`
    fn wait_for_callback(&self, listener: TcpListener, port: u16) -> Result<String, IdentityError> {
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let outcome = accept_callback(&listener);
            let _ = tx.send(outcome);
        });

        let outcome = match rx.recv_timeout(self.wait_timeout) {
            Ok(outcome) => outcome,
            Err(_) => {
                // Unblock the accept thread so it releases the port.
                let _ = TcpStream::connect(("127.0.0.1", port));
                return Err(IdentityError::TimedOut(self.wait_timeout));
            }
        };

        match outcome {
            Callback::Code(code) => Ok(code),
            Callback::Error(err) => Err(IdentityError::Denied(err)),
            Callback::Missing => Err(IdentityError::Denied(
                "no authorization code in redirect".to_string(),
            )),
        }
    }

    fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<String, IdentityError> {
        let request = HttpRequest::new(Method::Post, Self::TOKEN_URL)
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri),
            ]);

        let response = self
            .transport
            .send(&request)
            .map_err(|e| IdentityError::Unavailable(format!("{:#}", e)))?;

        let token: TokenResponse = serde_json::from_str(&response.body).map_err(|e| {
            IdentityError::Unavailable(format!("unreadable token response: {}", e))
        })?;

        if !response.is_success() || token.error.is_some() {
            let reason = token
                .error_description
                .or(token.error)
                .unwrap_or_else(|| format!("HTTP {}", response.status));
            return Err(IdentityError::Denied(reason));
        }

        token
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or(IdentityError::NoToken)
    }
}

impl IdentityProvider for GoogleIdentity {
    fn request_token(&self) -> Result<String, IdentityError> {
        let (listener, port) = self.bind_loopback()?;
        let redirect_uri = format!("http://127.0.0.1:{}", port);
        let consent_url = self.consent_url(&redirect_uri);

        info!("Opening browser for Google sign-in");
        if let Err(e) = open::that(&consent_url) {
            warn!("Failed to open browser: {}. Visit {} manually.", e, consent_url);
        }

        let code = self.wait_for_callback(listener, port)?;
        debug!("Received authorization code, exchanging for provider token");
        self.exchange_code(&code, &redirect_uri)
    }
}

fn accept_callback(listener: &TcpListener) -> Callback {
    let Ok((mut stream, _)) = listener.accept() else {
        return Callback::Missing;
    };

    let mut request_line = String::new();
    if BufReader::new(&stream).read_line(&mut request_line).is_err() {
        return Callback::Missing;
    }

    let callback = parse_callback(&request_line);
    let (status, body) = match callback {
        Callback::Code(_) => ("200 OK", "Signed in. You can close this window."),
        _ => ("400 Bad Request", "Sign-in failed. Please try again."),
    };
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n<html><body><h1>{}</h1></body></html>",
        status, body
    );
    let _ = stream.write_all(response.as_bytes());

    callback
}

/// Parse `GET /?code=...&scope=... HTTP/1.1`
fn parse_callback(request_line: &str) -> Callback {
    let Some(path) = request_line.split_whitespace().nth(1) else {
        return Callback::Missing;
    };
    let Ok(url) = Url::parse(&format!("http://127.0.0.1{}", path)) else {
        return Callback::Missing;
    };

    let mut code = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "error" => return Callback::Error(value.into_owned()),
            "code" if !value.is_empty() => code = Some(value.into_owned()),
            _ => {}
        }
    }
    code.map_or(Callback::Missing, Callback::Code)
}
