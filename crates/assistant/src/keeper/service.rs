//! The token keeper
//!
//! Owns the backend credential and answers capability requests from the
//! agents. Every failure is converted into a response envelope here; nothing
//! escapes across the message boundary as an error.

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::credential::{Credential, CredentialStore};
use super::identity::IdentityProvider;
use super::transport::{HttpRequest, HttpResponse, HttpTransport};
use crate::protocol::{
    AuthStatus, Method, Notification, OAuthResult, ProxyRequest, ProxyResponse, Request,
    Response, TokenPresence, UserProfile,
};

const OAUTH_CALLBACK_PATH: &str = "/api/oauth/callback";
const USERS_ME_PATH: &str = "/api/users/me";

/// Why the extension lifecycle hook fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallReason {
    Install,
    Update,
    BrowserUpdate,
}

/// Outcome of handling one request
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub response: Response,
    /// Notification to fan out to page agents after replying
    pub broadcast: Option<Notification>,
}

impl Dispatch {
    fn reply(response: impl Into<Response>) -> Self {
        Self {
            response: response.into(),
            broadcast: None,
        }
    }

    /// Reply to a sign-in; only a successful one is broadcast
    pub fn sign_in(result: OAuthResult) -> Self {
        let broadcast = result.success.then_some(Notification::AuthStateChanged);
        Self {
            response: result.into(),
            broadcast,
        }
    }
}

/// Backend answer to the OAuth callback
#[derive(Debug, Deserialize)]
struct CallbackResponse {
    access_token: Option<String>,
    token_type: Option<String>,
}

pub struct TokenKeeper {
    api_base_url: String,
    store: Arc<dyn CredentialStore>,
    transport: Arc<dyn HttpTransport>,
    identity: Arc<dyn IdentityProvider>,
}

impl TokenKeeper {
    pub fn new(
        api_base_url: impl Into<String>,
        store: Arc<dyn CredentialStore>,
        transport: Arc<dyn HttpTransport>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let mut api_base_url = api_base_url.into();
        while api_base_url.ends_with('/') {
            api_base_url.pop();
        }
        Self {
            api_base_url,
            store,
            transport,
            identity,
        }
    }

    /// Stored credential; a failing store reads as signed out
    fn credential(&self) -> Option<Credential> {
        match self.store.get() {
            Ok(credential) => credential,
            Err(e) => {
                error!("Failed to read stored credential: {:#}", e);
                None
            }
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.api_base_url, endpoint)
    }

    /// Sign in interactively and store the backend credential
    pub fn initiate_oauth(&self) -> OAuthResult {
        info!("Starting OAuth flow");

        let provider_token = match self.identity.request_token() {
            Ok(token) => token,
            Err(e) => {
                warn!("Identity provider sign-in failed: {}", e);
                return OAuthResult::failed(e.to_string());
            }
        };

        let credential = match self.exchange_provider_token(&provider_token) {
            Ok(credential) => credential,
            Err(e) => {
                warn!("Backend token exchange failed: {}", e);
                return OAuthResult::failed(e);
            }
        };

        if let Err(e) = self.store.set(credential) {
            error!("Failed to store credential: {:#}", e);
            return OAuthResult::failed(format!("Failed to store credential: {}", e));
        }

        info!("OAuth flow completed");
        OAuthResult::succeeded()
    }

    fn exchange_provider_token(&self, provider_token: &str) -> Result<Credential, String> {
        let body = serde_json::json!({ "token": provider_token }).to_string();
        let request = HttpRequest::new(Method::Post, self.url(OAUTH_CALLBACK_PATH))
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .body(body);

        let response = self
            .transport
            .send(&request)
            .map_err(|e| format!("{:#}", e))?;
        debug!("Backend OAuth callback status: {}", response.status);

        if !response.is_success() {
            return Err(error_text(&response));
        }

        let parsed: CallbackResponse = serde_json::from_str(&response.body)
            .map_err(|e| format!("Invalid backend token response: {}", e))?;
        let token = parsed
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| "No access token in backend response".to_string())?;

        Ok(Credential::new(token, parsed.token_type))
    }

    /// Verify the stored credential with the backend.
    ///
    /// A rejected credential is reported, not cleared.
    pub fn check_auth(&self) -> AuthStatus {
        let Some(credential) = self.credential() else {
            debug!("No stored credential");
            return AuthStatus::unauthenticated();
        };
        debug!(
            "Verifying credential obtained at {}",
            credential.obtained_at().to_rfc3339()
        );

        let request = HttpRequest::new(Method::Get, self.url(USERS_ME_PATH))
            .header("Authorization", credential.authorization())
            .header("Accept", "application/json");

        let response = match self.transport.send(&request) {
            Ok(response) => response,
            Err(e) => {
                warn!("Auth check request failed: {:#}", e);
                return AuthStatus::invalid(format!("{:#}", e));
            }
        };

        if !response.is_success() {
            warn!("Stored credential rejected with status {}", response.status);
            return AuthStatus::invalid(error_text(&response));
        }

        match serde_json::from_str::<UserProfile>(&response.body) {
            Ok(user) => AuthStatus::authenticated(user),
            Err(e) => AuthStatus::invalid(format!("Invalid user profile: {}", e)),
        }
    }

    /// Perform a backend call with the stored credential attached
    pub fn proxy_fetch(&self, request: &ProxyRequest) -> ProxyResponse {
        let Some(credential) = self.credential() else {
            return ProxyResponse::no_auth_token();
        };

        if !request.endpoint.starts_with('/') {
            return ProxyResponse::failure(format!(
                "Invalid endpoint '{}': must be a path starting with '/'",
                request.endpoint
            ));
        }

        let options = &request.options;
        let mut http = HttpRequest::new(options.method, self.url(&request.endpoint));
        for (name, value) in &options.headers {
            if name.eq_ignore_ascii_case("authorization") || name.eq_ignore_ascii_case("accept") {
                continue;
            }
            http = http.header(name.clone(), value.clone());
        }
        if let Some(body) = &options.body {
            if http.header_value("content-type").is_none() {
                http = http.header("Content-Type", "application/json");
            }
            http = http.body(body.clone());
        }
        http = http
            .header("Authorization", credential.authorization())
            .header("Accept", "application/json");

        debug!("Proxying {} {}", options.method.as_str(), request.endpoint);
        let response = match self.transport.send(&http) {
            Ok(response) => response,
            Err(e) => {
                warn!("API request failed: {:#}", e);
                return ProxyResponse::failure(format!("{:#}", e));
            }
        };

        if !response.is_success() {
            return ProxyResponse::failure(error_text(&response));
        }

        if response.body.trim().is_empty() {
            return ProxyResponse::success(None);
        }

        match serde_json::from_str(&response.body) {
            Ok(data) => ProxyResponse::success(Some(data)),
            Err(e) => ProxyResponse::failure(format!("Invalid JSON response: {}", e)),
        }
    }

    pub fn has_token(&self) -> TokenPresence {
        TokenPresence {
            has_token: self.credential().is_some(),
        }
    }

    /// Lifecycle hook: every install or update forces a fresh sign-in
    pub fn on_installed(&self, reason: InstallReason) {
        info!("Extension lifecycle event: {:?}, clearing credential", reason);
        if let Err(e) = self.store.clear() {
            error!("Failed to clear credential: {:#}", e);
        }
    }

    /// Handle one typed request
    pub fn handle(&self, request: Request) -> Dispatch {
        debug!("Received message: {}", request.action());
        match request {
            Request::GetAuthToken => Dispatch::reply(self.has_token()),
            Request::CheckAuth => Dispatch::reply(self.check_auth()),
            Request::Fetch(proxy) => Dispatch::reply(self.proxy_fetch(&proxy)),
            Request::InitiateOAuth => Dispatch::sign_in(self.initiate_oauth()),
        }
    }

    /// Decode a serialized request; malformed input yields the error reply
    pub fn parse(raw: &str) -> Result<Request, Response> {
        serde_json::from_str::<Request>(raw).map_err(|e| {
            warn!("Rejecting malformed message: {}", e);
            ProxyResponse::failure(format!("Malformed message: {}", e)).into()
        })
    }

    /// Handle a serialized request and return the serialized reply
    pub fn handle_raw(&self, raw: &str) -> (String, Option<Notification>) {
        match Self::parse(raw) {
            Ok(request) => {
                let dispatch = self.handle(request);
                (encode(&dispatch.response), dispatch.broadcast)
            }
            Err(response) => (encode(&response), None),
        }
    }
}

/// Serialize a reply for the message channel
pub fn encode(response: &Response) -> String {
    serde_json::to_string(response).unwrap_or_else(|e| {
        error!("Failed to encode response: {}", e);
        r#"{"ok":false,"error":"Failed to encode response"}"#.to_string()
    })
}

/// Error string for a non-2xx response: its body, or the status if empty
fn error_text(response: &HttpResponse) -> String {
    if response.body.trim().is_empty() {
        format!("HTTP error! status: {}", response.status)
    } else {
        response.body.clone()
    }
}
