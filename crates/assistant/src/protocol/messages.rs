//! Messages exchanged between agents and the token keeper
//!
//! Every message is plain JSON on the wire. Requests are tagged by an
//! `action` field whose values match what the webmail agents already send
//! (`getAuthToken`, `initiate_oauth`, `checkAuth`, `fetch`).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::models::UserProfile;

/// Error returned by the keeper when a proxied call has no credential
pub const NO_AUTH_TOKEN: &str = "No auth token";

/// A request from an agent to the token keeper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum Request {
    /// Ask whether a credential is stored. Never answered with the token.
    #[serde(rename = "getAuthToken")]
    GetAuthToken,
    #[serde(rename = "initiate_oauth")]
    InitiateOAuth,
    #[serde(rename = "checkAuth")]
    CheckAuth,
    #[serde(rename = "fetch")]
    Fetch(ProxyRequest),
}

impl Request {
    pub fn action(&self) -> &'static str {
        match self {
            Request::GetAuthToken => "getAuthToken",
            Request::InitiateOAuth => "initiate_oauth",
            Request::CheckAuth => "checkAuth",
            Request::Fetch(_) => "fetch",
        }
    }
}

/// A one-way broadcast from the keeper to page agents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum Notification {
    #[serde(rename = "authStateChanged")]
    AuthStateChanged,
}

/// HTTP method of a proxied call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

/// Options of a proxied call, shaped like the `fetch` init object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchOptions {
    #[serde(default)]
    pub method: Method,
    /// Raw request body, usually serialized JSON
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

/// A backend call the keeper performs on an agent's behalf.
///
/// Carries no credential; the keeper attaches it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyRequest {
    pub endpoint: String,
    #[serde(default)]
    pub options: FetchOptions,
}

impl ProxyRequest {
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            options: FetchOptions {
                method,
                ..FetchOptions::default()
            },
        }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Get, endpoint)
    }

    pub fn post(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Post, endpoint)
    }

    pub fn put(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Put, endpoint)
    }

    pub fn delete(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Delete, endpoint)
    }

    /// Attach a JSON body
    pub fn json<T: Serialize>(mut self, body: &T) -> serde_json::Result<Self> {
        self.options.body = Some(serde_json::to_string(body)?);
        Ok(self)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.headers.insert(name.into(), value.into());
        self
    }

    pub fn method(&self) -> Method {
        self.options.method
    }
}

/// Uniform envelope for every proxied call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProxyResponse {
    pub fn success(data: Option<Value>) -> Self {
        Self {
            ok: true,
            data,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn no_auth_token() -> Self {
        Self::failure(NO_AUTH_TOKEN)
    }

    /// Turn the envelope into the payload or the error string
    pub fn into_result(self) -> Result<Value, String> {
        if self.ok {
            Ok(self.data.unwrap_or(Value::Null))
        } else {
            Err(self
                .error
                .unwrap_or_else(|| "Request failed".to_string()))
        }
    }

    /// Decode the payload into a typed value
    pub fn decode<T: DeserializeOwned>(self) -> Result<T, String> {
        let data = self.into_result()?;
        serde_json::from_value(data).map_err(|e| format!("Unexpected response: {}", e))
    }
}

/// Answer to `initiate_oauth`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OAuthResult {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Answer to `checkAuth`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatus {
    pub is_authenticated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuthStatus {
    pub fn authenticated(user: UserProfile) -> Self {
        Self {
            is_authenticated: true,
            user: Some(user),
            error: None,
        }
    }

    pub fn unauthenticated() -> Self {
        Self {
            is_authenticated: false,
            user: None,
            error: None,
        }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            is_authenticated: false,
            user: None,
            error: Some(error.into()),
        }
    }
}

/// Answer to `getAuthToken`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPresence {
    pub has_token: bool,
}

/// Any answer the keeper sends back
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    OAuth(OAuthResult),
    Auth(AuthStatus),
    Proxy(ProxyResponse),
    Token(TokenPresence),
}

impl From<OAuthResult> for Response {
    fn from(r: OAuthResult) -> Self {
        Response::OAuth(r)
    }
}

impl From<AuthStatus> for Response {
    fn from(r: AuthStatus) -> Self {
        Response::Auth(r)
    }
}

impl From<ProxyResponse> for Response {
    fn from(r: ProxyResponse) -> Self {
        Response::Proxy(r)
    }
}

impl From<TokenPresence> for Response {
    fn from(r: TokenPresence) -> Self {
        Response::Token(r)
    }
}
