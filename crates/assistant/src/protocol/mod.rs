//! Message contract between the token keeper and the agents
//!
//! This module provides:
//! - Request/notification/response messages (the only values that cross a
//!   context boundary)
//! - Backend payload models carried inside proxied responses

mod messages;
mod models;

pub use messages::{
    AuthStatus, FetchOptions, Method, NO_AUTH_TOKEN, Notification, OAuthResult, ProxyRequest,
    ProxyResponse, Request, Response, TokenPresence,
};
pub use models::{
    EmailSnapshot, Extraction, NewTask, ProcessEmailBody, Task, TaskId, TaskList, TaskUpdate,
    TeamMember, UserProfile,
};
