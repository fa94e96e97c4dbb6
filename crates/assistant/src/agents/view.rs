//! View models and their HTML rendering
//!
//! Agents produce plain view-model values; the render functions here turn
//! them into HTML fragments for the host to insert. Keeping the two apart
//! lets agent behavior be tested without a DOM.

use std::fmt::Write as _;

use crate::protocol::{Task, TeamMember};

/// Simple HTML escape for backend-provided content
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
    Success,
    Error,
}

impl ToastKind {
    fn class(&self) -> &'static str {
        match self {
            ToastKind::Success => "success",
            ToastKind::Error => "error",
        }
    }
}

/// Ephemeral user-visible message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub kind: ToastKind,
    pub message: String,
}

impl Toast {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: ToastKind::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: ToastKind::Error,
            message: message.into(),
        }
    }
}

/// Content of the assistant panel injected into the webmail page
#[derive(Debug, Clone, PartialEq)]
pub enum PanelView {
    /// Progress line while a request is in flight
    Status(String),
    Extracted {
        tasks: Vec<Task>,
        suggested_reply: Option<String>,
        summary: Option<String>,
    },
    NoTasks,
    Failed(String),
    TaskList(Vec<Task>),
    TeamMembers(Vec<TeamMember>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    SigningIn,
}

impl ConnectionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Disconnected => "Disconnected",
            ConnectionStatus::SigningIn => "Signing in...",
        }
    }

    fn class(&self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "status-indicator connected",
            ConnectionStatus::Disconnected => "status-indicator disconnected",
            ConnectionStatus::SigningIn => "status-indicator",
        }
    }
}

/// Counts shown in the popup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SummaryCounts {
    pub tasks: usize,
    pub reminders: usize,
}

impl SummaryCounts {
    pub fn from_tasks(tasks: &[Task]) -> Self {
        Self {
            tasks: tasks.len(),
            reminders: tasks.iter().filter(|t| t.has_reminder()).count(),
        }
    }
}

/// Everything the popup shows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopupView {
    pub status: ConnectionStatus,
    pub counts: Option<SummaryCounts>,
    pub message: Option<Toast>,
}

impl Default for PopupView {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            counts: None,
            message: None,
        }
    }
}

impl PopupView {
    pub fn shows_sign_in(&self) -> bool {
        self.status != ConnectionStatus::Connected
    }
}

fn render_task(out: &mut String, task: &Task, with_actions: bool) {
    let _ = write!(
        out,
        r#"<div class="task-item" data-task-id="{}"><div class="task-content">{}</div>"#,
        task.id,
        html_escape(&task.title)
    );
    if let Some(description) = task.description.as_deref().filter(|d| !d.is_empty()) {
        let _ = write!(
            out,
            r#"<div class="task-description">{}</div>"#,
            html_escape(description)
        );
    }
    if let Some(due) = task.due() {
        let _ = write!(out, r#"<div class="task-due-date">Due: {}</div>"#, html_escape(due));
    }
    if let Some(reminder) = task.reminder_time.as_deref().filter(|_| task.has_reminder()) {
        let _ = write!(
            out,
            r#"<div class="task-reminder">Reminder: {}</div>"#,
            html_escape(reminder)
        );
    }
    if with_actions {
        let _ = write!(
            out,
            r#"<div class="task-actions"><button class="confirm-task" data-task-id="{id}">Confirm</button><button class="reject-task" data-task-id="{id}">Reject</button></div>"#,
            id = task.id
        );
    }
    out.push_str("</div>");
}

pub fn render_panel(view: &PanelView) -> String {
    let mut out = String::new();
    match view {
        PanelView::Status(message) => {
            let _ = write!(
                out,
                r#"<div class="status-message">{}</div><div class="loading-indicator"></div>"#,
                html_escape(message)
            );
        }
        PanelView::Extracted {
            tasks,
            suggested_reply,
            summary,
        } => {
            if let Some(summary) = summary {
                let _ = write!(out, r#"<div class="email-summary">{}</div>"#, html_escape(summary));
            }
            out.push_str(r#"<div class="extracted-tasks">"#);
            for task in tasks {
                render_task(&mut out, task, true);
            }
            out.push_str("</div>");
            if let Some(reply) = suggested_reply {
                let _ = write!(
                    out,
                    r#"<div class="suggested-reply"><div class="reply-text">{}</div><button class="use-reply">Use reply</button></div>"#,
                    html_escape(reply)
                );
            }
        }
        PanelView::NoTasks => {
            out.push_str(r#"<div class="no-tasks">No tasks found in this email.</div>"#);
        }
        PanelView::Failed(message) => {
            let _ = write!(
                out,
                r#"<div class="status-message error">{}</div>"#,
                html_escape(message)
            );
        }
        PanelView::TaskList(tasks) => {
            out.push_str(r#"<div class="tasks-list">"#);
            for task in tasks {
                render_task(&mut out, task, false);
            }
            out.push_str("</div>");
        }
        PanelView::TeamMembers(members) => {
            out.push_str(r#"<div class="team-members">"#);
            for member in members {
                let name = member.name.as_deref().unwrap_or(&member.email);
                let _ = write!(
                    out,
                    r#"<div class="team-member" data-member-id="{}"><div class="member-name">{}</div><div class="member-email">{}</div></div>"#,
                    member.id,
                    html_escape(name),
                    html_escape(&member.email)
                );
            }
            out.push_str("</div>");
        }
    }
    out
}

pub fn render_popup(view: &PopupView) -> String {
    let mut out = format!(
        r#"<div id="connection-status" class="{}"><span class="status-dot"></span><span class="status-text">{}</span></div>"#,
        view.status.class(),
        view.status.label()
    );

    if view.shows_sign_in() {
        let disabled = if view.status == ConnectionStatus::SigningIn {
            " disabled"
        } else {
            ""
        };
        let _ = write!(
            out,
            r#"<div id="sign-in-panel"><button id="sign-in-button"{}>Sign in with Google</button></div>"#,
            disabled
        );
    } else {
        let counts = view.counts.unwrap_or_default();
        let _ = write!(
            out,
            r#"<div id="main-content"><div class="stat"><span id="tasks-count">{}</span> tasks</div><div class="stat"><span id="reminders-count">{}</span> reminders</div></div>"#,
            counts.tasks, counts.reminders
        );
    }

    if let Some(message) = &view.message {
        let _ = write!(
            out,
            r#"<div id="message" class="{}">{}</div>"#,
            message.kind.class(),
            html_escape(&message.message)
        );
    }
    out
}
