//! Page agent (content context)
//!
//! Attaches the assistant panel to the webmail page and turns user actions
//! into proxied backend calls. Everything DOM-specific sits behind
//! [`PageHost`]; the agent itself only sees view-models.

use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::time::Duration;

use super::view::{PanelView, Toast};
use super::wait::{MutationSignal, WaitOutcome};
use crate::client::{KeeperClient, Subscription};
use crate::protocol::{
    EmailSnapshot, Extraction, NewTask, Notification, ProcessEmailBody, ProxyRequest, Task,
    TaskId, TaskList, TaskUpdate, TeamMember, UserProfile,
};

/// The webmail page as seen by the agent
pub trait PageHost {
    /// Whether the element the panel attaches to exists yet
    fn anchor_present(&self) -> bool;

    /// Identifier of the open email, if one is open
    fn current_email_id(&self) -> Option<String>;

    /// Contents of the open email
    fn current_email(&self) -> Option<EmailSnapshot>;

    /// Insert the panel next to the anchor
    fn inject(&mut self);

    fn set_controls_enabled(&mut self, enabled: bool);

    fn render(&mut self, view: &PanelView);

    fn show_toast(&mut self, toast: Toast);
}

#[derive(Deserialize)]
struct TaskPayload {
    #[serde(default)]
    task: Option<Task>,
}

#[derive(Deserialize)]
struct MembersPayload {
    #[serde(default)]
    members: Vec<TeamMember>,
}

pub struct PageAgent<H: PageHost> {
    host: H,
    client: KeeperClient,
    subscription: Option<Subscription>,
    user: Option<UserProfile>,
    /// Emails already submitted for processing
    processed: HashSet<String>,
    extraction: Extraction,
    tasks: Vec<Task>,
    members: Vec<TeamMember>,
}

impl<H: PageHost> PageAgent<H> {
    pub fn new(host: H, client: KeeperClient) -> Self {
        Self {
            host,
            client,
            subscription: None,
            user: None,
            processed: HashSet::new(),
            extraction: Extraction::default(),
            tasks: Vec::new(),
            members: Vec::new(),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn user(&self) -> Option<&UserProfile> {
        self.user.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn extracted_tasks(&self) -> &[Task] {
        &self.extraction.tasks
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn team_members(&self) -> &[TeamMember] {
        &self.members
    }

    pub fn is_processed(&self, email_id: &str) -> bool {
        self.processed.contains(email_id)
    }

    /// Wait for the anchor element, then inject the panel and subscribe to
    /// keeper broadcasts. Nothing is injected unless the anchor was found.
    pub fn attach(&mut self, signal: &MutationSignal, timeout: Duration) -> WaitOutcome<()> {
        let host = &self.host;
        let outcome = signal.wait_for(timeout, || host.anchor_present().then_some(()));

        match outcome {
            WaitOutcome::Found(()) => {
                self.host.inject();
                match self.client.subscribe() {
                    Ok(subscription) => self.subscription = Some(subscription),
                    Err(e) => warn!("Could not subscribe to auth changes: {}", e),
                }
                self.refresh_auth();
                info!("Assistant panel attached");
            }
            WaitOutcome::NotFound => debug!("Anchor observation cancelled"),
            WaitOutcome::TimedOut => warn!("Anchor element did not appear within {:?}", timeout),
        }
        outcome
    }

    /// Handle every pending broadcast; returns how many were handled
    pub fn poll_notifications(&mut self) -> usize {
        let mut handled = 0;
        while let Some(notification) = self.subscription.as_ref().and_then(|s| s.try_next()) {
            self.handle_notification(notification);
            handled += 1;
        }
        handled
    }

    pub fn handle_notification(&mut self, notification: Notification) {
        match notification {
            Notification::AuthStateChanged => {
                debug!("Auth state changed, re-checking");
                self.refresh_auth();
            }
        }
    }

    /// Re-run the auth check and update controls accordingly
    pub fn refresh_auth(&mut self) -> bool {
        let status = self.client.check_auth();
        let authenticated = status.is_authenticated;
        self.host.set_controls_enabled(authenticated);

        if authenticated {
            self.user = status.user;
            self.load_tasks();
        } else {
            if let Some(error) = status.error {
                debug!("Not authenticated: {}", error);
            }
            self.user = None;
        }
        authenticated
    }

    pub fn sign_in(&mut self) -> bool {
        let result = self.client.initiate_oauth();
        if result.success {
            self.refresh_auth()
        } else {
            let error = result.error.unwrap_or_else(|| "Sign in failed".to_string());
            self.host.show_toast(Toast::error(error));
            false
        }
    }

    /// Send a proxied request; failures become an error toast
    fn request(&mut self, request: ProxyRequest) -> Option<serde_json::Value> {
        debug!("{} {}", request.method().as_str(), request.endpoint);
        match self.client.fetch(request).into_result() {
            Ok(data) => Some(data),
            Err(error) => {
                self.host.show_toast(Toast::error(error));
                None
            }
        }
    }

    fn request_json<T: serde::Serialize>(
        &mut self,
        request: ProxyRequest,
        body: &T,
    ) -> Option<serde_json::Value> {
        match request.json(body) {
            Ok(request) => self.request(request),
            Err(e) => {
                self.host.show_toast(Toast::error(e.to_string()));
                None
            }
        }
    }

    fn decode<T: serde::de::DeserializeOwned>(&mut self, data: serde_json::Value) -> Option<T> {
        match serde_json::from_value(data) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Unexpected response shape: {}", e);
                self.host
                    .show_toast(Toast::error(format!("Unexpected response: {}", e)));
                None
            }
        }
    }

    fn show_extraction(&mut self, extraction: Extraction) {
        self.extraction = extraction;
        if self.extraction.tasks.is_empty() {
            self.host.render(&PanelView::NoTasks);
        } else {
            self.host.render(&PanelView::Extracted {
                tasks: self.extraction.tasks.clone(),
                suggested_reply: self.extraction.suggested_reply.clone(),
                summary: self.extraction.summary.clone(),
            });
        }
    }

    fn show_task_list(&mut self) {
        self.host.render(&PanelView::TaskList(self.tasks.clone()));
    }

    /// Submit the open email for task extraction, once per email
    pub fn process_current_email(&mut self) {
        let Some(email_id) = self.host.current_email_id() else {
            self.host.show_toast(Toast::error("Could not identify email"));
            return;
        };

        if self.processed.contains(&email_id) {
            self.host.show_toast(Toast::error("Email already processed"));
            return;
        }

        let email = match self.host.current_email() {
            Some(email) if !email.content.trim().is_empty() => email,
            _ => {
                self.host.show_toast(Toast::error("No email content found"));
                return;
            }
        };

        self.host
            .render(&PanelView::Status("Extracting tasks...".to_string()));

        let mut body = ProcessEmailBody::from(&email);
        body.gmail_id = &email_id;

        // Claimed before the call so a second click cannot resubmit
        self.processed.insert(email_id.clone());
        let data = self.request_json(ProxyRequest::post("/api/emails/current/process"), &body);

        let Some(data) = data else {
            self.processed.remove(&email_id);
            self.host
                .render(&PanelView::Failed("Failed to process email".to_string()));
            return;
        };

        match self.decode::<Extraction>(data) {
            Some(extraction) => {
                let found = !extraction.tasks.is_empty();
                self.show_extraction(extraction);
                if found {
                    self.host.show_toast(Toast::success("Tasks extracted successfully"));
                } else {
                    // Nothing was created, so the email may be submitted again
                    self.processed.remove(&email_id);
                }
            }
            None => {
                self.processed.remove(&email_id);
            }
        }
    }

    /// Extract tasks from the open email without marking it processed
    pub fn extract_tasks(&mut self) {
        let Some(email) = self
            .host
            .current_email()
            .filter(|e| !e.content.trim().is_empty())
        else {
            self.host.show_toast(Toast::error("No email content found"));
            return;
        };
        let email_id = self.host.current_email_id();

        let body = json!({ "content": email.content, "email_id": email_id });
        if let Some(data) = self.request_json(ProxyRequest::post("/api/extract"), &body) {
            if let Some(extraction) = self.decode::<Extraction>(data) {
                self.show_extraction(extraction);
            }
        }
    }

    fn resolve_extracted(&mut self, task_id: TaskId, verb: &str) -> bool {
        let endpoint = format!("/api/tasks/{}/{}", task_id, verb);
        if self.request(ProxyRequest::post(endpoint)).is_none() {
            return false;
        }
        self.extraction.tasks.retain(|t| t.id != task_id);
        let extraction = std::mem::take(&mut self.extraction);
        self.show_extraction(extraction);
        true
    }

    pub fn confirm_task(&mut self, task_id: TaskId) -> bool {
        self.resolve_extracted(task_id, "confirm")
    }

    pub fn reject_task(&mut self, task_id: TaskId) -> bool {
        self.resolve_extracted(task_id, "reject")
    }

    pub fn assign_task(&mut self, task_id: TaskId, member_id: i64) -> bool {
        let endpoint = format!("/api/tasks/{}/assign", task_id);
        let body = json!({ "member_id": member_id });
        if self.request_json(ProxyRequest::post(endpoint), &body).is_none() {
            return false;
        }
        self.host.show_toast(Toast::success("Task assigned successfully"));
        true
    }

    /// Replace the local copy of a task with the one the backend returned
    fn apply_returned_task(&mut self, data: serde_json::Value) {
        let Some(TaskPayload { task: Some(task) }) = self.decode::<TaskPayload>(data) else {
            return;
        };
        for list in [&mut self.tasks, &mut self.extraction.tasks] {
            if let Some(slot) = list.iter_mut().find(|t| t.id == task.id) {
                *slot = task.clone();
            }
        }
        self.show_task_list();
    }

    pub fn set_reminder(&mut self, task_id: TaskId, at: DateTime<Utc>) -> bool {
        if at <= Utc::now() {
            self.host
                .show_toast(Toast::error("Reminder time must be in the future"));
            return false;
        }

        let endpoint = format!("/api/tasks/{}/reminder", task_id);
        let body = json!({ "reminder_time": at.to_rfc3339_opts(SecondsFormat::Millis, true) });
        let Some(data) = self.request_json(ProxyRequest::post(endpoint), &body) else {
            return false;
        };
        self.apply_returned_task(data);
        self.host.show_toast(Toast::success("Reminder set successfully"));
        true
    }

    pub fn clear_reminder(&mut self, task_id: TaskId) -> bool {
        let endpoint = format!("/api/tasks/{}/reminder", task_id);
        let Some(data) = self.request(ProxyRequest::delete(endpoint)) else {
            return false;
        };
        self.apply_returned_task(data);
        self.host.show_toast(Toast::success("Reminder removed"));
        true
    }

    pub fn load_tasks(&mut self) {
        let Some(data) = self.request(ProxyRequest::get("/api/tasks")) else {
            return;
        };
        if let Some(list) = self.decode::<TaskList>(data) {
            self.tasks = list.into_tasks();
            self.show_task_list();
        }
    }

    pub fn create_task(&mut self, task: &NewTask) -> bool {
        if task.title.trim().is_empty() {
            self.host.show_toast(Toast::error("Task title is required"));
            return false;
        }
        let Some(data) = self.request_json(ProxyRequest::post("/api/tasks"), task) else {
            return false;
        };
        if let Some(TaskPayload { task: Some(created) }) = self.decode::<TaskPayload>(data) {
            self.tasks.push(created);
            self.show_task_list();
        }
        self.host.show_toast(Toast::success("Task created successfully"));
        true
    }

    pub fn update_task(&mut self, task_id: TaskId, update: &TaskUpdate) -> bool {
        let endpoint = format!("/api/tasks/{}", task_id);
        let Some(data) = self.request_json(ProxyRequest::put(endpoint), update) else {
            return false;
        };
        self.apply_returned_task(data);
        self.host.show_toast(Toast::success("Task updated successfully"));
        true
    }

    pub fn delete_task(&mut self, task_id: TaskId) -> bool {
        let endpoint = format!("/api/tasks/{}", task_id);
        if self.request(ProxyRequest::delete(endpoint)).is_none() {
            return false;
        }
        self.tasks.retain(|t| t.id != task_id);
        self.show_task_list();
        self.host.show_toast(Toast::success("Task deleted successfully"));
        true
    }

    pub fn load_team_members(&mut self) {
        let Some(data) = self.request(ProxyRequest::get("/api/team/members")) else {
            return;
        };
        if let Some(payload) = self.decode::<MembersPayload>(data) {
            self.members = payload.members;
            self.host.render(&PanelView::TeamMembers(self.members.clone()));
        }
    }
}
