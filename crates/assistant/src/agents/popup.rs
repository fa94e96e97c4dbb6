//! Popup agent: connection status, summary counts and sign-in

use log::{debug, warn};

use super::view::{ConnectionStatus, PopupView, SummaryCounts, Toast, render_popup};
use crate::client::KeeperClient;
use crate::protocol::{ProxyRequest, TaskList, UserProfile};

pub struct PopupAgent {
    client: KeeperClient,
    view: PopupView,
    user: Option<UserProfile>,
    opened: bool,
}

impl PopupAgent {
    pub fn new(client: KeeperClient) -> Self {
        Self {
            client,
            view: PopupView::default(),
            user: None,
            opened: false,
        }
    }

    pub fn view(&self) -> &PopupView {
        &self.view
    }

    pub fn user(&self) -> Option<&UserProfile> {
        self.user.as_ref()
    }

    pub fn render(&self) -> String {
        render_popup(&self.view)
    }

    /// Initialize the popup; later calls are no-ops
    pub fn open(&mut self) -> &PopupView {
        if !self.opened {
            self.opened = true;
            self.check_connection();
        }
        &self.view
    }

    fn check_connection(&mut self) {
        let status = self.client.check_auth();

        if status.is_authenticated {
            self.view.status = ConnectionStatus::Connected;
            self.user = status.user;
            self.update_stats();
            return;
        }

        self.user = None;
        self.view.status = ConnectionStatus::Disconnected;
        self.view.counts = None;
        if let Some(error) = status.error {
            warn!("Auth check failed: {}", error);
            self.view.message = Some(Toast::error(error));
        }
    }

    /// Fetch the signed-in user's tasks and refresh the counts
    pub fn update_stats(&mut self) {
        let Some(email) = self.user.as_ref().map(|u| u.email.clone()) else {
            debug!("No signed-in user, skipping statistics");
            return;
        };

        let endpoint = format!("/api/tasks/user/{}", urlencoding::encode(&email));
        match self.client.fetch(ProxyRequest::get(endpoint)).decode::<TaskList>() {
            Ok(list) => {
                self.view.counts = Some(SummaryCounts::from_tasks(&list.into_tasks()));
            }
            Err(e) => {
                warn!("Failed to load statistics: {}", e);
                self.view.message = Some(Toast::error("Failed to load statistics"));
            }
        }
    }

    pub fn sign_in(&mut self) -> &PopupView {
        self.view.status = ConnectionStatus::SigningIn;
        self.view.message = None;

        let result = self.client.initiate_oauth();
        if result.success {
            self.check_connection();
            if self.view.status == ConnectionStatus::Connected {
                self.view.message = Some(Toast::success("Successfully signed in!"));
            }
        } else {
            let error = result.error.unwrap_or_else(|| "Unknown error".to_string());
            self.view.status = ConnectionStatus::Disconnected;
            self.view.message = Some(Toast::error(format!("Sign in failed: {}", error)));
        }
        &self.view
    }
}
