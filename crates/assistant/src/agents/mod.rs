//! Foreground agents
//!
//! This module provides:
//! - The page agent attached to the webmail page
//! - The popup agent showing status and counts
//! - View-models and their HTML rendering
//! - A bounded, cancellable wait for page elements

mod page;
mod popup;
mod view;
mod wait;

pub use page::{PageAgent, PageHost};
pub use popup::PopupAgent;
pub use view::{
    ConnectionStatus, PanelView, PopupView, SummaryCounts, Toast, ToastKind, html_escape,
    render_panel, render_popup,
};
pub use wait::{MutationSignal, WaitOutcome};
