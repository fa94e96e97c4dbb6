//! Integration tests for the assistant crate
//!
//! These tests run the token keeper on its own thread and drive it through
//! the same client the agents use, against a scripted backend.

use assistant::agents::{
    ConnectionStatus, MutationSignal, PageAgent, PageHost, PanelView, PopupAgent, Toast,
    WaitOutcome,
};
use assistant::client::KeeperClient;
use assistant::keeper::{
    Credential, CredentialStore, FileCredentialStore, HttpRequest, HttpResponse, HttpTransport,
    IdentityError, IdentityProvider, InstallReason, KeeperRuntime, MemoryCredentialStore,
    TokenKeeper,
};
use assistant::protocol::{EmailSnapshot, Method, Notification, ProxyRequest, Request};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

const BASE_URL: &str = "http://backend.test";
const BACKEND_TOKEN: &str = "backend-secret-7f3a";

/// Scripted backend that counts and records every request
#[derive(Default)]
struct MockBackend {
    routes: Mutex<Vec<(Method, String, u16, String)>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockBackend {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn route(self: &Arc<Self>, method: Method, path: &str, status: u16, body: Value) -> Arc<Self> {
        let body = if body.is_null() {
            String::new()
        } else {
            body.to_string()
        };
        self.routes
            .lock()
            .unwrap()
            .push((method, path.to_string(), status, body));
        self.clone()
    }

    fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn calls_to(&self, path: &str) -> usize {
        let url = format!("{}{}", BASE_URL, path);
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url == url)
            .count()
    }

    fn last_request(&self) -> HttpRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

impl HttpTransport for MockBackend {
    fn send(&self, request: &HttpRequest) -> anyhow::Result<HttpResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let path = request.url.trim_start_matches(BASE_URL);
        let routes = self.routes.lock().unwrap();
        let (_, _, status, body) = routes
            .iter()
            .find(|(m, p, _, _)| *m == request.method && p == path)
            .ok_or_else(|| anyhow::anyhow!("connection refused: {}", path))?;
        Ok(HttpResponse::new(*status, body.clone()))
    }
}

/// Identity provider that always grants or always denies, optionally after
/// a consent delay
struct MockIdentity {
    grant: bool,
    consent: Duration,
    calls: AtomicUsize,
}

impl MockIdentity {
    fn granting() -> Arc<Self> {
        Self::slow(Duration::ZERO)
    }

    fn slow(consent: Duration) -> Arc<Self> {
        Arc::new(Self {
            grant: true,
            consent,
            calls: AtomicUsize::new(0),
        })
    }

    fn denying() -> Arc<Self> {
        Arc::new(Self {
            grant: false,
            consent: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }
}

impl IdentityProvider for MockIdentity {
    fn request_token(&self) -> Result<String, IdentityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.consent);
        if self.grant {
            Ok("google-access-token".to_string())
        } else {
            Err(IdentityError::Denied("access_denied".to_string()))
        }
    }
}

struct Harness {
    runtime: KeeperRuntime,
    client: KeeperClient,
}

fn start(
    store: Arc<dyn CredentialStore>,
    backend: Arc<MockBackend>,
    identity: Arc<MockIdentity>,
) -> Harness {
    let keeper = TokenKeeper::new(BASE_URL, store, backend, identity);
    let runtime = KeeperRuntime::spawn(keeper).unwrap();
    let client = KeeperClient::new(
        runtime.handle(),
        Duration::from_secs(5),
        Duration::from_secs(10),
    );
    Harness { runtime, client }
}

fn signed_in_store() -> Arc<MemoryCredentialStore> {
    Arc::new(MemoryCredentialStore::with_credential(Credential::new(
        BACKEND_TOKEN,
        None,
    )))
}

fn oauth_routes(backend: &Arc<MockBackend>) {
    backend
        .route(
            Method::Post,
            "/api/oauth/callback",
            200,
            json!({"access_token": BACKEND_TOKEN, "token_type": "bearer"}),
        )
        .route(
            Method::Get,
            "/api/users/me",
            200,
            json!({"id": 1, "email": "ana@example.com", "name": "Ana"}),
        );
}

#[derive(Default)]
struct Page {
    anchor: Arc<Mutex<bool>>,
    email_id: Option<String>,
    content: String,
    injected: bool,
    controls_enabled: Option<bool>,
    views: Vec<PanelView>,
    toasts: Vec<Toast>,
}

impl PageHost for Page {
    fn anchor_present(&self) -> bool {
        *self.anchor.lock().unwrap()
    }

    fn current_email_id(&self) -> Option<String> {
        self.email_id.clone()
    }

    fn current_email(&self) -> Option<EmailSnapshot> {
        let id = self.email_id.clone()?;
        Some(EmailSnapshot {
            thread_id: id.clone(),
            id,
            subject: "Launch".to_string(),
            sender: "bo@example.com".to_string(),
            content: self.content.clone(),
        })
    }

    fn inject(&mut self) {
        self.injected = true;
    }

    fn set_controls_enabled(&mut self, enabled: bool) {
        self.controls_enabled = Some(enabled);
    }

    fn render(&mut self, view: &PanelView) {
        self.views.push(view.clone());
    }

    fn show_toast(&mut self, toast: Toast) {
        self.toasts.push(toast);
    }
}

#[test]
fn test_no_credential_means_no_network() {
    let backend = MockBackend::new();
    let h = start(
        Arc::new(MemoryCredentialStore::new()),
        backend.clone(),
        MockIdentity::granting(),
    );

    let status = h.client.check_auth();
    assert!(!status.is_authenticated);
    assert!(status.error.is_none());

    let response = h.client.fetch(ProxyRequest::get("/api/tasks"));
    assert!(!response.ok);
    assert_eq!(response.error.as_deref(), Some("No auth token"));

    assert!(!h.client.has_token());
    assert_eq!(backend.call_count(), 0);
}

#[test]
fn test_rejected_credential_is_kept() {
    let backend = MockBackend::new().route(
        Method::Get,
        "/api/users/me",
        401,
        json!({"detail": "Could not validate credentials"}),
    );
    let store = signed_in_store();
    let h = start(store.clone(), backend, MockIdentity::granting());

    let status = h.client.check_auth();
    assert!(!status.is_authenticated);
    assert!(status.error.unwrap().contains("Could not validate credentials"));

    assert!(h.client.has_token());
    assert!(store.get().unwrap().is_some());
}

#[test]
fn test_fetch_attaches_credential_and_relays_data() {
    let backend = MockBackend::new().route(
        Method::Get,
        "/api/tasks",
        200,
        json!({"tasks": [{"id": 1, "title": "Send deck"}]}),
    );
    let h = start(signed_in_store(), backend.clone(), MockIdentity::granting());

    let response = h.client.fetch(
        ProxyRequest::get("/api/tasks").header("Authorization", "Bearer forged"),
    );
    assert!(response.ok);
    assert_eq!(response.data.unwrap()["tasks"][0]["title"], "Send deck");

    let sent = backend.last_request();
    assert_eq!(
        sent.header_value("authorization"),
        Some(format!("Bearer {}", BACKEND_TOKEN).as_str())
    );
    assert_eq!(sent.header_value("accept"), Some("application/json"));
}

#[test]
fn test_non_success_status_relays_body() {
    let backend = MockBackend::new()
        .route(Method::Delete, "/api/tasks/9", 404, json!({"detail": "Task not found"}))
        .route(Method::Delete, "/api/tasks/10", 500, Value::Null);
    let h = start(signed_in_store(), backend, MockIdentity::granting());

    let response = h.client.fetch(ProxyRequest::delete("/api/tasks/9"));
    assert!(!response.ok);
    assert!(response.error.unwrap().contains("Task not found"));

    let response = h.client.fetch(ProxyRequest::delete("/api/tasks/10"));
    assert_eq!(response.error.as_deref(), Some("HTTP error! status: 500"));
}

#[test]
fn test_credential_never_crosses_the_boundary() {
    let backend = MockBackend::new();
    oauth_routes(&backend);
    let h = start(signed_in_store(), backend, MockIdentity::granting());
    let handle = h.runtime.handle();

    for request in [Request::GetAuthToken, Request::CheckAuth, Request::InitiateOAuth] {
        let payload = serde_json::to_string(&request).unwrap();
        let reply = handle
            .post(payload, Duration::from_secs(5))
            .unwrap()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        assert!(!reply.contains(BACKEND_TOKEN), "leaked in {}", reply);
    }
}

#[test]
fn test_malformed_message_gets_error_envelope() {
    let h = start(
        signed_in_store(),
        MockBackend::new(),
        MockIdentity::granting(),
    );
    let handle = h.runtime.handle();

    for raw in ["not json", r#"{"action":"deleteEverything"}"#] {
        let reply = handle
            .post(raw.to_string(), Duration::from_secs(5))
            .unwrap()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        let reply: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(reply["ok"], false);
        assert!(reply["error"].as_str().unwrap().starts_with("Malformed message"));
    }
}

#[test]
fn test_successful_sign_in_broadcasts_once() {
    let backend = MockBackend::new();
    oauth_routes(&backend);
    let h = start(
        Arc::new(MemoryCredentialStore::new()),
        backend.clone(),
        MockIdentity::granting(),
    );
    let first = h.client.subscribe().unwrap();
    let second = h.client.subscribe().unwrap();

    let result = h.client.initiate_oauth();
    assert!(result.success);
    assert!(h.client.has_token());

    let sent = backend.last_request();
    let body: Value = serde_json::from_str(sent.body.as_deref().unwrap()).unwrap();
    assert_eq!(body["token"], "google-access-token");

    for subscription in [&first, &second] {
        assert_eq!(
            subscription.next_timeout(Duration::from_secs(5)),
            Some(Notification::AuthStateChanged)
        );
        assert_eq!(subscription.next_timeout(Duration::from_millis(50)), None);
    }
}

#[test]
fn test_failed_sign_in_never_broadcasts() {
    let backend = MockBackend::new();
    let identity = MockIdentity::denying();
    let h = start(
        Arc::new(MemoryCredentialStore::new()),
        backend.clone(),
        identity.clone(),
    );
    let subscription = h.client.subscribe().unwrap();

    let result = h.client.initiate_oauth();
    assert!(!result.success);
    assert!(result.error.unwrap().contains("access_denied"));
    assert_eq!(identity.calls.load(Ordering::SeqCst), 1);
    assert_eq!(backend.call_count(), 0);

    assert_eq!(subscription.next_timeout(Duration::from_millis(100)), None);
}

#[test]
fn test_backend_without_access_token_fails_sign_in() {
    let backend = MockBackend::new().route(
        Method::Post,
        "/api/oauth/callback",
        200,
        json!({"token_type": "bearer"}),
    );
    let h = start(
        Arc::new(MemoryCredentialStore::new()),
        backend,
        MockIdentity::granting(),
    );

    let result = h.client.initiate_oauth();
    assert!(!result.success);
    assert!(!h.client.has_token());
}

#[test]
fn test_lifecycle_event_clears_credential() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileCredentialStore::new(dir.path().join("credential.json")));
    store.set(Credential::new(BACKEND_TOKEN, None)).unwrap();

    let backend = MockBackend::new();
    oauth_routes(&backend);
    let h = start(store.clone(), backend.clone(), MockIdentity::granting());
    assert!(h.client.has_token());
    assert!(h.client.check_auth().is_authenticated);

    h.runtime.handle().lifecycle(InstallReason::Update).unwrap();
    assert!(!h.client.has_token());
    assert!(store.get().unwrap().is_none());

    let status = h.client.check_auth();
    assert!(!status.is_authenticated);
    assert!(status.error.is_none());
    assert_eq!(backend.calls_to("/api/users/me"), 1);
}

#[test]
fn test_stopped_keeper_is_reported() {
    let h = start(
        signed_in_store(),
        MockBackend::new(),
        MockIdentity::granting(),
    );
    let client = h.client.clone();
    h.runtime.shutdown();

    let status = client.check_auth();
    assert!(!status.is_authenticated);
    assert_eq!(status.error.as_deref(), Some("Token keeper is not running"));
    assert!(!client.fetch(ProxyRequest::get("/api/tasks")).ok);
}

#[test]
fn test_page_processes_email_once() {
    let backend = MockBackend::new().route(
        Method::Post,
        "/api/emails/current/process",
        200,
        json!({
            "tasks": [{"id": 5, "title": "Draft launch post", "due_date": "2026-10-30"}],
            "suggested_reply": "On it",
            "summary": "Launch prep"
        }),
    );
    let h = start(signed_in_store(), backend.clone(), MockIdentity::granting());
    let page = Page {
        email_id: Some("msg-42".to_string()),
        content: "Can you draft the launch post?".to_string(),
        ..Page::default()
    };
    let mut agent = PageAgent::new(page, h.client.clone());

    agent.process_current_email();
    agent.process_current_email();

    assert_eq!(backend.calls_to("/api/emails/current/process"), 1);
    assert_eq!(agent.extracted_tasks().len(), 1);
    let toasts = &agent.host().toasts;
    assert_eq!(toasts[0], Toast::success("Tasks extracted successfully"));
    assert_eq!(toasts[1], Toast::error("Email already processed"));
    assert!(agent.host().views.iter().any(|v| matches!(
        v,
        PanelView::Extracted { summary: Some(s), .. } if s == "Launch prep"
    )));
}

#[test]
fn test_page_is_served_while_sign_in_waits_for_consent() {
    let backend = MockBackend::new().route(
        Method::Post,
        "/api/emails/current/process",
        200,
        json!({"tasks": [{"id": 7, "title": "Book venue"}]}),
    );
    oauth_routes(&backend);
    let h = start(
        signed_in_store(),
        backend.clone(),
        MockIdentity::slow(Duration::from_millis(600)),
    );

    let popup_client = h.client.clone();
    let sign_in = thread::spawn(move || popup_client.initiate_oauth());
    thread::sleep(Duration::from_millis(50));

    // A page whose calls give up long before consent arrives
    let impatient = KeeperClient::new(
        h.runtime.handle(),
        Duration::from_millis(200),
        Duration::from_secs(5),
    );
    let page = Page {
        email_id: Some("msg-77".to_string()),
        content: "Can you book the venue?".to_string(),
        ..Page::default()
    };
    let mut agent = PageAgent::new(page, impatient);

    agent.process_current_email();
    assert!(agent.is_processed("msg-77"));
    assert_eq!(
        agent.host().toasts.first(),
        Some(&Toast::success("Tasks extracted successfully"))
    );

    agent.process_current_email();
    assert_eq!(
        agent.host().toasts.last(),
        Some(&Toast::error("Email already processed"))
    );

    assert!(sign_in.join().unwrap().success);
    assert_eq!(backend.calls_to("/api/emails/current/process"), 1);
}

#[test]
fn test_page_waits_for_anchor_then_follows_sign_in() {
    let backend = MockBackend::new().route(
        Method::Get,
        "/api/tasks",
        200,
        json!({"tasks": []}),
    );
    oauth_routes(&backend);
    let h = start(
        Arc::new(MemoryCredentialStore::new()),
        backend,
        MockIdentity::granting(),
    );

    let anchor = Arc::new(Mutex::new(false));
    let page = Page {
        anchor: anchor.clone(),
        ..Page::default()
    };
    let mut agent = PageAgent::new(page, h.client.clone());

    let signal = Arc::new(MutationSignal::new());
    let s = signal.clone();
    let dom = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        *anchor.lock().unwrap() = true;
        s.notify();
    });

    let outcome = agent.attach(&signal, Duration::from_secs(5));
    dom.join().unwrap();
    assert_eq!(outcome, WaitOutcome::Found(()));
    assert!(agent.host().injected);
    assert_eq!(agent.host().controls_enabled, Some(false));

    // Sign-in from another context reaches the page as a broadcast
    let mut popup = PopupAgent::new(h.client.clone());
    popup.sign_in();

    let mut handled = 0;
    for _ in 0..50 {
        handled += agent.poll_notifications();
        if handled > 0 {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(handled, 1);
    assert_eq!(agent.host().controls_enabled, Some(true));
    assert!(agent.is_authenticated());
}

#[test]
fn test_anchor_timeout_injects_nothing() {
    let backend = MockBackend::new();
    let h = start(signed_in_store(), backend.clone(), MockIdentity::granting());
    let mut agent = PageAgent::new(Page::default(), h.client.clone());

    let outcome = agent.attach(&MutationSignal::new(), Duration::from_millis(50));
    assert_eq!(outcome, WaitOutcome::TimedOut);
    assert!(!agent.host().injected);
    assert_eq!(backend.call_count(), 0);
}

#[test]
fn test_popup_shows_counts_for_signed_in_user() {
    let backend = MockBackend::new()
        .route(
            Method::Get,
            "/api/users/me",
            200,
            json!({"id": 1, "email": "ana+work@example.com"}),
        )
        .route(
            Method::Get,
            "/api/tasks/user/ana%2Bwork%40example.com",
            200,
            json!([
                {"id": 1, "title": "a", "reminder_time": "2026-10-20T09:00:00Z"},
                {"id": 2, "title": "b"},
                {"id": 3, "title": "c", "reminder_time": null}
            ]),
        );
    let h = start(signed_in_store(), backend.clone(), MockIdentity::granting());
    let mut popup = PopupAgent::new(h.client.clone());

    let view = popup.open().clone();
    assert_eq!(view.status, ConnectionStatus::Connected);
    let counts = view.counts.unwrap();
    assert_eq!((counts.tasks, counts.reminders), (3, 1));

    // Opening again does not re-query
    popup.open();
    assert_eq!(backend.calls_to("/api/users/me"), 1);
    assert!(popup.render().contains(r#"<span id="tasks-count">3</span>"#));
}

#[test]
fn test_popup_sign_in_failure() {
    let h = start(
        Arc::new(MemoryCredentialStore::new()),
        MockBackend::new(),
        MockIdentity::denying(),
    );
    let mut popup = PopupAgent::new(h.client.clone());

    assert!(popup.open().shows_sign_in());
    let view = popup.sign_in();
    assert_eq!(view.status, ConnectionStatus::Disconnected);
    let message = view.message.as_ref().unwrap();
    assert!(message.message.starts_with("Sign in failed: "));
}

#[test]
fn test_popup_sign_in_success() {
    let backend = MockBackend::new().route(
        Method::Get,
        "/api/tasks/user/ana%40example.com",
        200,
        json!({"tasks": [{"id": 1, "title": "a"}]}),
    );
    oauth_routes(&backend);
    let h = start(
        Arc::new(MemoryCredentialStore::new()),
        backend,
        MockIdentity::granting(),
    );
    let mut popup = PopupAgent::new(h.client.clone());
    popup.open();

    let view = popup.sign_in();
    assert_eq!(view.status, ConnectionStatus::Connected);
    assert_eq!(view.counts.map(|c| c.tasks), Some(1));
    assert_eq!(
        view.message,
        Some(Toast::success("Successfully signed in!"))
    );
    assert_eq!(popup.user().unwrap().email, "ana@example.com");
}
