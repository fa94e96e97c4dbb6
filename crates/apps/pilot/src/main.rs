//! Pilot - terminal host for the Mailpilot token keeper
//!
//! Runs the token keeper in-process and drives it the way the popup does:
//! check the connection, sign in, make proxied backend calls, or reset the
//! stored credential.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::{error, info, warn};
use std::sync::Arc;

use assistant::agents::{ConnectionStatus, PopupAgent};
use assistant::client::KeeperClient;
use assistant::config::{AssistantConfig, GoogleCredentials};
use assistant::keeper::{
    FileCredentialStore, GoogleIdentity, HttpTransport, IdentityError, IdentityProvider,
    InstallReason, KeeperRuntime, TokenKeeper, UreqTransport,
};
use assistant::protocol::{Method, ProxyRequest};

#[derive(Parser)]
#[command(name = "pilot", about = "Mailpilot token keeper and backend proxy")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Backend base URL (overrides assistant.json and MAILPILOT_API_BASE_URL)
    #[arg(long, global = true)]
    api_base_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show connection status and task counts
    Status {
        /// Print the popup HTML instead of a summary
        #[arg(long)]
        html: bool,
    },
    /// Sign in with Google and store the backend credential
    SignIn,
    /// Call a backend endpoint with the stored credential
    Fetch {
        /// Path starting with '/', e.g. /api/tasks
        endpoint: String,
        #[arg(short, long, value_enum, default_value_t = HttpMethod::Get)]
        method: HttpMethod,
        /// JSON request body
        #[arg(short, long)]
        body: Option<String>,
    },
    /// Forget the stored credential
    Reset,
}

#[derive(Clone, Copy, ValueEnum)]
enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl From<HttpMethod> for Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => Method::Get,
            HttpMethod::Post => Method::Post,
            HttpMethod::Put => Method::Put,
            HttpMethod::Patch => Method::Patch,
            HttpMethod::Delete => Method::Delete,
        }
    }
}

/// Stands in for Google sign-in when no OAuth client is configured
struct UnconfiguredIdentity {
    reason: String,
}

impl IdentityProvider for UnconfiguredIdentity {
    fn request_token(&self) -> Result<String, IdentityError> {
        Err(IdentityError::Unavailable(self.reason.clone()))
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let dir = config::init().context("Failed to initialize config directory")?;
    info!("Config directory: {}", dir.root().display());

    let mut settings = AssistantConfig::load(&dir)?;
    if let Some(url) = cli.api_base_url {
        settings.api_base_url = url;
        settings.validate()?;
    }
    info!("Using backend at {}", settings.api_base_url);

    let store = Arc::new(FileCredentialStore::in_dir(&dir));
    let transport: Arc<dyn HttpTransport> =
        Arc::new(UreqTransport::new(settings.request_timeout()));

    let identity: Arc<dyn IdentityProvider> = match GoogleCredentials::load(&dir) {
        Ok(credentials) => Arc::new(GoogleIdentity::new(
            credentials,
            transport.clone(),
            settings.oauth_timeout(),
        )),
        Err(e) => {
            warn!("Google sign-in is not configured: {:#}", e);
            Arc::new(UnconfiguredIdentity {
                reason: format!("Google OAuth client is not configured: {:#}", e),
            })
        }
    };

    let keeper = TokenKeeper::new(settings.api_base_url.clone(), store, transport, identity);
    let runtime = KeeperRuntime::spawn(keeper)?;
    // The keeper bounds the browser wait itself; leave room for the token exchange.
    let client = KeeperClient::new(
        runtime.handle(),
        settings.request_timeout(),
        settings.oauth_timeout() + settings.request_timeout(),
    );

    let outcome = match cli.command {
        Commands::Status { html } => status(&client, html),
        Commands::SignIn => sign_in(&client),
        Commands::Fetch {
            endpoint,
            method,
            body,
        } => fetch(&client, endpoint, method.into(), body),
        Commands::Reset => reset(&runtime, &client),
    };

    runtime.shutdown();
    outcome
}

fn print_popup(popup: &PopupAgent) {
    let view = popup.view();
    println!("Status: {}", view.status.label());
    if let Some(user) = popup.user() {
        println!("User: {}", user.email);
    }
    if let Some(counts) = view.counts {
        println!("Tasks: {}", counts.tasks);
        println!("Reminders: {}", counts.reminders);
    }
    if let Some(message) = &view.message {
        println!("{}", message.message);
    }
}

fn status(client: &KeeperClient, html: bool) -> Result<()> {
    let mut popup = PopupAgent::new(client.clone());
    popup.open();

    if html {
        println!("{}", popup.render());
    } else {
        print_popup(&popup);
        if popup.view().shows_sign_in() {
            println!("Run `pilot sign-in` to connect.");
        }
    }
    Ok(())
}

fn sign_in(client: &KeeperClient) -> Result<()> {
    let mut popup = PopupAgent::new(client.clone());
    println!("Opening browser for Google sign-in...");
    popup.sign_in();
    print_popup(&popup);

    if popup.view().status != ConnectionStatus::Connected {
        anyhow::bail!("Sign-in did not complete");
    }
    Ok(())
}

fn fetch(
    client: &KeeperClient,
    endpoint: String,
    method: Method,
    body: Option<String>,
) -> Result<()> {
    let mut request = ProxyRequest::new(method, endpoint);
    if let Some(body) = body {
        let value: serde_json::Value =
            serde_json::from_str(&body).context("Request body is not valid JSON")?;
        request = request.json(&value)?;
    }

    let response = client.fetch(request);
    println!("{}", serde_json::to_string_pretty(&response)?);

    if !response.ok {
        anyhow::bail!(
            "Request failed: {}",
            response.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn reset(runtime: &KeeperRuntime, client: &KeeperClient) -> Result<()> {
    runtime.handle().lifecycle(InstallReason::Update)?;
    if client.has_token() {
        anyhow::bail!("Credential is still present after reset");
    }
    println!("Stored credential removed.");
    Ok(())
}
