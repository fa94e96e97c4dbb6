//! Background context hosting the token keeper
//!
//! The keeper runs on its own thread and owns its state. Agents reach it
//! only through a [`KeeperHandle`], which carries serialized JSON. Events
//! are handled one at a time, so the credential has a single writer.
//!
//! Interactive sign-in waits on the user for minutes, so it runs on a
//! worker thread and reports back as an event; other requests keep being
//! answered meanwhile. A request whose caller has already given up is
//! skipped rather than executed late.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::service::{Dispatch, InstallReason, TokenKeeper, encode};
use crate::protocol::{Notification, OAuthResult, Request};

/// The keeper thread is gone
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Token keeper is not running")]
pub struct KeeperGone;

enum Event {
    Message {
        payload: String,
        reply: Sender<String>,
        /// The caller stops waiting at this instant
        deadline: Instant,
    },
    SignInFinished(OAuthResult),
    Subscribe(Sender<String>),
    Lifecycle(InstallReason),
    Shutdown,
}

/// Cloneable sender side of the keeper's inbox
#[derive(Clone)]
pub struct KeeperHandle {
    tx: Sender<Event>,
}

impl KeeperHandle {
    /// Post a serialized request the caller will wait on for `timeout`.
    ///
    /// The receiver yields at most one reply. A request still queued when
    /// `timeout` runs out is dropped without being handled.
    pub fn post(&self, payload: String, timeout: Duration) -> Result<Receiver<String>, KeeperGone> {
        let (reply, rx) = mpsc::channel();
        let deadline = Instant::now() + timeout;
        self.tx
            .send(Event::Message {
                payload,
                reply,
                deadline,
            })
            .map_err(|_| KeeperGone)?;
        Ok(rx)
    }

    /// Register a page agent for broadcasts
    pub fn subscribe(&self) -> Result<Receiver<String>, KeeperGone> {
        let (tx, rx) = mpsc::channel();
        self.tx.send(Event::Subscribe(tx)).map_err(|_| KeeperGone)?;
        Ok(rx)
    }

    /// Deliver an install/update lifecycle event
    pub fn lifecycle(&self, reason: InstallReason) -> Result<(), KeeperGone> {
        self.tx
            .send(Event::Lifecycle(reason))
            .map_err(|_| KeeperGone)
    }
}

/// Owns the keeper thread; shuts it down on drop
pub struct KeeperRuntime {
    handle: KeeperHandle,
    thread: Option<JoinHandle<()>>,
}

impl KeeperRuntime {
    pub fn spawn(keeper: TokenKeeper) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let inbox = tx.clone();
        let keeper = Arc::new(keeper);
        let thread = std::thread::Builder::new()
            .name("token-keeper".to_string())
            .spawn(move || run(keeper, rx, inbox))
            .context("Failed to spawn token keeper thread")?;

        info!("Token keeper started");
        Ok(Self {
            handle: KeeperHandle { tx },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> KeeperHandle {
        self.handle.clone()
    }

    /// Stop the keeper and wait for the thread to finish
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.handle.tx.send(Event::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Token keeper thread panicked");
            }
        }
    }
}

impl Drop for KeeperRuntime {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(keeper: Arc<TokenKeeper>, rx: Receiver<Event>, inbox: Sender<Event>) {
    let mut subscribers: Vec<Sender<String>> = Vec::new();
    // Callers waiting on the sign-in currently in progress
    let mut signing_in: Vec<Sender<String>> = Vec::new();

    for event in rx {
        match event {
            Event::Message {
                payload,
                reply,
                deadline,
            } => {
                if Instant::now() >= deadline {
                    debug!("Skipping request whose caller stopped waiting");
                    continue;
                }

                let request = match TokenKeeper::parse(&payload) {
                    Ok(request) => request,
                    Err(response) => {
                        let _ = reply.send(encode(&response));
                        continue;
                    }
                };

                if let Request::InitiateOAuth = request {
                    signing_in.push(reply);
                    if signing_in.len() > 1 {
                        debug!("Sign-in already in progress, joining it");
                    } else if let Err(e) = start_sign_in(&keeper, &inbox) {
                        warn!("Failed to start sign-in: {:#}", e);
                        let failed = encode(&OAuthResult::failed(format!("{:#}", e)).into());
                        for reply in signing_in.drain(..) {
                            let _ = reply.send(failed.clone());
                        }
                    }
                    continue;
                }

                let dispatch = keeper.handle(request);
                deliver(&mut subscribers, &reply, dispatch);
            }
            Event::SignInFinished(result) => {
                let dispatch = Dispatch::sign_in(result);
                let encoded = encode(&dispatch.response);
                for reply in signing_in.drain(..) {
                    if reply.send(encoded.clone()).is_err() {
                        debug!("Sign-in caller stopped waiting before it finished");
                    }
                }
                if let Some(notification) = dispatch.broadcast {
                    fan_out(&mut subscribers, notification);
                }
            }
            Event::Subscribe(tx) => subscribers.push(tx),
            Event::Lifecycle(reason) => keeper.on_installed(reason),
            Event::Shutdown => break,
        }
    }

    info!("Token keeper stopped");
}

/// Run the interactive flow off the message loop
fn start_sign_in(keeper: &Arc<TokenKeeper>, inbox: &Sender<Event>) -> Result<()> {
    let keeper = Arc::clone(keeper);
    let inbox = inbox.clone();
    std::thread::Builder::new()
        .name("sign-in".to_string())
        .spawn(move || {
            let result = keeper.initiate_oauth();
            if inbox.send(Event::SignInFinished(result)).is_err() {
                debug!("Token keeper stopped before sign-in finished");
            }
        })
        .context("Failed to spawn sign-in thread")?;
    Ok(())
}

/// Reply first, then broadcast
fn deliver(subscribers: &mut Vec<Sender<String>>, reply: &Sender<String>, dispatch: Dispatch) {
    if reply.send(encode(&dispatch.response)).is_err() {
        debug!("Caller stopped waiting before the reply was ready");
    }
    if let Some(notification) = dispatch.broadcast {
        fan_out(subscribers, notification);
    }
}

/// Send a notification to every live subscriber, dropping closed ones
fn fan_out(subscribers: &mut Vec<Sender<String>>, notification: Notification) {
    let payload = match serde_json::to_string(&notification) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Failed to encode notification: {}", e);
            return;
        }
    };

    subscribers.retain(|tx| tx.send(payload.clone()).is_ok());
    debug!("Broadcast {:?} to {} page agent(s)", notification, subscribers.len());
}
