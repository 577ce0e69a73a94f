//! Session controller: sequences sign-in, token checks and API calls in
//! response to user intent, and owns the background job poll.
//!
//! The controller is the single owner of view state and the only caller of
//! the session manager. Background work (the poll, error dismissal) never
//! writes state or touches credential storage; it sends a `ControllerEvent`
//! that the owner applies with [`SessionController::apply`]. Observers read
//! snapshots through the `watch` receiver.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::api::{items, jobs, roles, workspaces, ApiError, FabricClient};
use crate::auth::{AuthError, Credential, SessionManager};
use crate::config::{Configuration, Settings};
use crate::error::Error;
use crate::models::{Item, JobInstance, Workspace};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    SignedOut,
    Authenticating,
    SignedIn,
    /// Had a session, but it can no longer be used without signing in.
    Expired,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::SignedOut => "signed out",
            SessionState::Authenticating => "signing in",
            SessionState::SignedIn => "signed in",
            SessionState::Expired => "expired",
        }
    }
}

/// What the user is looking at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Scope {
    /// The workspace list
    #[default]
    Root,
    Workspace { id: String, name: String },
}

/// Snapshot published to observers.
#[derive(Debug, Clone, Default)]
pub struct ViewState {
    pub session: SessionState,
    pub account: Option<String>,
    pub scope: Scope,
    pub workspaces: Vec<Workspace>,
    pub items: Vec<Item>,
    pub jobs: Vec<JobInstance>,
    pub error: Option<String>,
    pub busy: bool,
}

/// Messages from background tasks to the owner.
#[derive(Debug)]
pub enum ControllerEvent {
    Jobs {
        generation: u64,
        workspace_id: String,
        jobs: Vec<JobInstance>,
    },
    PollFailed {
        generation: u64,
        error: Error,
    },
    /// The poll's credential is near expiry; the owner has to renew it.
    TokenNeeded { generation: u64 },
    DismissError(u64),
}

struct Poll {
    generation: u64,
    cancel: CancellationToken,
}

pub struct SessionController {
    config: Configuration,
    session: Arc<SessionManager>,
    client: Arc<FabricClient>,
    poll_interval: Duration,
    dismiss_after: Duration,
    view: watch::Sender<ViewState>,
    events_tx: mpsc::UnboundedSender<ControllerEvent>,
    events_rx: mpsc::UnboundedReceiver<ControllerEvent>,
    poll: Option<Poll>,
    poll_generation: u64,
    error_seq: u64,
}

impl SessionController {
    pub fn new(
        config: Configuration,
        session: Arc<SessionManager>,
        client: Arc<FabricClient>,
        settings: &Settings,
    ) -> Self {
        let (view, _) = watch::channel(ViewState::default());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            session,
            client,
            poll_interval: settings.poll_interval(),
            dismiss_after: settings.error_dismiss_after(),
            view,
            events_tx,
            events_rx,
            poll: None,
            poll_generation: 0,
            error_seq: 0,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.view.subscribe()
    }

    /// Current snapshot.
    pub fn view(&self) -> ViewState {
        self.view.borrow().clone()
    }

    fn update(&self, f: impl FnOnce(&mut ViewState)) {
        self.view.send_modify(f);
    }

    /// Pick up a stored session without any interaction or API call.
    pub async fn restore(&mut self) -> bool {
        match self.session.valid_access_token(&self.config).await {
            Ok(Some(cred)) => {
                let account = cred.claims().and_then(|c| c.account().map(str::to_string));
                self.update(|v| {
                    v.session = SessionState::SignedIn;
                    v.account = account;
                });
                true
            }
            Ok(None) => {
                let had_one = matches!(self.session.stored().await, Ok(Some(_)));
                self.update(|v| {
                    v.session = if had_one {
                        SessionState::Expired
                    } else {
                        SessionState::SignedOut
                    }
                });
                false
            }
            Err(e) => {
                self.show_error(Error::from(e));
                false
            }
        }
    }

    /// Interactive sign-in followed by a refresh of the current view.
    pub async fn sign_in(&mut self) -> bool {
        self.update(|v| {
            v.session = SessionState::Authenticating;
            v.error = None;
        });

        match self.session.authenticate(&self.config).await {
            Ok(cred) => {
                let account = cred.claims().and_then(|c| c.account().map(str::to_string));
                self.update(|v| {
                    v.session = SessionState::SignedIn;
                    v.account = account;
                });
                self.refresh().await;
                true
            }
            Err(AuthError::AlreadyInProgress) => {
                tracing::debug!("Sign-in already in progress");
                false
            }
            Err(e) => {
                self.update(|v| v.session = SessionState::SignedOut);
                self.handle_error(e.into());
                false
            }
        }
    }

    /// Stop background work, forget the credential and reset the view.
    pub async fn sign_out(&mut self) {
        self.stop_poll();
        if let Err(e) = self.session.sign_out().await {
            self.show_error(e.into());
            return;
        }
        self.view.send_replace(ViewState::default());
    }

    /// Reload whatever the current scope shows. Safe to call repeatedly.
    pub async fn refresh(&mut self) {
        let Some(cred) = self.ensure_token().await else {
            return;
        };
        self.update(|v| v.busy = true);

        let scope = self.view.borrow().scope.clone();
        let result = match &scope {
            Scope::Root => self.load_workspaces(&cred.access_token).await,
            Scope::Workspace { id, .. } => self.load_workspace(&cred.access_token, id).await,
        };

        self.update(|v| v.busy = false);
        match result {
            // A workspace view is only live while its poll runs
            Ok(()) => {
                let expired = self.view.borrow().session == SessionState::Expired;
                if let (Scope::Workspace { id, .. }, false) = (&scope, expired) {
                    let items = self.view.borrow().items.clone();
                    self.start_poll(id.clone(), items, cred);
                }
            }
            Err(e) => self.handle_error(e),
        }
    }

    async fn load_workspaces(&self, token: &str) -> Result<(), Error> {
        let mut list = workspaces::list_workspaces(&self.client, token).await?;

        let principal = crate::auth::TokenClaims::decode(token).and_then(|c| c.oid);
        if let Some(principal) = principal {
            let found = roles::lookup_roles(&self.client, token, &list, &principal).await;
            roles::apply_roles(&mut list, &found);
        }

        self.update(|v| v.workspaces = list);
        Ok(())
    }

    /// Items and jobs of one workspace. When no job lookup succeeds the
    /// failure goes on the banner and the previous jobs stay.
    async fn load_workspace(&mut self, token: &str, workspace_id: &str) -> Result<(), Error> {
        let item_list = items::list_items(&self.client, token, workspace_id).await?;
        let job_list = jobs::recent_jobs(&self.client, token, workspace_id, &item_list).await;
        self.update(|v| v.items = item_list);
        match job_list {
            Ok(list) => self.update(|v| v.jobs = list),
            Err(e) => self.handle_error(e.into()),
        }
        Ok(())
    }

    /// Switch to a workspace and start polling its jobs.
    pub async fn open_workspace(&mut self, workspace_id: &str) {
        let known = self
            .view
            .borrow()
            .workspaces
            .iter()
            .find(|w| w.id == workspace_id)
            .map(|w| w.display_name.clone());

        let name = match known {
            Some(name) => name,
            None => {
                let Some(cred) = self.ensure_token().await else {
                    return;
                };
                match workspaces::get_workspace(&self.client, &cred.access_token, workspace_id).await {
                    Ok(ws) => ws.display_name,
                    Err(e) => {
                        self.handle_error(e.into());
                        return;
                    }
                }
            }
        };

        self.stop_poll();
        self.update(|v| {
            v.scope = Scope::Workspace {
                id: workspace_id.to_string(),
                name,
            };
            v.items.clear();
            v.jobs.clear();
        });
        self.refresh().await;
    }

    /// Back to the workspace list. The poll stops before anything else.
    pub async fn go_root(&mut self) {
        self.stop_poll();
        self.update(|v| {
            v.scope = Scope::Root;
            v.items.clear();
            v.jobs.clear();
        });
        self.refresh().await;
    }

    /// Run one mutation with a fresh token, then refresh the view. Returns
    /// `None` when no call was made or the call failed; the failure is
    /// already on the error banner.
    pub async fn perform<T, F, Fut>(&mut self, op: F) -> Option<T>
    where
        F: FnOnce(Arc<FabricClient>, String) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let cred = self.ensure_token().await?;
        self.update(|v| v.busy = true);
        let result = op(Arc::clone(&self.client), cred.access_token).await;
        self.update(|v| v.busy = false);

        match result {
            Ok(value) => {
                self.refresh().await;
                Some(value)
            }
            Err(e) => {
                self.handle_error(e.into());
                None
            }
        }
    }

    /// A usable credential, refreshed here on the owner if needed, or `None`
    /// after moving the session to `SignedOut`/`Expired`. No API call may be
    /// attempted without one.
    async fn ensure_token(&mut self) -> Option<Credential> {
        match self.session.valid_access_token(&self.config).await {
            Ok(Some(cred)) => Some(cred),
            Ok(None) => {
                self.stop_poll();
                self.update(|v| {
                    v.session = match v.session {
                        SessionState::SignedIn | SessionState::Expired => SessionState::Expired,
                        _ => SessionState::SignedOut,
                    };
                    v.busy = false;
                });
                None
            }
            Err(e) => {
                self.handle_error(e.into());
                None
            }
        }
    }

    fn handle_error(&mut self, error: Error) {
        if error.is_user_cancelled() {
            tracing::debug!("Sign-in cancelled by user");
            return;
        }
        if error.is_unauthorized() {
            self.stop_poll();
            self.update(|v| v.session = SessionState::Expired);
        }
        self.show_error(error);
    }

    /// Put `error` on the banner and schedule its dismissal.
    fn show_error(&mut self, error: Error) {
        tracing::warn!("{}", error);
        self.error_seq += 1;
        let seq = self.error_seq;
        let message = error.to_string();
        self.update(|v| v.error = Some(message));

        let tx = self.events_tx.clone();
        let after = self.dismiss_after;
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(ControllerEvent::DismissError(seq));
        });
    }

    /// Poll with `credential` until it nears expiry. The poll never refreshes
    /// or persists it.
    fn start_poll(&mut self, workspace_id: String, items: Vec<Item>, credential: Credential) {
        self.stop_poll();
        self.poll_generation += 1;
        let generation = self.poll_generation;
        let cancel = CancellationToken::new();
        self.poll = Some(Poll {
            generation,
            cancel: cancel.clone(),
        });

        tracing::debug!("Polling jobs of {} every {:?}", workspace_id, self.poll_interval);
        tokio::spawn(poll_jobs(
            generation,
            cancel,
            self.poll_interval,
            Arc::clone(&self.client),
            credential,
            workspace_id,
            items,
            self.events_tx.clone(),
        ));
    }

    /// Cancel the poll. No request starts after this returns.
    pub fn stop_poll(&mut self) {
        if let Some(poll) = self.poll.take() {
            tracing::debug!("Stopping job poll #{}", poll.generation);
            poll.cancel.cancel();
        }
    }

    pub fn is_polling(&self) -> bool {
        self.poll.is_some()
    }

    /// Wait for the next background event. Use inside `tokio::select!`.
    pub async fn next_event(&mut self) -> Option<ControllerEvent> {
        self.events_rx.recv().await
    }

    /// Apply a background event on the owner. Events from a poll that has
    /// since been replaced or stopped are dropped.
    pub async fn apply(&mut self, event: ControllerEvent) {
        let live = |generation: u64, poll: &Option<Poll>| {
            poll.as_ref().map(|p| p.generation) == Some(generation)
        };
        match event {
            ControllerEvent::Jobs {
                generation,
                workspace_id,
                jobs,
            } => {
                if !live(generation, &self.poll) {
                    return;
                }
                self.update(|v| {
                    if matches!(&v.scope, Scope::Workspace { id, .. } if *id == workspace_id) {
                        v.jobs = jobs;
                    }
                });
            }
            ControllerEvent::PollFailed { generation, error } => {
                if live(generation, &self.poll) {
                    self.handle_error(error);
                }
            }
            ControllerEvent::TokenNeeded { generation } => {
                if live(generation, &self.poll) {
                    tracing::debug!("Poll #{} needs a fresh token", generation);
                    self.refresh().await;
                }
            }
            ControllerEvent::DismissError(seq) => {
                if seq == self.error_seq {
                    self.update(|v| v.error = None);
                }
            }
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.stop_poll();
    }
}

/// Background job poll. Cancellation is checked before every suspension and
/// raced against each one, so no request starts after `cancel` fires. Failed
/// rounds are reported and the poll carries on; the jobs on screen stay.
#[allow(clippy::too_many_arguments)]
async fn poll_jobs(
    generation: u64,
    cancel: CancellationToken,
    interval: Duration,
    client: Arc<FabricClient>,
    credential: Credential,
    workspace_id: String,
    items: Vec<Item>,
    events: mpsc::UnboundedSender<ControllerEvent>,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        if cancel.is_cancelled() {
            break;
        }
        if credential.is_near_expiry() {
            let _ = events.send(ControllerEvent::TokenNeeded { generation });
            break;
        }

        let round = tokio::select! {
            _ = cancel.cancelled() => break,
            res = jobs::recent_jobs(&client, &credential.access_token, &workspace_id, &items) => res,
        };
        let event = match round {
            Ok(jobs) => {
                tracing::debug!("Poll #{}: {} job runs", generation, jobs.len());
                ControllerEvent::Jobs {
                    generation,
                    workspace_id: workspace_id.clone(),
                    jobs,
                }
            }
            Err(e) => ControllerEvent::PollFailed {
                generation,
                error: e.into(),
            },
        };
        if events.send(event).is_err() {
            break;
        }
    }
    tracing::debug!("Job poll #{} ended", generation);
}
