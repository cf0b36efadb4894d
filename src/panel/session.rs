//! AssistantSession: the state behind one panel.
//!
//! Owns the chat store, the tracked-file set, and the current loop's
//! cancellation token. Inbound events come in through
//! [`AssistantSession::dispatch`]; everything the panel should see goes out
//! through a [`PanelSink`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::actions::{ActionBatch, ActionExecutor, SearchProvider};
use crate::agent_core::conversation::now_timestamp;
use crate::agent_core::prompt::{gather_context, system_prompt, user_context_message};
use crate::agent_core::snapshot::{restore_files, take_snapshot};
use crate::agent_core::{
    lock_store, AgentError, AgentLoop, ChatDeletion, ChatStore, DeletionConfirmer, LoopObserver,
    LoopOutcome, Message, TrackedFiles,
};
use crate::host::{EditorState, HostEditor, LocalWorkspace};
use crate::inference::{AgentConfig, ChatCompletion, Role};

use super::i18n::Translations;
use super::protocol::{Inbound, NoticeLevel, Outbound};
use super::settings::PanelSettings;

/// How long a deletion prompt waits for an answer before counting as "no".
const CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(300);

const BUSY_NOTICE: &str = "Already processing a request. Please wait or clear the conversation.";

// ─── Sink ───────────────────────────────────────────────────────────────────

/// Where outbound panel events go.
pub trait PanelSink: Send + Sync {
    fn post(&self, event: Outbound);
}

// ─── Session ────────────────────────────────────────────────────────────────

pub struct AssistantSession {
    store: Arc<Mutex<ChatStore>>,
    workspace: Arc<LocalWorkspace>,
    completion: Arc<dyn ChatCompletion>,
    agent: AgentLoop,
    tracked: Arc<TrackedFiles>,
    sink: Arc<dyn PanelSink>,
    settings: Mutex<PanelSettings>,
    settings_dir: PathBuf,
    /// Set while a query or restore is running.
    busy: AtomicBool,
    /// Cancels the running loop. Replaced at the start of each query.
    cancel: Mutex<CancellationToken>,
    /// Parent of every query token; cancelled once the panel goes away.
    shutdown: CancellationToken,
    pending_confirmations: Mutex<HashMap<String, oneshot::Sender<bool>>>,
}

impl AssistantSession {
    pub fn new(
        store: ChatStore,
        workspace: Arc<LocalWorkspace>,
        completion: Arc<dyn ChatCompletion>,
        search: Arc<dyn SearchProvider>,
        sink: Arc<dyn PanelSink>,
        config: &AgentConfig,
        settings_dir: PathBuf,
    ) -> Arc<Self> {
        let store = Arc::new(Mutex::new(store));
        let tracked = Arc::new(TrackedFiles::new());
        let host: Arc<dyn HostEditor> = workspace.clone();

        let executor = Arc::new(ActionExecutor::new(
            host.clone(),
            search,
            tracked.clone(),
            config,
        ));
        let agent = AgentLoop::new(
            completion.clone(),
            executor,
            host,
            store.clone(),
            config.max_turns,
        );

        Arc::new(Self {
            store,
            workspace,
            completion,
            agent,
            tracked,
            sink,
            settings: Mutex::new(PanelSettings::load_or_default(&settings_dir)),
            settings_dir,
            busy: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
            shutdown: CancellationToken::new(),
            pending_confirmations: Mutex::new(HashMap::new()),
        })
    }

    /// Initial state for a freshly attached panel.
    pub fn startup(&self) {
        self.sink.post(Outbound::UpdateLanguage {
            translations: self.translations(),
        });
        self.post_chats();
        self.post_current_conversation();
    }

    /// Handle one inbound event. Queries and restores run on their own
    /// task so cancellation and confirmation replies stay responsive; their
    /// handle is returned.
    pub fn dispatch(self: &Arc<Self>, event: Inbound) -> Option<JoinHandle<()>> {
        match event {
            Inbound::SendQuery { value } => {
                let session = self.clone();
                return Some(tokio::spawn(async move { session.send_query(value).await }));
            }
            Inbound::RestoreState { message_id } => {
                let session = self.clone();
                return Some(tokio::spawn(
                    async move { session.restore_state(&message_id).await },
                ));
            }
            Inbound::ClearConversation => self.clear_conversation(),
            Inbound::ToggleLanguage => self.toggle_language(),
            Inbound::CreateNewChat { title } => self.create_chat(title.as_deref()),
            Inbound::SwitchChat { chat_id } => self.switch_chat(&chat_id),
            Inbound::RenameChat { chat_id, new_title } => self.rename_chat(&chat_id, &new_title),
            Inbound::DeleteChat { chat_id } => self.delete_chat(&chat_id),
            Inbound::EditorState(state) => self.update_editor_state(state),
            Inbound::FileCreated { path } => {
                tracing::debug!(path = %path, "file created");
                self.track(&path);
            }
            Inbound::ConfirmDeletionResponse {
                request_id,
                approved,
            } => self.answer_confirmation(&request_id, approved),
        }
        None
    }

    // ─── Queries ────────────────────────────────────────────────────────

    /// Run one user message through the action loop.
    pub async fn send_query(&self, value: String) {
        let Some(_busy) = BusyGuard::acquire(&self.busy) else {
            tracing::info!("query rejected, a loop is already running");
            self.sink.post(Outbound::notice(NoticeLevel::Warning, BUSY_NOTICE));
            return;
        };

        let token = self.shutdown.child_token();
        *lock(&self.cancel) = token.clone();

        tracing::info!(chars = value.len(), "=== USER QUERY ===");

        match self.prepare_turn(value, &token).await {
            Ok(Some(chat_id)) => self.run_loop(&chat_id, &token).await,
            Ok(None) => tracing::info!("query cancelled before the loop started"),
            Err(e) => self.report_store_error(&e),
        }

        self.sink.post(Outbound::SetLoading { is_loading: false });
    }

    async fn run_loop(&self, chat_id: &str, token: &CancellationToken) {
        self.sink.post(Outbound::SetLoading { is_loading: true });

        let observer = PanelObserver {
            sink: self.sink.as_ref(),
            translations: self.translations(),
        };
        match self.agent.run(chat_id, &observer, token).await {
            Ok(LoopOutcome::Failed(e)) => {
                self.post_assistant(format!("❌ {}", e.user_message()));
                self.post_assistant(self.translations().error_message.to_string());
            }
            Ok(LoopOutcome::TurnLimit) => {
                self.sink.post(Outbound::notice(
                    NoticeLevel::Warning,
                    format!(
                        "Stopped after {} model calls without a stop action.",
                        self.agent.max_turns()
                    ),
                ));
            }
            Ok(_) => {}
            Err(e) => self.report_store_error(&e),
        }
    }

    /// Persist the user message, snapshot the workspace, and add the
    /// system prompt and context. `None` when cancelled along the way.
    async fn prepare_turn(
        &self,
        value: String,
        token: &CancellationToken,
    ) -> Result<Option<String>, AgentError> {
        let host: &dyn HostEditor = self.workspace.as_ref();

        let (chat_id, user_message) = {
            let store = lock_store(&self.store);
            let chat_id = store.current_chat_id().to_string();
            let message = store.append_message(&chat_id, Role::User, value)?;
            (chat_id, message)
        };

        let snapshot =
            take_snapshot(host, &self.tracked, &chat_id, &user_message.timestamp).await;
        if let Err(e) = lock_store(&self.store).save_snapshot(&snapshot) {
            tracing::warn!(error = %e, "failed to save state snapshot");
        }

        self.sink.post(Outbound::AddMessage {
            message: user_message,
        });

        let prompt = system_prompt(host);
        let context = gather_context(host).await;
        if token.is_cancelled() {
            return Ok(None);
        }

        let store = lock_store(&self.store);
        store.refresh_system_prompt(&chat_id, &prompt)?;
        store.append_message(&chat_id, Role::System, user_context_message(&context))?;
        Ok(Some(chat_id))
    }

    /// Cancel any running loop and drop the current chat's visible history.
    pub fn clear_conversation(&self) {
        lock(&self.cancel).cancel();
        self.completion.abort();

        {
            let store = lock_store(&self.store);
            let chat_id = store.current_chat_id().to_string();
            if let Err(e) = store.clear_conversation(&chat_id) {
                drop(store);
                self.report_store_error(&e);
                return;
            }
        }

        self.sink.post(Outbound::ClearConversation);
        self.sink.post(Outbound::SetLoading { is_loading: false });
    }

    /// The panel went away: stop the running loop and refuse every
    /// outstanding deletion prompt.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.completion.abort();
        tracing::info!("session shut down");
    }

    // ─── Restore ────────────────────────────────────────────────────────

    /// Put the workspace and the current chat back to just after the user
    /// message `message_id` was sent.
    pub async fn restore_state(&self, message_id: &str) {
        let Some(_busy) = BusyGuard::acquire(&self.busy) else {
            self.sink.post(Outbound::notice(NoticeLevel::Warning, BUSY_NOTICE));
            return;
        };

        let target = {
            let store = lock_store(&self.store);
            let chat_id = store.current_chat_id().to_string();
            store
                .restore_point(&chat_id, message_id)
                .map(|snapshot| (chat_id, snapshot))
        };

        let (chat_id, snapshot) = match target {
            Ok(target) => target,
            Err(AgentError::SnapshotNotFound { .. }) => {
                self.sink.post(Outbound::notice(
                    NoticeLevel::Error,
                    "No previous state found for this message",
                ));
                return;
            }
            Err(AgentError::MessageNotFound { .. }) => {
                self.sink.post(Outbound::notice(
                    NoticeLevel::Error,
                    "Message not found in conversation",
                ));
                return;
            }
            Err(e) => {
                self.report_store_error(&e);
                return;
            }
        };

        let report = restore_files(
            self.workspace.as_ref(),
            &self.tracked,
            &snapshot,
            &PanelConfirmer { session: self },
        )
        .await;

        if report.deleted > 0 {
            self.sink.post(Outbound::notice(
                NoticeLevel::Info,
                format!("Deleted {} file(s) created after the message", report.deleted),
            ));
        }
        let summary = if report.restored > 0 {
            format!("Restored {} file(s) to state before message", report.restored)
        } else {
            "Restored to initial state before any changes".to_string()
        };
        self.sink.post(Outbound::notice(NoticeLevel::Info, summary));

        let truncated = {
            let store = lock_store(&self.store);
            store
                .truncate_after(&chat_id, message_id)
                .and_then(|_| store.display_messages(&chat_id))
        };
        match truncated {
            Ok(messages) => self.sink.post(Outbound::RestoreConversation { messages }),
            Err(e) => self.report_store_error(&e),
        }
    }

    /// Ask the panel to approve deleting `paths`.
    async fn request_deletion(&self, paths: &[String]) -> bool {
        let request_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        lock(&self.pending_confirmations).insert(request_id.clone(), tx);

        self.sink.post(Outbound::ConfirmDeletion {
            request_id: request_id.clone(),
            paths: paths.to_vec(),
        });

        let approved = tokio::select! {
            _ = self.shutdown.cancelled() => false,
            answer = tokio::time::timeout(CONFIRMATION_TIMEOUT, rx) => match answer {
                Ok(Ok(approved)) => approved,
                Ok(Err(_)) => false,
                Err(_) => {
                    tracing::warn!(request_id = %request_id, "deletion confirmation timed out");
                    false
                }
            },
        };
        lock(&self.pending_confirmations).remove(&request_id);

        tracing::info!(request_id = %request_id, approved, files = paths.len(), "deletion confirmation");
        approved
    }

    fn answer_confirmation(&self, request_id: &str, approved: bool) {
        match lock(&self.pending_confirmations).remove(request_id) {
            Some(tx) => {
                let _ = tx.send(approved);
            }
            None => tracing::warn!(request_id, "confirmation for unknown request"),
        }
    }

    // ─── Chats ──────────────────────────────────────────────────────────

    pub fn create_chat(&self, title: Option<&str>) {
        let created = lock_store(&self.store).create_chat(title);
        match created {
            Ok(_) => self.post_chats(),
            Err(e) => self.report_store_error(&e),
        }
    }

    /// Unknown chat ids are ignored.
    pub fn switch_chat(&self, chat_id: &str) {
        let switched = lock_store(&self.store).switch_chat(chat_id);
        match switched {
            Ok(true) => {
                self.post_switch();
                self.post_chats();
            }
            Ok(false) => {}
            Err(e) => self.report_store_error(&e),
        }
    }

    pub fn rename_chat(&self, chat_id: &str, title: &str) {
        let renamed = lock_store(&self.store).rename_chat(chat_id, title);
        match renamed {
            Ok(true) => self.post_chats(),
            Ok(false) => {}
            Err(e) => self.report_store_error(&e),
        }
    }

    pub fn delete_chat(&self, chat_id: &str) {
        let deleted = lock_store(&self.store).delete_chat(chat_id);
        match deleted {
            Ok(ChatDeletion::Deleted {
                current_changed: true,
            }) => self.post_switch(),
            Ok(_) => {}
            Err(e) => {
                self.report_store_error(&e);
                return;
            }
        }
        self.post_chats();
    }

    // ─── Language & Editor State ────────────────────────────────────────

    pub fn toggle_language(&self) {
        let language = {
            let mut settings = lock(&self.settings);
            settings.language = settings.language.toggled();
            settings.save(&self.settings_dir);
            settings.language
        };
        tracing::info!(language = language.code(), "language toggled");

        self.sink.post(Outbound::UpdateLanguage {
            translations: language.translations(),
        });
        self.post_current_conversation();
        self.post_chats();
    }

    /// Record the editor's latest state; its last edit joins the tracked set.
    pub fn update_editor_state(&self, state: EditorState) {
        if let Some(edit) = &state.recent_edit {
            self.track(&edit.path);
        }
        self.workspace.set_editor_state(state);
    }

    // ─── Helpers ────────────────────────────────────────────────────────

    /// Add a path to the tracked set under the same absolute key that
    /// actions and snapshots use.
    fn track(&self, path: &str) {
        let resolved = self.workspace.resolve_path(path);
        self.tracked.insert(resolved.to_string_lossy().into_owned());
    }

    fn translations(&self) -> Translations {
        lock(&self.settings).language.translations()
    }

    /// Show an assistant-styled status message without persisting it.
    fn post_assistant(&self, content: String) {
        self.sink.post(Outbound::AddMessage {
            message: status_message(content),
        });
    }

    fn post_chats(&self) {
        let listed = {
            let store = lock_store(&self.store);
            store
                .chats()
                .map(|chats| (chats, store.current_chat_id().to_string()))
        };
        match listed {
            Ok((chats, current_chat_id)) => self.sink.post(Outbound::UpdateChats {
                chats,
                current_chat_id,
            }),
            Err(e) => tracing::error!(error = %e, "failed to list chats"),
        }
    }

    fn post_switch(&self) {
        let current = {
            let store = lock_store(&self.store);
            let chat_id = store.current_chat_id().to_string();
            store.display_messages(&chat_id).map(|m| (chat_id, m))
        };
        match current {
            Ok((chat_id, messages)) => self.sink.post(Outbound::SwitchChat { chat_id, messages }),
            Err(e) => tracing::error!(error = %e, "failed to load current chat"),
        }
    }

    fn post_current_conversation(&self) {
        let messages = {
            let store = lock_store(&self.store);
            let chat_id = store.current_chat_id().to_string();
            store.display_messages(&chat_id)
        };
        match messages {
            Ok(messages) => self.sink.post(Outbound::RestoreConversation { messages }),
            Err(e) => tracing::error!(error = %e, "failed to load current chat"),
        }
    }

    fn report_store_error(&self, error: &AgentError) {
        tracing::error!(error = %error, "chat store operation failed");
        self.sink
            .post(Outbound::notice(NoticeLevel::Error, format!("Error: {error}")));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn status_message(content: String) -> Message {
    Message {
        role: Role::Assistant,
        content,
        timestamp: now_timestamp(),
    }
}

/// Holds the busy flag for the lifetime of a query or restore.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ─── Loop & Restore Adapters ────────────────────────────────────────────────

struct PanelObserver<'a> {
    sink: &'a dyn PanelSink,
    translations: Translations,
}

impl LoopObserver for PanelObserver<'_> {
    fn on_assistant_reply(&self, message: &Message) {
        self.sink.post(Outbound::AddMessage {
            message: message.clone(),
        });
    }

    fn on_batch_started(&self, _batch: &ActionBatch) {
        self.sink.post(Outbound::AddMessage {
            message: status_message(self.translations.working_message.to_string()),
        });
        self.sink.post(Outbound::SetLoading { is_loading: true });
    }

    fn on_task_completed(&self) {
        self.sink.post(Outbound::AddMessage {
            message: status_message(self.translations.task_completed_message.to_string()),
        });
    }
}

struct PanelConfirmer<'a> {
    session: &'a AssistantSession,
}

#[async_trait]
impl DeletionConfirmer for PanelConfirmer<'_> {
    async fn confirm_deletion(&self, paths: &[String]) -> bool {
        self.session.request_deletion(paths).await
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
