//! AgentLoop: the request / act / report cycle behind one user message.
//!
//! ```text
//! AwaitingCompletion ──reply with actions──▶ ExecutingActions
//!        ▲                                        │
//!        └──────────── no stop action ────────────┤
//!                                                 ▼
//!   no actions / error / cancel / turn cap ──▶ Done ◀── stop action
//! ```
//!
//! Between user messages the session is idle (awaiting user input); the
//! session's busy flag guarantees a single loop at a time.

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::actions::{ActionBatch, ActionExecutor};
use crate::host::HostEditor;
use crate::inference::{ChatCompletion, InferenceError, Role};

use super::action_parser::parse_action_batch;
use super::conversation::{lock_store, ChatStore};
use super::errors::AgentError;
use super::prompt::{gather_context, results_message, updated_context_message};
use super::types::Message;

// ─── Types ──────────────────────────────────────────────────────────────────

/// How a loop run ended.
#[derive(Debug)]
pub enum LoopOutcome {
    /// A batch contained a `stop` action.
    Stopped,
    /// The last reply carried no action batch.
    NoActions,
    /// `max_turns` model calls were made without a stop.
    TurnLimit,
    /// The run was cancelled; nothing more is appended.
    Cancelled,
    /// The completion request failed.
    Failed(InferenceError),
}

#[derive(Debug)]
enum LoopState {
    AwaitingCompletion,
    ExecutingActions(ActionBatch),
    Done(LoopOutcome),
}

/// Progress callbacks, used by the panel to render the run.
pub trait LoopObserver: Send + Sync {
    /// An assistant reply was persisted. Fires before its actions run.
    fn on_assistant_reply(&self, message: &Message);

    /// A batch is about to execute.
    fn on_batch_started(&self, batch: &ActionBatch);

    /// A batch containing `stop` finished executing.
    fn on_task_completed(&self);
}

// ─── AgentLoop ──────────────────────────────────────────────────────────────

pub struct AgentLoop {
    completion: Arc<dyn ChatCompletion>,
    executor: Arc<ActionExecutor>,
    host: Arc<dyn HostEditor>,
    store: Arc<Mutex<ChatStore>>,
    max_turns: u32,
}

impl AgentLoop {
    pub fn new(
        completion: Arc<dyn ChatCompletion>,
        executor: Arc<ActionExecutor>,
        host: Arc<dyn HostEditor>,
        store: Arc<Mutex<ChatStore>>,
        max_turns: u32,
    ) -> Self {
        Self {
            completion,
            executor,
            host,
            store,
            max_turns,
        }
    }

    pub fn max_turns(&self) -> u32 {
        self.max_turns
    }

    /// Drive the loop for `chat_id` until it reaches `Done`.
    ///
    /// The chat must already hold the user message and context. Store
    /// failures abort the run with an error; everything else ends in a
    /// [`LoopOutcome`].
    pub async fn run(
        &self,
        chat_id: &str,
        observer: &dyn LoopObserver,
        cancel: &CancellationToken,
    ) -> Result<LoopOutcome, AgentError> {
        let mut state = LoopState::AwaitingCompletion;
        let mut turns: u32 = 0;

        loop {
            state = match state {
                LoopState::Done(outcome) => {
                    tracing::info!(chat_id, turns, outcome = ?outcome, "=== AGENT LOOP DONE ===");
                    return Ok(outcome);
                }
                _ if cancel.is_cancelled() => LoopState::Done(LoopOutcome::Cancelled),
                LoopState::AwaitingCompletion => {
                    if turns >= self.max_turns {
                        tracing::warn!(chat_id, max_turns = self.max_turns, "turn limit reached");
                        LoopState::Done(LoopOutcome::TurnLimit)
                    } else {
                        turns += 1;
                        self.request_completion(chat_id, turns, observer, cancel)
                            .await?
                    }
                }
                LoopState::ExecutingActions(batch) => {
                    self.execute_batch(chat_id, batch, observer, cancel).await?
                }
            };
        }
    }

    async fn request_completion(
        &self,
        chat_id: &str,
        turn: u32,
        observer: &dyn LoopObserver,
        cancel: &CancellationToken,
    ) -> Result<LoopState, AgentError> {
        let history = lock_store(&self.store).history(chat_id)?;
        tracing::info!(chat_id, turn, messages = history.len(), "requesting completion");

        let reply = tokio::select! {
            _ = cancel.cancelled() => {
                self.completion.abort();
                return Ok(LoopState::Done(LoopOutcome::Cancelled));
            }
            reply = self.completion.complete(&history) => reply,
        };

        // A late reply to an aborted request is dropped
        if cancel.is_cancelled() {
            return Ok(LoopState::Done(LoopOutcome::Cancelled));
        }

        let text = match reply {
            Ok(text) => text,
            Err(e) if e.is_cancelled() => return Ok(LoopState::Done(LoopOutcome::Cancelled)),
            Err(e) => {
                tracing::error!(chat_id, turn, error = %e, "completion failed");
                return Ok(LoopState::Done(LoopOutcome::Failed(e)));
            }
        };

        let message = lock_store(&self.store).append_message(chat_id, Role::Assistant, text)?;
        observer.on_assistant_reply(&message);

        Ok(match parse_action_batch(&message.content) {
            Some(batch) => LoopState::ExecutingActions(batch),
            None => LoopState::Done(LoopOutcome::NoActions),
        })
    }

    async fn execute_batch(
        &self,
        chat_id: &str,
        batch: ActionBatch,
        observer: &dyn LoopObserver,
        cancel: &CancellationToken,
    ) -> Result<LoopState, AgentError> {
        let stop = batch.has_stop();
        tracing::info!(
            chat_id,
            actions = batch.actions.len(),
            thoughts = batch.thoughts.as_deref().unwrap_or("No thoughts provided"),
            "processing agent actions"
        );
        observer.on_batch_started(&batch);

        // Dropping the batch future kills any child process it spawned
        let executed = tokio::select! {
            _ = cancel.cancelled() => return Ok(LoopState::Done(LoopOutcome::Cancelled)),
            executed = self.executor.execute_batch(batch.actions) => executed,
        };
        if cancel.is_cancelled() {
            return Ok(LoopState::Done(LoopOutcome::Cancelled));
        }

        if stop {
            tracing::info!(chat_id, "stop action detected, halting after execution");
            observer.on_task_completed();
            return Ok(LoopState::Done(LoopOutcome::Stopped));
        }

        let context = gather_context(self.host.as_ref()).await;
        if cancel.is_cancelled() {
            return Ok(LoopState::Done(LoopOutcome::Cancelled));
        }
        let store = lock_store(&self.store);
        store.append_message(chat_id, Role::System, updated_context_message(&context))?;
        store.append_message(chat_id, Role::System, results_message(&executed))?;

        Ok(LoopState::AwaitingCompletion)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{ActionError, SearchHit, SearchProvider};
    use crate::agent_core::database::AgentDatabase;
    use crate::agent_core::snapshot::TrackedFiles;
    use crate::host::{ActiveEditor, HostError, LocalWorkspace, OpenDocument, RecentEdit, TextMatch};
    use crate::inference::{AgentConfig, ChatMessage};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    // ─── Fakes ──────────────────────────────────────────────────────────

    enum Step {
        Reply(String),
        Fail(InferenceError),
        Hang,
    }

    #[derive(Default)]
    struct ScriptedCompletion {
        steps: Mutex<VecDeque<Step>>,
        repeat: Option<String>,
        calls: AtomicUsize,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
        aborted: AtomicBool,
    }

    impl ScriptedCompletion {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: Mutex::new(steps.into()),
                ..Default::default()
            }
        }

        fn repeating(reply: &str) -> Self {
            Self {
                repeat: Some(reply.to_string()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl ChatCompletion for ScriptedCompletion {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(messages.to_vec());
            let step = self.steps.lock().unwrap().pop_front();
            match step {
                Some(Step::Reply(text)) => Ok(text),
                Some(Step::Fail(e)) => Err(e),
                Some(Step::Hang) => std::future::pending().await,
                None => Ok(self.repeat.clone().unwrap_or_default()),
            }
        }

        fn abort(&self) {
            self.aborted.store(true, Ordering::SeqCst);
        }
    }

    struct NoSearch;

    #[async_trait]
    impl SearchProvider for NoSearch {
        async fn search(&self, _q: &str, _n: usize) -> Result<Vec<SearchHit>, ActionError> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct Recorder {
        replies: Mutex<Vec<String>>,
        batches: AtomicUsize,
        completed: AtomicUsize,
    }

    impl LoopObserver for Recorder {
        fn on_assistant_reply(&self, message: &Message) {
            self.replies.lock().unwrap().push(message.content.clone());
        }
        fn on_batch_started(&self, _batch: &ActionBatch) {
            self.batches.fetch_add(1, Ordering::SeqCst);
        }
        fn on_task_completed(&self) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        dir: TempDir,
        store: Arc<Mutex<ChatStore>>,
        completion: Arc<ScriptedCompletion>,
        agent: AgentLoop,
        chat_id: String,
    }

    fn harness(completion: ScriptedCompletion, max_turns: u32) -> Harness {
        harness_with_host(completion, max_turns, |root| {
            Arc::new(LocalWorkspace::new(Some(root)))
        })
    }

    fn harness_with_host(
        completion: ScriptedCompletion,
        max_turns: u32,
        make_host: impl FnOnce(std::path::PathBuf) -> Arc<dyn HostEditor>,
    ) -> Harness {
        let dir = TempDir::new().unwrap();
        let host = make_host(dir.path().to_path_buf());
        let store = ChatStore::open(AgentDatabase::open(":memory:").unwrap()).unwrap();
        let chat_id = store.current_chat_id().to_string();
        store.append_message(&chat_id, Role::User, "do it").unwrap();
        let store = Arc::new(Mutex::new(store));

        let executor = Arc::new(ActionExecutor::new(
            host.clone(),
            Arc::new(NoSearch),
            Arc::new(TrackedFiles::new()),
            &AgentConfig::default(),
        ));
        let completion = Arc::new(completion);
        let agent = AgentLoop::new(completion.clone(), executor, host, store.clone(), max_turns);

        Harness {
            dir,
            store,
            completion,
            agent,
            chat_id,
        }
    }

    /// Workspace that fires `cancel` while editor context is being read.
    struct CancelOnContext {
        inner: LocalWorkspace,
        cancel: CancellationToken,
    }

    #[async_trait]
    impl HostEditor for CancelOnContext {
        fn workspace_root(&self) -> Option<std::path::PathBuf> {
            self.inner.workspace_root()
        }
        async fn read_text(&self, path: &std::path::Path) -> Result<String, HostError> {
            self.inner.read_text(path).await
        }
        async fn write_text(&self, path: &std::path::Path, content: &str) -> Result<(), HostError> {
            self.inner.write_text(path, content).await
        }
        async fn delete_file(&self, path: &std::path::Path) -> Result<bool, HostError> {
            self.inner.delete_file(path).await
        }
        async fn find_files(&self, glob: &str, limit: usize) -> Result<Vec<String>, HostError> {
            self.inner.find_files(glob, limit).await
        }
        async fn find_text_matches(
            &self,
            needle: &str,
            limit: usize,
        ) -> Result<Vec<TextMatch>, HostError> {
            self.inner.find_text_matches(needle, limit).await
        }
        async fn open_documents(&self) -> Vec<OpenDocument> {
            self.cancel.cancel();
            self.inner.open_documents().await
        }
        fn active_editor(&self) -> Option<ActiveEditor> {
            self.inner.active_editor()
        }
        fn terminals(&self) -> Vec<String> {
            self.inner.terminals()
        }
        fn recent_edit(&self) -> Option<RecentEdit> {
            self.inner.recent_edit()
        }
    }

    fn fenced(json: &str) -> String {
        format!("Working on it.\n```json\n{json}\n```")
    }

    // ─── Tests ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_write_and_stop_in_one_batch() {
        let h = harness(
            ScriptedCompletion::new(vec![Step::Reply(fenced(
                r#"{"actions":[{"type":"write","data":{"path":"a.txt","content":"hi"}},{"type":"stop"}]}"#,
            ))]),
            25,
        );
        let rec = Recorder::default();

        let outcome = h
            .agent
            .run(&h.chat_id, &rec, &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(outcome, LoopOutcome::Stopped));
        assert_eq!(std::fs::read_to_string(h.dir.path().join("a.txt")).unwrap(), "hi");
        assert_eq!(h.completion.calls.load(Ordering::SeqCst), 1);
        assert_eq!(rec.completed.load(Ordering::SeqCst), 1);

        let messages = lock_store(&h.store).messages(&h.chat_id).unwrap();
        assert_eq!(messages.last().unwrap().role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_prose_reply_ends_without_actions() {
        let h = harness(
            ScriptedCompletion::new(vec![Step::Reply("Just an explanation.".into())]),
            25,
        );
        let rec = Recorder::default();
        let outcome = h
            .agent
            .run(&h.chat_id, &rec, &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(outcome, LoopOutcome::NoActions));
        assert_eq!(rec.batches.load(Ordering::SeqCst), 0);
        assert_eq!(rec.replies.lock().unwrap().as_slice(), ["Just an explanation."]);
        assert_eq!(std::fs::read_dir(h.dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_results_are_fed_back() {
        let h = harness(
            ScriptedCompletion::new(vec![
                Step::Reply(fenced(r#"{"actions":[{"type":"analyze","data":{"n":7}}]}"#)),
                Step::Reply("All done.".into()),
            ]),
            25,
        );
        let outcome = h
            .agent
            .run(&h.chat_id, &Recorder::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(outcome, LoopOutcome::NoActions));
        let seen = h.completion.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);

        let second = &seen[1];
        let n = second.len();
        assert_eq!(second[n - 3].role, Role::Assistant);
        assert!(second[n - 2].content.starts_with("Updated context after actions:\n"));
        assert!(second[n - 1]
            .content
            .starts_with("The assistant has completed the actions."));
        assert!(second[n - 1].content.contains("\"n\": 7"));
    }

    #[tokio::test]
    async fn test_turn_limit() {
        let h = harness(
            ScriptedCompletion::repeating(&fenced(r#"{"actions":[{"type":"analyze"}]}"#)),
            3,
        );
        let outcome = h
            .agent
            .run(&h.chat_id, &Recorder::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(outcome, LoopOutcome::TurnLimit));
        assert_eq!(h.completion.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_completion_failure() {
        let h = harness(
            ScriptedCompletion::new(vec![Step::Fail(InferenceError::RateLimited)]),
            25,
        );
        let outcome = h
            .agent
            .run(&h.chat_id, &Recorder::default(), &CancellationToken::new())
            .await
            .unwrap();

        match outcome {
            LoopOutcome::Failed(e) => {
                assert_eq!(e.user_message(), "Rate limit exceeded. Please try again later.")
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        // Nothing appended beyond the user message
        assert_eq!(lock_store(&h.store).messages(&h.chat_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_aborts_in_flight_request() {
        let h = harness(ScriptedCompletion::new(vec![Step::Hang]), 25);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let outcome = h
            .agent
            .run(&h.chat_id, &Recorder::default(), &cancel)
            .await
            .unwrap();

        assert!(matches!(outcome, LoopOutcome::Cancelled));
        assert!(h.completion.aborted.load(Ordering::SeqCst));
        assert_eq!(lock_store(&h.store).messages(&h.chat_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_while_gathering_context_appends_nothing() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let h = harness_with_host(
            ScriptedCompletion::new(vec![
                Step::Reply(fenced(r#"{"actions":[{"type":"analyze"}]}"#)),
                Step::Reply("never asked".into()),
            ]),
            25,
            move |root| {
                Arc::new(CancelOnContext {
                    inner: LocalWorkspace::new(Some(root)),
                    cancel: trigger,
                })
            },
        );

        let outcome = h
            .agent
            .run(&h.chat_id, &Recorder::default(), &cancel)
            .await
            .unwrap();

        assert!(matches!(outcome, LoopOutcome::Cancelled));
        assert_eq!(h.completion.calls.load(Ordering::SeqCst), 1);
        let roles: Vec<Role> = lock_store(&h.store)
            .messages(&h.chat_id)
            .unwrap()
            .into_iter()
            .map(|m| m.role)
            .collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_makes_no_call() {
        let h = harness(ScriptedCompletion::new(vec![]), 25);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = h
            .agent
            .run(&h.chat_id, &Recorder::default(), &cancel)
            .await
            .unwrap();
        assert!(matches!(outcome, LoopOutcome::Cancelled));
        assert_eq!(h.completion.calls.load(Ordering::SeqCst), 0);
    }
}
