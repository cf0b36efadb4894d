//! Test doubles shared by the panel tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use crate::actions::{ActionError, SearchHit, SearchProvider};
use crate::agent_core::{AgentDatabase, ChatStore};
use crate::host::LocalWorkspace;
use crate::inference::{AgentConfig, ChatCompletion, ChatMessage, InferenceError, Role};

use super::protocol::Outbound;
use super::session::{AssistantSession, PanelSink};

/// One scripted completion step. `None` hangs until the caller gives up.
pub(crate) type Step = Option<Result<String, InferenceError>>;

/// Replies in order, then answers with plain prose.
pub(crate) struct Scripted {
    replies: Mutex<VecDeque<Step>>,
}

#[async_trait]
impl ChatCompletion for Scripted {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, InferenceError> {
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(Some(reply)) => reply,
            Some(None) => std::future::pending().await,
            None => Ok("nothing more to do".into()),
        }
    }

    fn abort(&self) {}
}

pub(crate) struct NoSearch;

#[async_trait]
impl SearchProvider for NoSearch {
    async fn search(&self, _query: &str, _n: usize) -> Result<Vec<SearchHit>, ActionError> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
pub(crate) struct RecordingSink {
    events: Mutex<Vec<Outbound>>,
}

impl PanelSink for RecordingSink {
    fn post(&self, event: Outbound) {
        self.events.lock().unwrap().push(event);
    }
}

impl RecordingSink {
    pub(crate) fn take(&self) -> Vec<Outbound> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    pub(crate) fn assistant_texts(events: &[Outbound]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                Outbound::AddMessage { message } if message.role == Role::Assistant => {
                    Some(message.content.clone())
                }
                _ => None,
            })
            .collect()
    }

    pub(crate) fn notices(events: &[Outbound]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                Outbound::Notice { message, .. } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    /// Poll until some recorded event maps to `Some`.
    pub(crate) async fn wait_for<T>(&self, pick: impl Fn(&Outbound) -> Option<T>) -> T {
        for _ in 0..300 {
            let found = self.events.lock().unwrap().iter().find_map(&pick);
            if let Some(found) = found {
                return found;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected event never arrived");
    }

    /// Wait for a confirmDeletion event and return its id and paths.
    pub(crate) async fn wait_for_confirmation(&self) -> (String, Vec<String>) {
        self.wait_for(|e| match e {
            Outbound::ConfirmDeletion { request_id, paths } => {
                Some((request_id.clone(), paths.clone()))
            }
            _ => None,
        })
        .await
    }
}

pub(crate) struct Fixture {
    /// Workspace root.
    pub dir: TempDir,
    /// Settings directory.
    pub data: TempDir,
    pub sink: Arc<RecordingSink>,
    pub session: Arc<AssistantSession>,
}

pub(crate) fn fixture(replies: Vec<Step>) -> Fixture {
    let dir = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let sink = Arc::new(RecordingSink::default());
    let store = ChatStore::open(AgentDatabase::open(":memory:").unwrap()).unwrap();
    let session = AssistantSession::new(
        store,
        Arc::new(LocalWorkspace::new(Some(dir.path().to_path_buf()))),
        Arc::new(Scripted {
            replies: Mutex::new(replies.into()),
        }),
        Arc::new(NoSearch),
        sink.clone(),
        &AgentConfig::default(),
        data.path().to_path_buf(),
    );
    Fixture {
        dir,
        data,
        sink,
        session,
    }
}

/// A reply carrying `json` in a fenced block.
pub(crate) fn fenced(json: &str) -> Step {
    Some(Ok(format!("```json\n{json}\n```")))
}
