//! Panel protocol: events exchanged with the rendering surface.
//!
//! Every event is a JSON object whose `type` field names the variant.

use serde::{Deserialize, Serialize};

use crate::agent_core::{ChatSummary, Message};
use crate::host::EditorState;

use super::i18n::Translations;

/// Events sent by the panel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Inbound {
    SendQuery {
        value: String,
    },
    ClearConversation,
    ToggleLanguage,
    #[serde(rename_all = "camelCase")]
    RestoreState {
        message_id: String,
    },
    CreateNewChat {
        #[serde(default)]
        title: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    SwitchChat {
        chat_id: String,
    },
    #[serde(rename_all = "camelCase")]
    RenameChat {
        chat_id: String,
        new_title: String,
    },
    #[serde(rename_all = "camelCase")]
    DeleteChat {
        chat_id: String,
    },
    /// Full editor state, replacing the previous report.
    EditorState(EditorState),
    FileCreated {
        path: String,
    },
    #[serde(rename_all = "camelCase")]
    ConfirmDeletionResponse {
        request_id: String,
        approved: bool,
    },
}

/// Severity of a [`Outbound::Notice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Events sent to the panel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Outbound {
    AddMessage {
        message: Message,
    },
    #[serde(rename_all = "camelCase")]
    SetLoading {
        is_loading: bool,
    },
    ClearConversation,
    UpdateLanguage {
        translations: Translations,
    },
    RestoreConversation {
        messages: Vec<Message>,
    },
    #[serde(rename_all = "camelCase")]
    UpdateChats {
        chats: Vec<ChatSummary>,
        current_chat_id: String,
    },
    #[serde(rename_all = "camelCase")]
    SwitchChat {
        chat_id: String,
        messages: Vec<Message>,
    },
    Notice {
        level: NoticeLevel,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    ConfirmDeletion {
        request_id: String,
        paths: Vec<String>,
    },
}

impl Outbound {
    pub fn notice(level: NoticeLevel, message: impl Into<String>) -> Self {
        Outbound::Notice {
            level,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::Role;
    use serde_json::json;

    #[test]
    fn test_inbound_shapes() {
        let cases = [
            (json!({"type": "sendQuery", "value": "hi"}), Inbound::SendQuery { value: "hi".into() }),
            (json!({"type": "clearConversation"}), Inbound::ClearConversation),
            (
                json!({"type": "restoreState", "messageId": "t1"}),
                Inbound::RestoreState { message_id: "t1".into() },
            ),
            (json!({"type": "createNewChat"}), Inbound::CreateNewChat { title: None }),
            (
                json!({"type": "renameChat", "chatId": "c", "newTitle": "New"}),
                Inbound::RenameChat { chat_id: "c".into(), new_title: "New".into() },
            ),
            (
                json!({"type": "confirmDeletionResponse", "requestId": "r", "approved": true}),
                Inbound::ConfirmDeletionResponse { request_id: "r".into(), approved: true },
            ),
        ];
        for (raw, expected) in cases {
            assert_eq!(serde_json::from_value::<Inbound>(raw).unwrap(), expected);
        }
    }

    #[test]
    fn test_editor_state_event() {
        let event: Inbound = serde_json::from_value(json!({
            "type": "editorState",
            "openDocuments": [{"path": "/w/a.rs", "version": 2}],
            "terminals": ["bash"]
        }))
        .unwrap();
        match event {
            Inbound::EditorState(state) => {
                assert_eq!(state.open_documents[0].path, "/w/a.rs");
                assert_eq!(state.terminals, vec!["bash"]);
                assert!(state.active_editor.is_none());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_inbound_is_rejected() {
        assert!(serde_json::from_value::<Inbound>(json!({"type": "launchRocket"})).is_err());
    }

    #[test]
    fn test_outbound_shapes() {
        assert_eq!(
            serde_json::to_value(Outbound::SetLoading { is_loading: true }).unwrap(),
            json!({"type": "setLoading", "isLoading": true})
        );
        assert_eq!(
            serde_json::to_value(Outbound::ClearConversation).unwrap(),
            json!({"type": "clearConversation"})
        );
        assert_eq!(
            serde_json::to_value(Outbound::notice(NoticeLevel::Warning, "careful")).unwrap(),
            json!({"type": "notice", "level": "warning", "message": "careful"})
        );

        let add = Outbound::AddMessage {
            message: Message {
                role: Role::User,
                content: "hello".into(),
                timestamp: "2024-01-01T00:00:00.000Z".into(),
            },
        };
        assert_eq!(
            serde_json::to_value(add).unwrap(),
            json!({"type": "addMessage", "message": {
                "role": "user", "content": "hello", "timestamp": "2024-01-01T00:00:00.000Z"
            }})
        );

        let chats = Outbound::UpdateChats {
            chats: vec![],
            current_chat_id: "c1".into(),
        };
        assert_eq!(
            serde_json::to_value(chats).unwrap(),
            json!({"type": "updateChats", "chats": [], "currentChatId": "c1"})
        );
    }
}
