//! User-facing strings in English and Brazilian Portuguese.
//!
//! Only panel chrome and status messages are translated; chat content is
//! stored and shown as-is.

use serde::{Deserialize, Serialize};

/// Panel language.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Language {
    #[default]
    #[serde(rename = "en")]
    English,
    #[serde(rename = "pt-br")]
    PortugueseBr,
}

impl Language {
    /// The other language.
    pub fn toggled(self) -> Self {
        match self {
            Language::English => Language::PortugueseBr,
            Language::PortugueseBr => Language::English,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Language::English => "en",
            Language::PortugueseBr => "pt-br",
        }
    }

    pub fn translations(self) -> Translations {
        match self {
            Language::English => Translations {
                welcome_message: "Hello! I'm your AI assistant. Ask me anything or request help \
                                  with your code. I can analyze and modify files in your workspace.",
                working_message: "🤖 I'm working on this task...",
                task_completed_message: "✅ Task completed.",
                error_message: "Sorry, I encountered an error. Please check your API key and connection.",
                input_placeholder: "Ask something...",
                send_button: "Send",
                clear_button: "Clear",
                change_language_button: "PT-BR",
                loading_text: "Working on it...",
            },
            Language::PortugueseBr => Translations {
                welcome_message: "Olá! Sou seu assistente de IA. Pergunte qualquer coisa ou peça \
                                  ajuda com seu código. Posso analisar e modificar arquivos no seu \
                                  espaço de trabalho.",
                working_message: "🤖 Estou trabalhando nesta tarefa...",
                task_completed_message: "✅ Tarefa concluída.",
                error_message: "Desculpe, encontrei um erro. Por favor, verifique sua chave de API e conexão.",
                input_placeholder: "Pergunte algo...",
                send_button: "Enviar",
                clear_button: "Limpar",
                change_language_button: "EN",
                loading_text: "Trabalhando nisso...",
            },
        }
    }
}

/// One language's string table, sent to the panel as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Translations {
    pub welcome_message: &'static str,
    pub working_message: &'static str,
    pub task_completed_message: &'static str,
    pub error_message: &'static str,
    pub input_placeholder: &'static str,
    pub send_button: &'static str,
    pub clear_button: &'static str,
    pub change_language_button: &'static str,
    pub loading_text: &'static str,
}
