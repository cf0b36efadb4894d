//! Panel surface: the event protocol, per-panel session state, and the
//! JSON-lines transport that connects them to a driver process.

pub mod i18n;
pub mod protocol;
pub mod session;
pub mod settings;
pub mod stdio;

#[cfg(test)]
pub(crate) mod testing;

pub use i18n::{Language, Translations};
pub use protocol::{Inbound, NoticeLevel, Outbound};
pub use session::{AssistantSession, PanelSink};
pub use settings::PanelSettings;
pub use stdio::{ChannelSink, TransportError};
