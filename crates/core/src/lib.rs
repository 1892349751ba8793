//! Core chat logic: character persona assembly and the chat session that
//! prepends it to every request.

pub mod chat;
pub mod persona;

pub use chat::{ChatBackend, ChatSession, OpenAICompatibleChat};
pub use persona::load_preamble;
