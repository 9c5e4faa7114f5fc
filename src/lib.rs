//! autoreply: answers unread mail from allowlisted domains with an LLM-written reply.

pub mod config;
pub mod error;
pub mod llm;
pub mod mail;
pub mod poller;
pub mod reply;
