//! DataPrompt core library — conversation state machine, backend API client,
//! stream parsing, result cache, and config shared by the CLI front end.

pub mod api;
pub mod cache;
pub mod config;
pub mod conversation;
pub mod stream;
