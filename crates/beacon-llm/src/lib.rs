//! # beacon-llm
//!
//! The synchronous reply path. [`ChatModel`] is the seam the dispatcher
//! calls; [`OpenAiChatModel`] is the production implementation.

#![deny(unsafe_code)]

pub mod errors;
pub mod model;
pub mod openai;

pub use errors::LlmError;
pub use model::{ChatModel, ChatTurn};
pub use openai::{OpenAiChatModel, OpenAiConfig};
