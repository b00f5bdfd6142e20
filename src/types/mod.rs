//! # Types Module
//!
//! Core data types shared by the resolver, the cache, the filter and the dispatcher.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Message`] | Conversation entry with role, content and optional tool fields |
//! | [`ToolDefinition`] | Tool declaration offered to the model |
//! | [`ToolCall`] | Tool call returned by the model |
//! | [`LlmResponse`] | Backend response (content, tool calls, usage) |
//! | [`LogicalRequest`] | What the caller submits for dispatch |

pub mod message;
pub mod request;
pub mod response;
pub mod tool;

pub use message::{Message, MessageRole};
pub use request::LogicalRequest;
pub use response::{LlmResponse, Usage};
pub use tool::{ToolCall, ToolDefinition};
