//! DocChat Common Types
//!
//! Shared types used by both the gateway backend and the inference workers:
//! chat messages, the request/response wire protocol and the stream transport.

pub mod chat;
pub mod config;
pub mod protocol;
pub mod stream;

pub use chat::{ChatCompletionResponse, ChatMessage, Choice, CompletionMessage, Role, Usage};
pub use config::{StreamConfig, TransportConfig, TransportKind};
pub use protocol::{ProtocolError, ReplyError, RequestMessage, ResponseMessage};
pub use stream::{
    BlockMode, EntryId, Fields, GroupStart, MemoryStream, PendingEntry, RedisStream, StreamEntry,
    StreamError, StreamTransport,
};
