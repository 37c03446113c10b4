//! 会话记录持久化 - 原始日志、快照文档、后台写入

pub mod snapshot;
pub mod store;
pub mod writer;

pub use snapshot::{
    format_timestamp, CleanedDocument, SnapshotDocument, SnapshotOptions, SnapshotRequest,
    EMPTY_PLACEHOLDER,
};
pub use store::{session_header, TranscriptStore};
pub use writer::SnapshotWriter;
