//! Batch face-swap orchestration: an in-process task registry with
//! independent per-image pipelines (upload, submit, poll, cancel, retry,
//! bundle), plus the thin pass-through route server the pipelines talk to.

pub mod manager;
pub mod remote;
pub mod server;
pub mod tasks;
