//! The error taxonomy shared by the route matcher, plugin host and RPC layer.
//!
//! These are error *kinds*, not per-component types: every fallible entry
//! point in this repo's core returns `HostError` (or a `Result` aliased to
//! it), so a caller one layer up never has to know which component raised.

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("malformed route template {template:?}: {reason}")]
    Template { template: String, reason: String },

    #[error("no route matches {method} {path}")]
    NotFoundRoute { method: String, path: String },

    #[error("plugin {module} does not export {callback}")]
    CallbackNotFound { module: String, callback: String },

    #[error("plugin {module} callback {callback} called in wrong state: {detail}")]
    CallbackInvalidState {
        module: String,
        callback: String,
        detail: String,
    },

    /// `on_routes` must be exported as the host's synchronous-call slot.
    #[error("plugin {module} callback {callback} must be registered as the synchronous hook")]
    CallbackIsAsync { module: String, callback: String },

    /// `on_open`/`on_close`/`on_register` must be exported as the host's
    /// asynchronous-call slot.
    #[error("plugin {module} callback {callback} must be registered as the asynchronous hook")]
    CallbackNotAsync { module: String, callback: String },

    #[error("plugin {module} callback {callback} raised: {cause}")]
    CallbackRuntimeError {
        module: String,
        callback: String,
        cause: String,
    },

    #[error("plugin {module} callback {callback} returned an invalid value: {detail}")]
    CallbackInvalidReturnValue {
        module: String,
        callback: String,
        detail: String,
    },

    #[error("shared-memory protocol error: {0}")]
    ShmProtocol(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol ordering violated: {0}")]
    ProtocolOrder(String),
}

pub type Result<T> = std::result::Result<T, HostError>;
