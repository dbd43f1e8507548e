use thiserror::Error;

use crate::types::{PlayerId, ServerName};

/// Errors surfaced by the queue engine. User-initiated-action variants are
/// translated into chat messages by the caller; tick-internal variants are logged
/// and swallowed so a single bad queue never takes down a tick loop.
#[derive(Error, Debug)]
pub enum QueueError {
	#[error("{player} is not queued for {server}")]
	NotPresent { player: PlayerId, server: ServerName },

	#[error("{player} is already queued for {server}")]
	AlreadyPresent { player: PlayerId, server: ServerName },

	#[error("queue for {server} is paused and not accepting new joins")]
	Paused { server: ServerName },

	#[error("unknown server: {0}")]
	UnknownServer(String),

	#[error("backend {0} is offline")]
	BackendOffline(ServerName),

	#[error("cluster coordinator unreachable: {0}")]
	CoordinatorUnreachable(String),

	#[error("send failed: {0}")]
	SendFailed(String),

	#[error("redis error: {0}")]
	Redis(#[from] redis::RedisError),

	#[error("json error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("prometheus error: {0}")]
	Prometheus(#[from] prometheus::Error),

	#[error("internal error: {0}")]
	Internal(String),
}

pub type Result<T> = std::result::Result<T, QueueError>;
