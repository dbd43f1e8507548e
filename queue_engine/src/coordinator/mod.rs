mod local;
mod redis_backed;

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use local::LocalCoordinator;
pub use redis_backed::RedisCoordinator;

use crate::types::{PlayerId, ProxyId, ServerName};

/// A logical cross-proxy topic. The `Display` form is the wire topic name used by
/// both coordinator backends, so adding a variant here is enough to wire it up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
	QueueAdd,
	QueueLeave,
	QueueSend,
	QueueSendResult,
	QueuePause,
	QueueAlreadyJoined,
	ActionBar,
	Chat,
	PlayerSetQueuedServer,
}

impl Topic {
	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::QueueAdd => "queue.add",
			Self::QueueLeave => "queue.leave",
			Self::QueueSend => "queue.send",
			Self::QueueSendResult => "queue.send_result",
			Self::QueuePause => "queue.pause",
			Self::QueueAlreadyJoined => "queue.already_joined",
			Self::ActionBar => "actionbar",
			Self::Chat => "chat",
			Self::PlayerSetQueuedServer => "player.set_queued_server",
		}
	}
}

impl std::fmt::Display for Topic {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Payload carried on a cross-proxy topic. One variant per [`Topic`]; the engine
/// always publishes the matching variant for the topic it names, so serialization
/// is just "tag plus the one relevant payload" rather than per-topic free-form JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "topic", rename_all = "snake_case")]
pub enum Message {
	QueueAdd {
		player: PlayerId,
		server: ServerName,
		priority: i32,
		full_bypass: bool,
	},
	QueueLeave {
		player: PlayerId,
		server: ServerName,
		user_initiated: bool,
	},
	QueueSend {
		player: PlayerId,
		server: ServerName,
	},
	QueueSendResult {
		player: PlayerId,
		server: ServerName,
		success: bool,
	},
	QueuePause {
		server: ServerName,
		paused: bool,
	},
	QueueAlreadyJoined {
		player: PlayerId,
		server: ServerName,
	},
	ActionBar {
		player: PlayerId,
		text: String,
	},
	Chat {
		player: PlayerId,
		text: String,
	},
	PlayerSetQueuedServer {
		player: PlayerId,
		server: Option<ServerName>,
	},
}

impl Message {
	#[must_use]
	pub const fn topic(&self) -> Topic {
		match self {
			Self::QueueAdd { .. } => Topic::QueueAdd,
			Self::QueueLeave { .. } => Topic::QueueLeave,
			Self::QueueSend { .. } => Topic::QueueSend,
			Self::QueueSendResult { .. } => Topic::QueueSendResult,
			Self::QueuePause { .. } => Topic::QueuePause,
			Self::QueueAlreadyJoined { .. } => Topic::QueueAlreadyJoined,
			Self::ActionBar { .. } => Topic::ActionBar,
			Self::Chat { .. } => Topic::Chat,
			Self::PlayerSetQueuedServer { .. } => Topic::PlayerSetQueuedServer,
		}
	}
}

/// Where a player is currently connected, as known to the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerInfo {
	pub proxy_id: ProxyId,
	pub server_name: Option<ServerName>,
	pub queued_server: Option<ServerName>,
}

/// Cross-proxy publish/subscribe and peer-liveness contract.
///
/// Implementations are swappable: a single-node deployment runs entirely on
/// [`LocalCoordinator`] with no external process, while a cluster runs on
/// [`RedisCoordinator`]. The queue engine itself is written against this trait only,
/// so it never forks its logic per backend.
#[async_trait]
pub trait Coordinator: Send + Sync {
	/// Fire-and-forget publish. At-most-once; ordered within a single publisher per
	/// topic; no delivery acknowledgement.
	async fn publish(&self, message: Message) -> crate::error::Result<()>;

	/// Register to receive every message published on `topic`. Delivery is
	/// best-effort: a subscriber that isn't listening when a message is published
	/// may miss it.
	async fn subscribe(&self, topic: Topic) -> crate::error::Result<tokio::sync::broadcast::Receiver<Message>>;

	/// Currently live proxy ids, per the coordinator's own liveness/TTL mechanism.
	async fn peer_set(&self) -> crate::error::Result<HashSet<ProxyId>>;

	/// Refresh this proxy's own liveness entry; must be called periodically by
	/// whichever proxy wants to remain in [`Coordinator::peer_set`].
	async fn heartbeat(&self, self_id: &ProxyId) -> crate::error::Result<()>;

	/// Where `player` is currently known to be connected, if anyone has recorded it.
	async fn player_info(&self, player: PlayerId) -> crate::error::Result<Option<PlayerInfo>>;

	/// Record where `player` is currently connected (or clear it with `None`).
	async fn set_player_info(&self, player: PlayerId, info: Option<PlayerInfo>) -> crate::error::Result<()>;

	/// Store a JSON-serializable snapshot value under `key`.
	async fn snapshot_put(&self, key: &str, value: serde_json::Value) -> crate::error::Result<()>;

	/// Fetch a previously stored snapshot value, if present.
	async fn snapshot_get(&self, key: &str) -> crate::error::Result<Option<serde_json::Value>>;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn topic_names_match_spec_wire_names() {
		assert_eq!(Topic::QueueAdd.as_str(), "queue.add");
		assert_eq!(Topic::QueueSendResult.as_str(), "queue.send_result");
		assert_eq!(Topic::PlayerSetQueuedServer.as_str(), "player.set_queued_server");
	}

	#[test]
	fn message_topic_matches_its_own_variant() {
		let msg = Message::QueuePause {
			server: ServerName::from("survival"),
			paused: true,
		};
		assert_eq!(msg.topic(), Topic::QueuePause);
	}
}
