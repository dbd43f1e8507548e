use std::collections::HashSet;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;

use super::{Coordinator, Message, PlayerInfo, Topic};
use crate::error::Result;
use crate::types::{PlayerId, ProxyId};

/// Liveness window for a peer that hasn't sent a heartbeat. Generous relative to
/// any realistic `backend_ping_interval`-scale tick so a single missed tick never
/// evicts a healthy peer.
const PEER_TTL: Duration = Duration::from_secs(30);

const BROADCAST_CAPACITY: usize = 256;

/// In-process coordinator for single-proxy deployments and tests. Every call
/// short-circuits to local state: a broadcast channel per topic (grounded on
/// `SubscriptionManager`'s per-key fan-out) and a couple of `DashMap`s standing in
/// for the Redis-backed peer set / snapshot store.
pub struct LocalCoordinator {
	topics: DashMap<Topic, broadcast::Sender<Message>>,
	peers: DashMap<ProxyId, Instant>,
	player_info: DashMap<PlayerId, PlayerInfo>,
	snapshots: DashMap<String, serde_json::Value>,
}

impl LocalCoordinator {
	#[must_use]
	pub fn new() -> Self {
		Self {
			topics: DashMap::new(),
			peers: DashMap::new(),
			player_info: DashMap::new(),
			snapshots: DashMap::new(),
		}
	}

	fn sender_for(&self, topic: Topic) -> broadcast::Sender<Message> {
		self.topics.entry(topic).or_insert_with(|| broadcast::channel(BROADCAST_CAPACITY).0).clone()
	}
}

impl Default for LocalCoordinator {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl Coordinator for LocalCoordinator {
	async fn publish(&self, message: Message) -> Result<()> {
		// No subscriber is not an error: delivery is best-effort per the contract.
		let _ = self.sender_for(message.topic()).send(message);
		Ok(())
	}

	async fn subscribe(&self, topic: Topic) -> Result<broadcast::Receiver<Message>> {
		Ok(self.sender_for(topic).subscribe())
	}

	async fn peer_set(&self) -> Result<HashSet<ProxyId>> {
		let now = Instant::now();
		self.peers.retain(|_, last_seen| now.duration_since(*last_seen) < PEER_TTL);
		Ok(self.peers.iter().map(|entry| entry.key().clone()).collect())
	}

	async fn heartbeat(&self, self_id: &ProxyId) -> Result<()> {
		self.peers.insert(self_id.clone(), Instant::now());
		Ok(())
	}

	async fn player_info(&self, player: PlayerId) -> Result<Option<PlayerInfo>> {
		Ok(self.player_info.get(&player).map(|entry| entry.clone()))
	}

	async fn set_player_info(&self, player: PlayerId, info: Option<PlayerInfo>) -> Result<()> {
		match info {
			Some(info) => {
				self.player_info.insert(player, info);
			}
			None => {
				self.player_info.remove(&player);
			}
		}
		Ok(())
	}

	async fn snapshot_put(&self, key: &str, value: serde_json::Value) -> Result<()> {
		self.snapshots.insert(key.to_string(), value);
		Ok(())
	}

	async fn snapshot_get(&self, key: &str) -> Result<Option<serde_json::Value>> {
		Ok(self.snapshots.get(key).map(|entry| entry.clone()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::ServerName;

	#[tokio::test]
	async fn publish_then_subscribe_round_trips() {
		let coordinator = LocalCoordinator::new();
		let mut rx = coordinator.subscribe(Topic::QueuePause).await.unwrap();

		coordinator
			.publish(Message::QueuePause {
				server: ServerName::from("survival"),
				paused: true,
			})
			.await
			.unwrap();

		let received = rx.recv().await.unwrap();
		assert_eq!(received.topic(), Topic::QueuePause);
	}

	#[tokio::test]
	async fn heartbeat_makes_a_proxy_a_live_peer() {
		let coordinator = LocalCoordinator::new();
		let id = ProxyId::from("proxy-a");
		coordinator.heartbeat(&id).await.unwrap();
		let peers = coordinator.peer_set().await.unwrap();
		assert!(peers.contains(&id));
	}

	#[tokio::test]
	async fn snapshot_round_trips_json() {
		let coordinator = LocalCoordinator::new();
		let value = serde_json::json!({"entries": []});
		coordinator.snapshot_put("survival", value.clone()).await.unwrap();
		let fetched = coordinator.snapshot_get("survival").await.unwrap();
		assert_eq!(fetched, Some(value));
	}

	#[tokio::test]
	async fn player_info_can_be_set_and_cleared() {
		let coordinator = LocalCoordinator::new();
		let player = PlayerId::new();
		let info = PlayerInfo {
			proxy_id: ProxyId::from("proxy-a"),
			server_name: None,
			queued_server: Some(ServerName::from("survival")),
		};
		coordinator.set_player_info(player, Some(info)).await.unwrap();
		assert!(coordinator.player_info(player).await.unwrap().is_some());

		coordinator.set_player_info(player, None).await.unwrap();
		assert!(coordinator.player_info(player).await.unwrap().is_none());
	}
}
