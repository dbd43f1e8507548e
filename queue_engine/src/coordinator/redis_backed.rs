use std::collections::HashSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::{Coordinator, Message, PlayerInfo, Topic};
use crate::error::{QueueError, Result};
use crate::types::{PlayerId, ProxyId};

const PEER_TTL_SECS: i64 = 30;
const PEER_SET_KEY: &str = "queue_engine:peers";
const BROADCAST_CAPACITY: usize = 256;

fn player_info_key(player: PlayerId) -> String {
	format!("queue_engine:player_info:{player}")
}

fn snapshot_key(key: &str) -> String {
	format!("queue_engine:snapshot:{key}")
}

fn now_secs() -> i64 {
	SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

/// Cross-proxy coordinator backed by a single Redis instance: pub/sub for
/// `publish`/`subscribe`, a sorted set (score = last-heartbeat epoch seconds) for
/// `peer_set`, and plain string keys for `player_info`/snapshots. Grounded on
/// `RedisScheduler`'s connection and serialization conventions, moved onto the
/// async `ConnectionManager` (rather than the source's sync `Connection` behind a
/// `tokio::sync::Mutex`) because this coordinator is read from and written to far
/// more concurrently than a single worker pool's dequeue loop.
pub struct RedisCoordinator {
	client: redis::Client,
	conn: ConnectionManager,
	local_fanout: DashMap<Topic, broadcast::Sender<Message>>,
}

impl RedisCoordinator {
	/// # Errors
	/// Returns an error if the Redis URL is invalid or the initial connection
	/// cannot be established.
	pub async fn connect(redis_url: &str) -> Result<Self> {
		let client = redis::Client::open(redis_url)?;
		let conn = ConnectionManager::new(client.clone()).await?;
		Ok(Self {
			client,
			conn,
			local_fanout: DashMap::new(),
		})
	}

	/// Spawn the background task that forwards a Redis pub/sub channel into the
	/// topic's local broadcast sender, if one isn't already running. Each topic
	/// gets exactly one listener regardless of how many local subscribers ask for
	/// it, mirroring how `LocalCoordinator` fans a single publish out to many
	/// receivers without re-publishing per subscriber.
	async fn ensure_listener(&self, topic: Topic) -> Result<broadcast::Sender<Message>> {
		if let Some(sender) = self.local_fanout.get(&topic) {
			return Ok(sender.clone());
		}

		let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
		self.local_fanout.insert(topic, sender.clone());

		let client = self.client.clone();
		let forward_to = sender.clone();
		tokio::spawn(async move {
			let mut pubsub = match client.get_async_pubsub().await {
				Ok(pubsub) => pubsub,
				Err(error) => {
					warn!(%error, %topic, "failed to open redis pubsub connection");
					return;
				}
			};
			if let Err(error) = pubsub.subscribe(topic.as_str()).await {
				warn!(%error, %topic, "failed to subscribe to redis channel");
				return;
			}

			let mut stream = pubsub.into_on_message();
			while let Some(payload) = stream.next().await {
				let raw: String = match payload.get_payload() {
					Ok(raw) => raw,
					Err(error) => {
						warn!(%error, %topic, "malformed redis pubsub payload");
						continue;
					}
				};
				match serde_json::from_str::<Message>(&raw) {
					Ok(message) => {
						let _ = forward_to.send(message);
					}
					Err(error) => warn!(%error, %topic, "failed to decode message"),
				}
			}
			debug!(%topic, "redis pubsub listener ended");
		});

		Ok(sender)
	}
}

#[async_trait]
impl Coordinator for RedisCoordinator {
	async fn publish(&self, message: Message) -> Result<()> {
		let topic = message.topic();
		let payload = serde_json::to_string(&message)?;
		let mut conn = self.conn.clone();
		let _: i64 = conn.publish(topic.as_str(), payload).await?;
		Ok(())
	}

	async fn subscribe(&self, topic: Topic) -> Result<broadcast::Receiver<Message>> {
		Ok(self.ensure_listener(topic).await?.subscribe())
	}

	async fn peer_set(&self) -> Result<HashSet<ProxyId>> {
		let mut conn = self.conn.clone();
		let cutoff = now_secs() - PEER_TTL_SECS;
		let ids: Vec<String> = conn.zrangebyscore(PEER_SET_KEY, cutoff, "+inf").await?;
		Ok(ids.into_iter().map(ProxyId::new).collect())
	}

	async fn heartbeat(&self, self_id: &ProxyId) -> Result<()> {
		let mut conn = self.conn.clone();
		let _: i64 = conn.zadd(PEER_SET_KEY, self_id.as_str(), now_secs()).await?;
		// Opportunistically trim peers nobody has heartbeat in a long while so the
		// sorted set doesn't grow without bound across proxy churn.
		let cutoff = now_secs() - PEER_TTL_SECS * 4;
		let _: i64 = conn.zrembyscore(PEER_SET_KEY, "-inf", cutoff).await?;
		Ok(())
	}

	async fn player_info(&self, player: PlayerId) -> Result<Option<PlayerInfo>> {
		let mut conn = self.conn.clone();
		let raw: Option<String> = conn.get(player_info_key(player)).await?;
		raw.map(|raw| serde_json::from_str(&raw).map_err(QueueError::from)).transpose()
	}

	async fn set_player_info(&self, player: PlayerId, info: Option<PlayerInfo>) -> Result<()> {
		let mut conn = self.conn.clone();
		let key = player_info_key(player);
		match info {
			Some(info) => {
				let raw = serde_json::to_string(&info)?;
				let _: () = conn.set(key, raw).await?;
			}
			None => {
				let _: i64 = conn.del(key).await?;
			}
		}
		Ok(())
	}

	async fn snapshot_put(&self, key: &str, value: serde_json::Value) -> Result<()> {
		let mut conn = self.conn.clone();
		let raw = serde_json::to_string(&value)?;
		let _: () = conn.set(snapshot_key(key), raw).await?;
		Ok(())
	}

	async fn snapshot_get(&self, key: &str) -> Result<Option<serde_json::Value>> {
		let mut conn = self.conn.clone();
		let raw: Option<String> = conn.get(snapshot_key(key)).await?;
		raw.map(|raw| serde_json::from_str(&raw).map_err(QueueError::from)).transpose()
	}
}
