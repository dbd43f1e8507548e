use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::config::Config;
use crate::coordinator::{Coordinator, Message};
use crate::engine::{ConnectBackend, QueueEngine};
use crate::error::{QueueError, Result};
use crate::store::{DequeueOutcome, EnqueueOutcome, QueueStore};
use crate::types::{PlayerId, Priority, ServerName};

/// Outcome of [`EngineHandle::join`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
	/// The target server is listed in `no_queue_servers`; the player was sent
	/// directly and never touched the queue store.
	Bypassed,
	Queued { position: usize },
}

/// One line of [`EngineHandle::list`] output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueListing {
	pub server: ServerName,
	pub size: usize,
	pub paused: bool,
	pub online: bool,
}

/// Administrative and player-facing surface: pause/unpause, list, add, addall,
/// remove, removeall, and config reload, exposed as plain async methods rather
/// than routed through a command-channel actor. Grounded on `ConnectionHandle`'s
/// thin-cloneable-handle shape, simplified to direct calls into the shared
/// `QueueStore` since the store's own per-queue mutex already serializes the
/// mutations this surface performs.
#[derive(Clone)]
pub struct EngineHandle<B: ConnectBackend> {
	store: Arc<QueueStore>,
	coordinator: Arc<dyn Coordinator>,
	config: Arc<RwLock<Config>>,
	engine: Arc<QueueEngine<B>>,
}

impl<B: ConnectBackend + 'static> EngineHandle<B> {
	#[must_use]
	pub const fn new(store: Arc<QueueStore>, coordinator: Arc<dyn Coordinator>, config: Arc<RwLock<Config>>, engine: Arc<QueueEngine<B>>) -> Self {
		Self { store, coordinator, config, engine }
	}

	/// Halt sends for `server`; joining may still be allowed depending on
	/// `allow_paused_queue_joining`. Broadcasts an informational chat line to
	/// every player currently queued.
	pub async fn pause(&self, server: &ServerName) -> Result<()> {
		self.store.ensure_queue(server);
		self.store.with_queue(server, |queue| queue.paused = true).await;
		self.broadcast_chat(server, format!("Queue for {server} has been paused by an administrator.")).await;
		let _ = self.coordinator.publish(Message::QueuePause { server: server.clone(), paused: true }).await;
		info!(%server, "queue paused");
		Ok(())
	}

	/// Resume sends for `server`.
	pub async fn unpause(&self, server: &ServerName) -> Result<()> {
		self.store.ensure_queue(server);
		self.store.with_queue(server, |queue| queue.paused = false).await;
		self.broadcast_chat(server, format!("Queue for {server} has been unpaused.")).await;
		let _ = self.coordinator.publish(Message::QueuePause { server: server.clone(), paused: false }).await;
		info!(%server, "queue unpaused");
		Ok(())
	}

	/// One [`QueueListing`] per backend this proxy has ever referenced.
	pub async fn list(&self) -> Vec<QueueListing> {
		let mut listings = Vec::new();
		for server in self.store.server_names() {
			let Some((size, paused, online)) = self
				.store
				.with_queue(&server, |queue| (queue.len(), queue.paused, queue.server_status.is_online()))
				.await
			else {
				continue;
			};
			listings.push(QueueListing { server, size, paused, online });
		}
		listings
	}

	/// Self-service join, as the out-of-scope `/queue <server>` command would
	/// call: `server` names listed in `no_queue_servers` bypass the waiting
	/// line entirely and are connected immediately; everything else
	/// goes through the normal priority-ordered enqueue.
	pub async fn join(&self, player: PlayerId, server: ServerName, priority: Priority, full_bypass: bool) -> Result<JoinOutcome> {
		if self.config.read().await.no_queue_servers.iter().any(|name| name.as_str() == server.as_str()) {
			self.engine.direct_connect(player, &server).await;
			return Ok(JoinOutcome::Bypassed);
		}

		match self.store.enqueue(player, server.clone(), priority, full_bypass, false).await {
			EnqueueOutcome::Placed { position } => {
				let _ = self
					.coordinator
					.publish(Message::QueueAdd {
						player,
						server,
						priority: priority.value(),
						full_bypass,
					})
					.await;
				Ok(JoinOutcome::Queued { position })
			}
			EnqueueOutcome::AlreadyPresent => Err(QueueError::AlreadyPresent { player, server }),
			EnqueueOutcome::Rejected { .. } => Err(QueueError::Paused { server }),
		}
	}

	/// Administrative enqueue at [`Priority::ADMIN`]. Refused if the player is
	/// already queued for `server`.
	pub async fn add(&self, player: PlayerId, server: ServerName) -> Result<usize> {
		match self.store.enqueue(player, server.clone(), Priority::ADMIN, true, false).await {
			EnqueueOutcome::Placed { position } => {
				let _ = self
					.coordinator
					.publish(Message::QueueAdd {
						player,
						server,
						priority: Priority::ADMIN.value(),
						full_bypass: true,
					})
					.await;
				Ok(position)
			}
			EnqueueOutcome::AlreadyPresent => Err(QueueError::AlreadyPresent { player, server }),
			EnqueueOutcome::Rejected { reason } => Err(QueueError::Paused { server }).map_err(|e| {
				tracing::warn!(%reason, "admin add rejected");
				e
			}),
		}
	}

	/// Move every entry currently waiting for `from` onto `to`'s queue,
	/// preserving each entry's priority and full-bypass flag. Returns the
	/// count moved.
	///
	/// This engine has no visibility into which players are physically playing a
	/// backend (that's the Minecraft connection layer, out of scope here), so
	/// "every player currently on `from_server`" is read as "every player
	/// currently queued for `from_server`".
	pub async fn addall(&self, from: &ServerName, to: &ServerName) -> usize {
		let entries = self.store.snapshot(from).await;
		let mut moved = 0;
		for entry in entries {
			if self.store.dequeue(entry.player_id, from).await == DequeueOutcome::Removed {
				let outcome = self.store.enqueue(entry.player_id, to.clone(), entry.priority, entry.full_bypass, entry.queue_bypass).await;
				if matches!(outcome, EnqueueOutcome::Placed { .. }) {
					moved += 1;
				}
			}
		}
		info!(%from, %to, moved, "addall moved queued players");
		moved
	}

	/// Remove `player` from `server`, or from every queue if `server` is
	/// `None`. Returns the count removed.
	pub async fn remove(&self, player: PlayerId, server: Option<ServerName>) -> Result<usize> {
		match server {
			Some(server) => match self.store.dequeue(player, &server).await {
				DequeueOutcome::Removed => Ok(1),
				DequeueOutcome::NotPresent => Err(QueueError::NotPresent { player, server }),
			},
			None => Ok(self.store.leave_all(player).await),
		}
	}

	/// Clear `server`'s queue entirely, notifying every removed player.
	pub async fn removeall(&self, server: &ServerName) -> usize {
		self.clear_queue(server).await
	}

	/// Clear every known queue. Used at proxy shutdown: every entry is dropped
	/// and each player is notified their queued server has been cleared.
	pub async fn shutdown(&self) {
		for server in self.store.server_names() {
			self.clear_queue(&server).await;
		}
	}

	async fn clear_queue(&self, server: &ServerName) -> usize {
		let entries = self.store.snapshot(server).await;
		for entry in &entries {
			self.store.dequeue(entry.player_id, server).await;
			let _ = self
				.coordinator
				.publish(Message::PlayerSetQueuedServer {
					player: entry.player_id,
					server: None,
				})
				.await;
			let _ = self
				.coordinator
				.publish(Message::Chat {
					player: entry.player_id,
					text: format!("Your queued server ({server}) has been cleared."),
				})
				.await;
		}
		entries.len()
	}

	/// Re-read timing constants and the master-eligible list; affected ticks
	/// pick up the new period on their next iteration (see each tick's `run`
	/// loop) rather than requiring a restart.
	pub async fn reload_config(&self, new_config: Config) {
		self.engine.set_eligible_masters(new_config.master_proxy_ids.clone()).await;
		*self.config.write().await = new_config;
		info!("configuration reloaded");
	}

	async fn broadcast_chat(&self, server: &ServerName, text: String) {
		let entries = self.store.snapshot(server).await;
		for entry in entries {
			let _ = self
				.coordinator
				.publish(Message::Chat {
					player: entry.player_id,
					text: text.clone(),
				})
				.await;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::coordinator::LocalCoordinator;
	use async_trait::async_trait;
	use tokio_util::sync::CancellationToken;

	struct AlwaysSucceeds;
	#[async_trait]
	impl ConnectBackend for AlwaysSucceeds {
		async fn connect(&self, _player: PlayerId, _server: &ServerName) -> bool {
			true
		}
	}

	fn handle() -> EngineHandle<AlwaysSucceeds> {
		let store = Arc::new(QueueStore::new(true, true));
		let coordinator: Arc<dyn Coordinator> = Arc::new(LocalCoordinator::new());
		let config = Arc::new(RwLock::new(Config::test()));
		let metrics = crate::metrics::Metrics::new(prometheus::Registry::new()).unwrap();
		let engine = Arc::new(QueueEngine::new(
			crate::types::ProxyId::from("proxy-a"),
			vec![],
			store.clone(),
			coordinator.clone(),
			Arc::new(AlwaysSucceeds),
			config.clone(),
			metrics,
			CancellationToken::new(),
		));
		EngineHandle::new(store, coordinator, config, engine)
	}

	#[tokio::test]
	async fn join_bypasses_servers_listed_in_no_queue_servers() {
		let handle = handle();
		{
			let mut config = handle.config.write().await;
			config.no_queue_servers.push("lobby".to_string());
		}
		let server = ServerName::from("lobby");
		let player = PlayerId::new();

		let outcome = handle.join(player, server.clone(), Priority::DEFAULT, false).await.unwrap();
		assert_eq!(outcome, JoinOutcome::Bypassed);
		assert!(handle.store.position(player, &server).await.is_none());
	}

	#[tokio::test]
	async fn join_queues_normally_when_not_listed() {
		let handle = handle();
		let server = ServerName::from("survival");
		let player = PlayerId::new();

		let outcome = handle.join(player, server.clone(), Priority::DEFAULT, false).await.unwrap();
		assert_eq!(outcome, JoinOutcome::Queued { position: 1 });
		assert_eq!(handle.store.position(player, &server).await, Some(1));
	}

	#[tokio::test]
	async fn add_refuses_duplicate_join() {
		let handle = handle();
		let server = ServerName::from("survival");
		let player = PlayerId::new();
		assert!(handle.add(player, server.clone()).await.is_ok());
		assert!(matches!(handle.add(player, server).await, Err(QueueError::AlreadyPresent { .. })));
	}

	#[tokio::test]
	async fn pause_then_list_reflects_state() {
		let handle = handle();
		let server = ServerName::from("survival");
		handle.pause(&server).await.unwrap();
		let listings = handle.list().await;
		assert_eq!(listings, vec![QueueListing { server, size: 0, paused: true, online: false }]);
	}

	#[tokio::test]
	async fn addall_moves_every_waiting_entry() {
		let handle = handle();
		let from = ServerName::from("survival");
		let to = ServerName::from("creative");
		let p1 = PlayerId::new();
		let p2 = PlayerId::new();
		handle.store.enqueue(p1, from.clone(), Priority::DEFAULT, false, false).await;
		handle.store.enqueue(p2, from.clone(), Priority::DEFAULT, false, false).await;

		let moved = handle.addall(&from, &to).await;
		assert_eq!(moved, 2);
		assert!(handle.store.snapshot(&from).await.is_empty());
		assert_eq!(handle.store.snapshot(&to).await.len(), 2);
	}

	#[tokio::test]
	async fn removeall_clears_and_notifies() {
		let handle = handle();
		let server = ServerName::from("survival");
		handle.store.enqueue(PlayerId::new(), server.clone(), Priority::DEFAULT, false, false).await;
		handle.store.enqueue(PlayerId::new(), server.clone(), Priority::DEFAULT, false, false).await;

		let removed = handle.removeall(&server).await;
		assert_eq!(removed, 2);
		assert!(handle.store.snapshot(&server).await.is_empty());
	}

	#[tokio::test]
	async fn remove_with_no_server_leaves_every_queue() {
		let handle = handle();
		let player = PlayerId::new();
		handle.store.enqueue(player, ServerName::from("a"), Priority::DEFAULT, false, false).await;
		handle.store.enqueue(player, ServerName::from("b"), Priority::DEFAULT, false, false).await;

		let removed = handle.remove(player, None).await.unwrap();
		assert_eq!(removed, 2);
	}

	#[tokio::test]
	async fn remove_missing_player_is_not_present() {
		let handle = handle();
		let server = ServerName::from("survival");
		handle.store.ensure_queue(&server);
		let result = handle.remove(PlayerId::new(), Some(server)).await;
		assert!(matches!(result, Err(QueueError::NotPresent { .. })));
	}
}
