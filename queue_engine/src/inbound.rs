use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::coordinator::{Coordinator, Message, Topic};
use crate::engine::ConnectBackend;
use crate::store::QueueStore;
use crate::types::{Priority, ServerName};

#[derive(Debug, Clone, Default)]
pub struct InboundDispatchStats {
	pub sends_handled: u64,
	pub adds_applied: u64,
	pub leaves_applied: u64,
}

/// Host-side half of the cross-proxy protocol the engine's `remote_send`
/// drives from the master side (§4.5). Subscribes to `queue.send` and performs
/// the connect on whichever proxy is actually hosting the player, publishing
/// `queue.send_result` back so the master's `remote_send` stops waiting
/// instead of timing out; and subscribes to `queue.add`/`queue.leave` so a
/// non-master proxy's forwarded enqueue/leave requests (§4.4: "non-master
/// proxies still accept enqueue/leave requests by forwarding them to the
/// master via the coordinator") are applied to the local `QueueStore`.
///
/// Grounded on `ws-connection/src/core/subscription.rs::SubscriptionManager`'s
/// per-topic fan-out shape, adapted from "notify local listeners" to "act on
/// behalf of the publisher" — the dispatcher loop itself is the same
/// `tokio::select!` over a `CancellationToken` every other tick in this crate
/// uses, just driven by inbound messages instead of an `Interval`.
pub struct InboundDispatcher<B: ConnectBackend> {
	store: Arc<QueueStore>,
	coordinator: Arc<dyn Coordinator>,
	connect: Arc<B>,
	shutdown: CancellationToken,
}

impl<B: ConnectBackend + 'static> InboundDispatcher<B> {
	#[must_use]
	pub const fn new(store: Arc<QueueStore>, coordinator: Arc<dyn Coordinator>, connect: Arc<B>, shutdown: CancellationToken) -> Self {
		Self {
			store,
			coordinator,
			connect,
			shutdown,
		}
	}

	pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<InboundDispatchStats> {
		tokio::spawn(async move { self.run().await })
	}

	async fn run(self: Arc<Self>) -> InboundDispatchStats {
		let mut stats = InboundDispatchStats::default();

		let (mut send_rx, mut add_rx, mut leave_rx) = match self.subscribe_all().await {
			Ok(subs) => subs,
			Err(error) => {
				error!(%error, "inbound dispatcher failed to subscribe, exiting without running");
				return stats;
			}
		};

		info!("inbound dispatcher starting");
		loop {
			tokio::select! {
				() = self.shutdown.cancelled() => {
					info!("inbound dispatcher received shutdown signal");
					break;
				}
				message = send_rx.recv() => self.on_send(message, &mut stats).await,
				message = add_rx.recv() => self.on_add(message, &mut stats).await,
				message = leave_rx.recv() => self.on_leave(message, &mut stats).await,
			}
		}
		info!(
			sends = stats.sends_handled,
			adds = stats.adds_applied,
			leaves = stats.leaves_applied,
			"inbound dispatcher shutting down"
		);
		stats
	}

	#[allow(clippy::type_complexity)]
	async fn subscribe_all(
		&self,
	) -> crate::error::Result<(
		tokio::sync::broadcast::Receiver<Message>,
		tokio::sync::broadcast::Receiver<Message>,
		tokio::sync::broadcast::Receiver<Message>,
	)> {
		let send_rx = self.coordinator.subscribe(Topic::QueueSend).await?;
		let add_rx = self.coordinator.subscribe(Topic::QueueAdd).await?;
		let leave_rx = self.coordinator.subscribe(Topic::QueueLeave).await?;
		Ok((send_rx, add_rx, leave_rx))
	}

	async fn on_send(&self, message: Result<Message, tokio::sync::broadcast::error::RecvError>, stats: &mut InboundDispatchStats) {
		match message {
			Ok(Message::QueueSend { player, server }) => {
				self.handle_send(player, server, stats).await;
			}
			Ok(_) => {}
			Err(error) => warn!(%error, topic = %Topic::QueueSend, "inbound subscription lagged or closed"),
		}
	}

	async fn on_add(&self, message: Result<Message, tokio::sync::broadcast::error::RecvError>, stats: &mut InboundDispatchStats) {
		match message {
			Ok(Message::QueueAdd { player, server, priority, full_bypass }) => {
				self.handle_add(player, server, priority, full_bypass, stats).await;
			}
			Ok(_) => {}
			Err(error) => warn!(%error, topic = %Topic::QueueAdd, "inbound subscription lagged or closed"),
		}
	}

	async fn on_leave(&self, message: Result<Message, tokio::sync::broadcast::error::RecvError>, stats: &mut InboundDispatchStats) {
		match message {
			Ok(Message::QueueLeave { player, server, .. }) => {
				self.handle_leave(player, server, stats).await;
			}
			Ok(_) => {}
			Err(error) => warn!(%error, topic = %Topic::QueueLeave, "inbound subscription lagged or closed"),
		}
	}

	/// §4.3 step 6: perform the connect on behalf of whichever proxy actually
	/// hosts `player`, then report the outcome on `queue.send_result` so the
	/// requesting master's `remote_send` can stop waiting instead of timing out.
	async fn handle_send(&self, player: crate::types::PlayerId, server: ServerName, stats: &mut InboundDispatchStats) {
		let success = self.connect.connect(player, &server).await;
		stats.sends_handled += 1;
		if let Err(error) = self.coordinator.publish(Message::QueueSendResult { player, server, success }).await {
			error!(%error, %player, "failed to publish queue.send_result");
		}
	}

	/// §4.4: applies a non-master proxy's forwarded enqueue to this store.
	/// `queue_bypass` isn't carried on the wire message itself; it's derived
	/// the same way [`crate::store::QueueEntry::new`] derives it, from the
	/// reserved `-1` priority.
	async fn handle_add(&self, player: crate::types::PlayerId, server: ServerName, priority: i32, full_bypass: bool, stats: &mut InboundDispatchStats) {
		let priority = Priority::new(priority);
		let queue_bypass = priority.is_bypass();
		let _ = self.store.enqueue(player, server, priority, full_bypass, queue_bypass).await;
		stats.adds_applied += 1;
	}

	/// §4.4: applies a non-master proxy's forwarded leave to this store.
	async fn handle_leave(&self, player: crate::types::PlayerId, server: ServerName, stats: &mut InboundDispatchStats) {
		let _ = self.store.dequeue(player, &server).await;
		stats.leaves_applied += 1;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::coordinator::LocalCoordinator;
	use crate::types::PlayerId;
	use async_trait::async_trait;

	struct AlwaysSucceeds;
	#[async_trait]
	impl ConnectBackend for AlwaysSucceeds {
		async fn connect(&self, _player: PlayerId, _server: &ServerName) -> bool {
			true
		}
	}

	struct AlwaysFails;
	#[async_trait]
	impl ConnectBackend for AlwaysFails {
		async fn connect(&self, _player: PlayerId, _server: &ServerName) -> bool {
			false
		}
	}

	fn dispatcher<B: ConnectBackend + 'static>(connect: Arc<B>) -> (Arc<QueueStore>, Arc<dyn Coordinator>, Arc<InboundDispatcher<B>>) {
		let store = Arc::new(QueueStore::new(true, true));
		let coordinator: Arc<dyn Coordinator> = Arc::new(LocalCoordinator::new());
		let dispatcher = Arc::new(InboundDispatcher::new(store.clone(), coordinator.clone(), connect, CancellationToken::new()));
		(store, coordinator, dispatcher)
	}

	#[tokio::test]
	async fn queue_send_is_answered_with_a_matching_send_result() {
		let (_store, coordinator, dispatcher) = dispatcher(Arc::new(AlwaysSucceeds));
		let mut replies = coordinator.subscribe(Topic::QueueSendResult).await.unwrap();
		let task = dispatcher.start();

		let player = PlayerId::new();
		let server = ServerName::from("survival");
		coordinator
			.publish(Message::QueueSend { player, server: server.clone() })
			.await
			.unwrap();

		let reply = tokio::time::timeout(std::time::Duration::from_secs(1), replies.recv()).await.unwrap().unwrap();
		match reply {
			Message::QueueSendResult { player: p, server: s, success } => {
				assert_eq!(p, player);
				assert_eq!(s, server);
				assert!(success);
			}
			other => panic!("unexpected message: {other:?}"),
		}
		task.abort();
	}

	#[tokio::test]
	async fn queue_send_reports_failure_from_a_refusing_backend() {
		let (_store, coordinator, dispatcher) = dispatcher(Arc::new(AlwaysFails));
		let mut replies = coordinator.subscribe(Topic::QueueSendResult).await.unwrap();
		let task = dispatcher.start();

		let player = PlayerId::new();
		let server = ServerName::from("survival");
		coordinator
			.publish(Message::QueueSend { player, server: server.clone() })
			.await
			.unwrap();

		let reply = tokio::time::timeout(std::time::Duration::from_secs(1), replies.recv()).await.unwrap().unwrap();
		assert!(matches!(reply, Message::QueueSendResult { success: false, .. }));
		task.abort();
	}

	#[tokio::test]
	async fn queue_add_is_applied_to_the_local_store() {
		let (store, coordinator, dispatcher) = dispatcher(Arc::new(AlwaysSucceeds));
		let task = dispatcher.start();

		let player = PlayerId::new();
		let server = ServerName::from("survival");
		coordinator
			.publish(Message::QueueAdd {
				player,
				server: server.clone(),
				priority: 0,
				full_bypass: false,
			})
			.await
			.unwrap();

		let deadline = std::time::Instant::now() + std::time::Duration::from_secs(1);
		while store.position(player, &server).await.is_none() && std::time::Instant::now() < deadline {
			tokio::time::sleep(std::time::Duration::from_millis(5)).await;
		}
		assert_eq!(store.position(player, &server).await, Some(1));
		task.abort();
	}

	#[tokio::test]
	async fn queue_leave_is_applied_to_the_local_store() {
		let (store, coordinator, dispatcher) = dispatcher(Arc::new(AlwaysSucceeds));
		let server = ServerName::from("survival");
		let player = PlayerId::new();
		store.enqueue(player, server.clone(), Priority::DEFAULT, false, false).await;
		let task = dispatcher.start();

		coordinator
			.publish(Message::QueueLeave {
				player,
				server: server.clone(),
				user_initiated: true,
			})
			.await
			.unwrap();

		let deadline = std::time::Instant::now() + std::time::Duration::from_secs(1);
		while store.position(player, &server).await.is_some() && std::time::Instant::now() < deadline {
			tokio::time::sleep(std::time::Duration::from_millis(5)).await;
		}
		assert!(store.position(player, &server).await.is_none());
		task.abort();
	}
}
