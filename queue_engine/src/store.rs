use std::collections::{HashSet, VecDeque};
use std::time::Instant;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::types::{PlayerId, Priority, ServerName};

/// Health classification of a backend, as observed by the prober.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServerStatus {
	#[default]
	Offline,
	Waiting,
	Online,
}

impl ServerStatus {
	#[must_use]
	pub const fn is_online(self) -> bool {
		matches!(self, Self::Online)
	}
}

/// One player's pending request for one backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
	pub player_id: PlayerId,
	pub target_server: ServerName,
	pub priority: Priority,
	pub full_bypass: bool,
	pub queue_bypass: bool,
	pub connection_attempts: u32,
	pub waiting_for_connection: bool,
	#[serde(skip, default = "Instant::now")]
	pub enqueued_at: Instant,
}

impl QueueEntry {
	#[must_use]
	pub fn new(player_id: PlayerId, target_server: ServerName, priority: Priority, full_bypass: bool, queue_bypass: bool) -> Self {
		Self {
			player_id,
			target_server,
			priority: if queue_bypass { Priority::BYPASS } else { priority },
			full_bypass,
			queue_bypass: queue_bypass || priority.is_bypass(),
			connection_attempts: 0,
			waiting_for_connection: false,
			enqueued_at: Instant::now(),
		}
	}

	#[must_use]
	pub const fn is_bypass(&self) -> bool {
		self.queue_bypass || self.priority.is_bypass()
	}
}

/// A backend's full ordered waiting line plus its observed health.
#[derive(Debug)]
pub struct QueueStatus {
	pub server_name: ServerName,
	pub entries: VecDeque<QueueEntry>,
	pub server_status: ServerStatus,
	pub full: bool,
	pub paused: bool,
	pub last_online_transition_time: Option<Instant>,
}

impl QueueStatus {
	#[must_use]
	pub const fn new(server_name: ServerName) -> Self {
		Self {
			server_name,
			entries: VecDeque::new(),
			server_status: ServerStatus::Offline,
			full: false,
			paused: false,
			last_online_transition_time: None,
		}
	}

	/// Insert `entry` per the priority-ordered insertion rule: immediately
	/// before the first existing entry whose priority is strictly less than the
	/// new entry's. Entries of equal priority thus remain in first-come,
	/// first-served order, and a higher-priority late arrival overtakes every
	/// lower-priority entry already waiting.
	fn insert_ordered(&mut self, entry: QueueEntry) {
		let position = self.entries.iter().position(|existing| existing.priority < entry.priority);
		match position {
			Some(index) => self.entries.insert(index, entry),
			None => self.entries.push_back(entry),
		}
	}

	#[must_use]
	pub fn position_of(&self, player_id: PlayerId) -> Option<usize> {
		self.entries.iter().position(|e| e.player_id == player_id).map(|i| i + 1)
	}

	#[must_use]
	pub fn contains(&self, player_id: PlayerId) -> bool {
		self.entries.iter().any(|e| e.player_id == player_id)
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

/// Outcome of [`QueueStore::enqueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
	Placed { position: usize },
	AlreadyPresent,
	Rejected { reason: String },
}

/// Outcome of [`QueueStore::dequeue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DequeueOutcome {
	Removed,
	NotPresent,
}

/// Per-backend ordered waiting lines plus a denormalized player -> servers index.
///
/// Each backend's [`QueueStatus`] lives behind its own `tokio::sync::Mutex`, keyed
/// in a `DashMap`, so operations on unrelated backends never contend: the engine,
/// the prober, and the feedback tick can all be mutating different queues at the
/// same instant. Within one backend, every mutation is serialized through that
/// queue's mutex, which is what gives the priority walk a consistent snapshot to
/// run against.
#[derive(Default)]
pub struct QueueStore {
	queues: DashMap<ServerName, Mutex<QueueStatus>>,
	player_view: DashMap<PlayerId, HashSet<ServerName>>,
	allow_multi_queue: bool,
	allow_paused_queue_joining: bool,
}

impl QueueStore {
	#[must_use]
	pub fn new(allow_multi_queue: bool, allow_paused_queue_joining: bool) -> Self {
		Self {
			queues: DashMap::new(),
			player_view: DashMap::new(),
			allow_multi_queue,
			allow_paused_queue_joining,
		}
	}

	fn queue_for(&self, server: &ServerName) -> dashmap::mapref::one::RefMut<'_, ServerName, Mutex<QueueStatus>> {
		self.queues.entry(server.clone()).or_insert_with(|| Mutex::new(QueueStatus::new(server.clone())))
	}

	/// Attempt to place `player_id` on `server`'s waiting line.
	pub async fn enqueue(
		&self, player_id: PlayerId, server: ServerName, priority: Priority, full_bypass: bool, queue_bypass: bool,
	) -> EnqueueOutcome {
		if !self.allow_multi_queue {
			self.leave_all_except(player_id, &server).await;
		}

		let queue_ref = self.queue_for(&server);
		let mut queue = queue_ref.lock().await;

		if queue.contains(player_id) {
			return EnqueueOutcome::AlreadyPresent;
		}

		let is_bypass_entry = queue_bypass || priority.is_bypass();
		if queue.paused && !self.allow_paused_queue_joining && !is_bypass_entry {
			return EnqueueOutcome::Rejected {
				reason: "queue is paused".to_string(),
			};
		}

		let entry = QueueEntry::new(player_id, server.clone(), priority, full_bypass, queue_bypass);
		queue.insert_ordered(entry);
		let position = queue.position_of(player_id).unwrap_or(queue.len());
		drop(queue);

		self.player_view.entry(player_id).or_default().insert(server);
		EnqueueOutcome::Placed { position }
	}

	/// Remove `player_id` from every other queue, used to enforce
	/// `allow_multi_queue == false` atomically with respect to the new enqueue.
	async fn leave_all_except(&self, player_id: PlayerId, keep: &ServerName) {
		let others: Vec<ServerName> = self
			.player_view
			.get(&player_id)
			.map(|servers| servers.iter().filter(|s| *s != keep).cloned().collect())
			.unwrap_or_default();

		for server in others {
			self.dequeue(player_id, &server).await;
		}
	}

	/// Remove `player_id` from `server`'s queue, if present.
	pub async fn dequeue(&self, player_id: PlayerId, server: &ServerName) -> DequeueOutcome {
		let Some(queue_ref) = self.queues.get(server) else {
			return DequeueOutcome::NotPresent;
		};
		let mut queue = queue_ref.lock().await;
		let before = queue.len();
		queue.entries.retain(|e| e.player_id != player_id);
		let removed = queue.len() != before;
		drop(queue);

		if !removed {
			return DequeueOutcome::NotPresent;
		}

		if let Some(mut servers) = self.player_view.get_mut(&player_id) {
			servers.remove(server);
		}
		DequeueOutcome::Removed
	}

	/// Remove `player_id` from every queue they are waiting in; returns the count
	/// removed. Used by `/leavequeue` with no arguments and by disconnect cleanup.
	pub async fn leave_all(&self, player_id: PlayerId) -> usize {
		let servers: Vec<ServerName> = self.player_view.get(&player_id).map(|s| s.iter().cloned().collect()).unwrap_or_default();

		let mut removed = 0;
		for server in servers {
			if self.dequeue(player_id, &server).await == DequeueOutcome::Removed {
				removed += 1;
			}
		}
		removed
	}

	/// 1-based position of `player_id` in `server`'s queue, if present.
	pub async fn position(&self, player_id: PlayerId, server: &ServerName) -> Option<usize> {
		let queue_ref = self.queues.get(server)?;
		let queue = queue_ref.lock().await;
		queue.position_of(player_id)
	}

	/// Clone of the head entry, if any, without removing it.
	pub async fn peek_head(&self, server: &ServerName) -> Option<QueueEntry> {
		let queue_ref = self.queues.get(server)?;
		let queue = queue_ref.lock().await;
		queue.entries.front().cloned()
	}

	/// Ordered snapshot of all entries currently queued for `server`.
	pub async fn snapshot(&self, server: &ServerName) -> Vec<QueueEntry> {
		let Some(queue_ref) = self.queues.get(server) else {
			return Vec::new();
		};
		let queue = queue_ref.lock().await;
		queue.entries.iter().cloned().collect()
	}

	/// The set of backend names this store has ever seen a reference to.
	#[must_use]
	pub fn server_names(&self) -> Vec<ServerName> {
		self.queues.iter().map(|entry| entry.key().clone()).collect()
	}

	/// Repopulate `server`'s queue from a coordinator snapshot, but only if it is
	/// currently empty. Used when a proxy is newly elected master for a queue it
	/// has never locally served: a snapshot taken by the previous master is the
	/// only record of who was waiting. `entries` is assumed already
	/// priority-ordered, as produced by `snapshot`, so it is appended verbatim
	/// rather than re-walked through `insert_ordered`.
	pub async fn restore_if_empty(&self, server: &ServerName, entries: Vec<QueueEntry>) {
		if entries.is_empty() {
			return;
		}
		let queue_ref = self.queue_for(server);
		let mut queue = queue_ref.lock().await;
		if !queue.entries.is_empty() {
			return;
		}
		for entry in &entries {
			self.player_view.entry(entry.player_id).or_default().insert(server.clone());
		}
		queue.entries.extend(entries);
	}

	/// The backends `player_id` currently has a pending entry in, per the
	/// player-view secondary index. Used by the disconnect-timeout scheduler to
	/// know which queues to arm expirations for.
	#[must_use]
	pub fn servers_for_player(&self, player_id: PlayerId) -> Vec<ServerName> {
		self.player_view.get(&player_id).map(|servers| servers.iter().cloned().collect()).unwrap_or_default()
	}

	/// Ensure a queue exists for `server` (created lazily on first reference
	/// otherwise); returns nothing since callers always go through the
	/// lock-acquiring methods above, but probers/admins use this to make a
	/// backend visible in `list()` before anyone has joined it.
	pub fn ensure_queue(&self, server: &ServerName) {
		self.queues.entry(server.clone()).or_insert_with(|| Mutex::new(QueueStatus::new(server.clone())));
	}

	/// Run `f` against the locked queue for `server`, if it exists.
	pub async fn with_queue<F, R>(&self, server: &ServerName, f: F) -> Option<R>
	where
		F: FnOnce(&mut QueueStatus) -> R,
	{
		let queue_ref = self.queues.get(server)?;
		let mut queue = queue_ref.lock().await;
		Some(f(&mut queue))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn server(name: &str) -> ServerName {
		ServerName::from(name)
	}

	#[tokio::test]
	async fn priority_overtake_orders_as_specified() {
		let store = QueueStore::new(true, true);
		let s = server("survival");
		store.ensure_queue(&s);
		store.with_queue(&s, |q| {
			q.server_status = ServerStatus::Online;
		}).await;

		let p1 = PlayerId::new();
		let p2 = PlayerId::new();
		let p3 = PlayerId::new();
		let p4 = PlayerId::new();

		store.enqueue(p1, s.clone(), Priority::new(0), false, false).await;
		store.enqueue(p2, s.clone(), Priority::new(0), false, false).await;
		store.enqueue(p3, s.clone(), Priority::new(5), false, false).await;
		store.enqueue(p4, s.clone(), Priority::new(0), false, false).await;

		let snapshot = store.snapshot(&s).await;
		let order: Vec<PlayerId> = snapshot.iter().map(|e| e.player_id).collect();
		assert_eq!(order, vec![p3, p1, p2, p4]);
	}

	#[tokio::test]
	async fn priority_invariant_holds_after_arbitrary_inserts() {
		let store = QueueStore::new(true, true);
		let s = server("arena");
		let priorities = [0, 5, 0, -1, 3, 3, 0, 5];
		for p in priorities {
			store.enqueue(PlayerId::new(), s.clone(), Priority::new(p), false, p == -1).await;
		}

		let snapshot = store.snapshot(&s).await;
		for window in snapshot.windows(2) {
			assert!(window[0].priority >= window[1].priority);
		}
	}

	#[tokio::test]
	async fn enqueue_twice_is_already_present() {
		let store = QueueStore::new(true, true);
		let s = server("survival");
		let p = PlayerId::new();
		let first = store.enqueue(p, s.clone(), Priority::DEFAULT, false, false).await;
		let second = store.enqueue(p, s.clone(), Priority::DEFAULT, false, false).await;
		assert!(matches!(first, EnqueueOutcome::Placed { position: 1 }));
		assert_eq!(second, EnqueueOutcome::AlreadyPresent);
	}

	#[tokio::test]
	async fn multi_queue_disabled_moves_player_atomically() {
		let store = QueueStore::new(false, true);
		let s1 = server("survival");
		let s2 = server("creative");
		let p = PlayerId::new();

		store.enqueue(p, s1.clone(), Priority::DEFAULT, false, false).await;
		assert!(store.position(p, &s1).await.is_some());

		store.enqueue(p, s2.clone(), Priority::DEFAULT, false, false).await;
		assert!(store.position(p, &s1).await.is_none());
		assert!(store.position(p, &s2).await.is_some());
	}

	#[tokio::test]
	async fn leave_all_removes_every_membership() {
		let store = QueueStore::new(true, true);
		let p = PlayerId::new();
		store.enqueue(p, server("a"), Priority::DEFAULT, false, false).await;
		store.enqueue(p, server("b"), Priority::DEFAULT, false, false).await;

		let removed = store.leave_all(p).await;
		assert_eq!(removed, 2);
		assert!(store.position(p, &server("a")).await.is_none());
		assert!(store.position(p, &server("b")).await.is_none());
	}

	#[tokio::test]
	async fn dequeue_missing_player_is_not_present() {
		let store = QueueStore::new(true, true);
		let s = server("survival");
		store.ensure_queue(&s);
		let outcome = store.dequeue(PlayerId::new(), &s).await;
		assert_eq!(outcome, DequeueOutcome::NotPresent);
	}

	#[tokio::test]
	async fn paused_queue_rejects_join_when_configured() {
		let store = QueueStore::new(true, false);
		let s = server("survival");
		store.ensure_queue(&s);
		store.with_queue(&s, |q| q.paused = true).await;

		let outcome = store.enqueue(PlayerId::new(), s.clone(), Priority::DEFAULT, false, false).await;
		assert!(matches!(outcome, EnqueueOutcome::Rejected { .. }));
	}

	#[tokio::test]
	async fn bypass_entry_joins_paused_queue_even_when_joining_disabled() {
		let store = QueueStore::new(true, false);
		let s = server("survival");
		store.ensure_queue(&s);
		store.with_queue(&s, |q| q.paused = true).await;

		let outcome = store.enqueue(PlayerId::new(), s.clone(), Priority::BYPASS, false, true).await;
		assert!(matches!(outcome, EnqueueOutcome::Placed { .. }));
	}

	#[tokio::test]
	async fn restore_if_empty_repopulates_an_empty_queue() {
		let store = QueueStore::new(true, true);
		let s = server("survival");
		let entries = vec![
			QueueEntry::new(PlayerId::new(), s.clone(), Priority::new(5), false, false),
			QueueEntry::new(PlayerId::new(), s.clone(), Priority::new(0), false, false),
		];
		let expected_order: Vec<PlayerId> = entries.iter().map(|e| e.player_id).collect();

		store.restore_if_empty(&s, entries).await;
		let snapshot = store.snapshot(&s).await;
		assert_eq!(snapshot.iter().map(|e| e.player_id).collect::<Vec<_>>(), expected_order);
		assert_eq!(store.position(expected_order[0], &s).await, Some(1));
	}

	#[tokio::test]
	async fn restore_if_empty_does_not_clobber_an_already_populated_queue() {
		let store = QueueStore::new(true, true);
		let s = server("survival");
		let live_player = PlayerId::new();
		store.enqueue(live_player, s.clone(), Priority::DEFAULT, false, false).await;

		let stale = vec![QueueEntry::new(PlayerId::new(), s.clone(), Priority::new(5), false, false)];
		store.restore_if_empty(&s, stale).await;

		let snapshot = store.snapshot(&s).await;
		assert_eq!(snapshot.len(), 1);
		assert_eq!(snapshot[0].player_id, live_player);
	}
}
