use std::time::Duration;

use async_trait::async_trait;

use crate::types::{PlayerId, Priority, ServerName};

/// External collaborator standing in for the proxy's permissions system. The
/// queue engine never reads permission data itself: every `enqueue` call
/// already carries an explicit `priority`/`full_bypass`/`queue_bypass` triple,
/// and this trait is how a caller (the out-of-scope `/queue` command, or this
/// crate's own CLI) looks those values up for a given player before calling
/// the engine.
#[async_trait]
pub trait PermissionAdapter: Send + Sync {
	/// The priority tier `player` holds for `server`, or [`Priority::DEFAULT`]
	/// if the player has no specific grant.
	async fn priority_for(&self, player: PlayerId, server: &ServerName) -> Priority;

	/// Whether `player` is permitted to join `server`'s queue even when it is
	/// reporting full.
	async fn full_bypass_for(&self, player: PlayerId, server: &ServerName) -> bool;

	/// How long a disconnected player's queue entries are kept before the
	/// scheduler's disconnect-timeout expires them.
	async fn disconnect_timeout_for(&self, player: PlayerId) -> Duration;
}

/// A [`PermissionAdapter`] that grants every player the same defaults.
/// Suitable for single-tier deployments and for driving this crate's CLI
/// without a real permissions backend wired in.
pub struct StaticPermissionAdapter {
	default_priority: Priority,
	default_full_bypass: bool,
	default_disconnect_timeout: Duration,
}

impl StaticPermissionAdapter {
	#[must_use]
	pub const fn new(default_priority: Priority, default_full_bypass: bool, default_disconnect_timeout: Duration) -> Self {
		Self {
			default_priority,
			default_full_bypass,
			default_disconnect_timeout,
		}
	}
}

impl Default for StaticPermissionAdapter {
	fn default() -> Self {
		Self::new(Priority::DEFAULT, false, Duration::from_secs(60))
	}
}

#[async_trait]
impl PermissionAdapter for StaticPermissionAdapter {
	async fn priority_for(&self, _player: PlayerId, _server: &ServerName) -> Priority {
		self.default_priority
	}

	async fn full_bypass_for(&self, _player: PlayerId, _server: &ServerName) -> bool {
		self.default_full_bypass
	}

	async fn disconnect_timeout_for(&self, _player: PlayerId) -> Duration {
		self.default_disconnect_timeout
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn static_adapter_returns_its_configured_defaults() {
		let adapter = StaticPermissionAdapter::new(Priority::new(5), true, Duration::from_secs(30));
		let player = PlayerId::new();
		let server = ServerName::from("survival");

		assert_eq!(adapter.priority_for(player, &server).await, Priority::new(5));
		assert!(adapter.full_bypass_for(player, &server).await);
		assert_eq!(adapter.disconnect_timeout_for(player).await, Duration::from_secs(30));
	}
}
