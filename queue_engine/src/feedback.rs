use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::coordinator::{Coordinator, Message};
use crate::store::{QueueEntry, QueueStore, ServerStatus};
use crate::types::ServerName;

#[derive(Debug, Clone, Default)]
pub struct FeedbackStats {
	pub cycles_completed: u64,
	pub messages_sent: u64,
}

/// Renders one action-bar line per queued entry, on a `message_delay` tick.
/// The tick-loop skeleton is the same `Interval` + `CancellationToken` shape
/// the prober and engine ticks use.
pub struct PlayerFeedback {
	store: Arc<QueueStore>,
	coordinator: Arc<dyn Coordinator>,
	config: Arc<RwLock<Config>>,
	shutdown: CancellationToken,
}

impl PlayerFeedback {
	#[must_use]
	pub const fn new(store: Arc<QueueStore>, coordinator: Arc<dyn Coordinator>, config: Arc<RwLock<Config>>, shutdown: CancellationToken) -> Self {
		Self { store, coordinator, config, shutdown }
	}

	pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<FeedbackStats> {
		tokio::spawn(async move { self.run().await })
	}

	async fn run(self: Arc<Self>) -> FeedbackStats {
		let mut stats = FeedbackStats::default();
		let mut period = self.config.read().await.message_delay;
		let mut ticker = interval(period);

		info!(period_ms = period.as_millis(), "feedback tick starting");
		loop {
			tokio::select! {
				() = self.shutdown.cancelled() => {
					info!("feedback tick received shutdown signal");
					break;
				}
				_ = ticker.tick() => {
					self.tick(&mut stats).await;
					stats.cycles_completed += 1;
					if stats.cycles_completed % 100 == 0 {
						debug!(cycles = stats.cycles_completed, sent = stats.messages_sent, "feedback tick heartbeat");
					}
					let new_period = self.config.read().await.message_delay;
					if new_period != period {
						period = new_period;
						ticker = interval(period);
					}
				}
			}
		}
		info!(cycles = stats.cycles_completed, sent = stats.messages_sent, "feedback tick shutting down");
		stats
	}

	/// Render and publish one action-bar line per queued entry across every
	/// known backend. Public so scenario tests can step it deterministically.
	pub async fn tick(&self, stats: &mut FeedbackStats) {
		let config = self.config.read().await;
		if !config.enabled {
			return;
		}
		let send_delay = config.send_delay;
		drop(config);
		for server in self.store.server_names() {
			let (entries, server_status) = self.store.with_queue(&server, |queue| (queue.entries.iter().cloned().collect::<Vec<_>>(), queue.server_status)).await.unwrap_or_default();
			let paused = self.store.with_queue(&server, |queue| queue.paused).await.unwrap_or(false);
			let full = self.store.with_queue(&server, |queue| queue.full).await.unwrap_or(false);
			let total = entries.len();

			for (index, entry) in entries.iter().enumerate() {
				let position = index + 1;
				let text = render(entry, position, total, &server, server_status, paused, full, send_delay);
				let _ = self
					.coordinator
					.publish(Message::ActionBar {
						player: entry.player_id,
						text,
					})
					.await;
				stats.messages_sent += 1;
			}
		}
	}
}

/// Pick the state template per the checked-in-order precedence list and render
/// it with position/total/server/ETA where applicable.
fn render(entry: &QueueEntry, position: usize, total: usize, server: &ServerName, server_status: ServerStatus, paused: bool, full: bool, send_delay: Duration) -> String {
	if entry.queue_bypass {
		return format!("Bypassing queue for {server}...");
	}
	if full && !entry.full_bypass {
		let eta = format_duration(eta_for(entry, position, send_delay));
		return format!("{server} is full — position {position}/{total}, ETA {eta}");
	}
	if entry.waiting_for_connection {
		return format!("Connecting to {server}...");
	}
	if paused {
		return format!("Queue for {server} is paused — position {position}/{total}");
	}
	if server_status.is_online() {
		let eta = format_duration(eta_for(entry, position, send_delay));
		return format!("Queued for {server} — position {position}/{total}, ETA {eta}");
	}
	format!("{server} is offline — position {position}/{total}")
}

/// ETA in seconds, or `Duration::ZERO` after a failed attempt so a retry never
/// makes the displayed wait look like it grew.
fn eta_for(entry: &QueueEntry, position: usize, send_delay: Duration) -> Duration {
	if entry.connection_attempts > 0 {
		return Duration::ZERO;
	}
	send_delay.saturating_mul(u32::try_from(position).unwrap_or(u32::MAX))
}

/// Split a duration into days/hours/minutes/seconds, emitting only non-zero
/// leading components; seconds is always emitted when nothing higher exists.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
	let mut secs = duration.as_secs();
	let days = secs / 86_400;
	secs %= 86_400;
	let hours = secs / 3_600;
	secs %= 3_600;
	let minutes = secs / 60;
	secs %= 60;

	let mut parts = Vec::new();
	if days > 0 {
		parts.push(format!("{days}d"));
	}
	if hours > 0 {
		parts.push(format!("{hours}h"));
	}
	if minutes > 0 {
		parts.push(format!("{minutes}m"));
	}
	if secs > 0 || parts.is_empty() {
		parts.push(format!("{secs}s"));
	}
	parts.join(" ")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn format_duration_emits_only_nonzero_leading_components() {
		assert_eq!(format_duration(Duration::from_secs(0)), "0s");
		assert_eq!(format_duration(Duration::from_secs(5)), "5s");
		assert_eq!(format_duration(Duration::from_secs(65)), "1m 5s");
		assert_eq!(format_duration(Duration::from_secs(3_665)), "1h 1m 5s");
		assert_eq!(format_duration(Duration::from_secs(90_061)), "1d 1h 1m 1s");
	}

	#[test]
	fn eta_resets_to_zero_after_a_failed_attempt() {
		let entry = QueueEntry {
			connection_attempts: 1,
			..test_entry()
		};
		assert_eq!(eta_for(&entry, 3, Duration::from_secs(1)), Duration::ZERO);
	}

	#[test]
	fn eta_scales_with_position_before_any_attempt() {
		let entry = test_entry();
		assert_eq!(eta_for(&entry, 3, Duration::from_secs(2)), Duration::from_secs(6));
	}

	fn test_entry() -> QueueEntry {
		QueueEntry::new(crate::types::PlayerId::new(), ServerName::from("survival"), crate::types::Priority::DEFAULT, false, false)
	}
}
