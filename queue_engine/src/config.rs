use std::collections::HashMap;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::types::ProxyId;

/// Engine configuration. Every recognized option is a field here; durations are
/// accepted as fractional seconds on the CLI and converted once at parse time.
#[derive(Parser, Clone, Debug, Serialize, Deserialize)]
#[command(author, version, about, long_about = None)]
pub struct Config {
	#[arg(long, env = "QUEUE_ENABLED", default_value_t = true, help = "Master switch for the queue engine")]
	pub enabled: bool,

	#[arg(
        long,
        env = "SEND_DELAY_SECS",
        default_value = "1.0",
        value_parser = parse_duration,
        help = "Period of the send tick and the unit of ETA computation"
    )]
	pub send_delay: Duration,

	#[arg(
        long,
        env = "MESSAGE_DELAY_SECS",
        default_value = "1.0",
        value_parser = parse_duration,
        help = "Period of the action-bar refresh tick"
    )]
	pub message_delay: Duration,

	#[arg(
        long,
        env = "BACKEND_PING_INTERVAL_SECS",
        default_value = "5.0",
        value_parser = parse_duration,
        help = "Period of the backend prober tick"
    )]
	pub backend_ping_interval: Duration,

	#[arg(
        long,
        env = "QUEUE_DELAY_SECS",
        default_value = "5.0",
        value_parser = parse_duration,
        help = "Grace period in WAITING before promotion to ONLINE"
    )]
	pub queue_delay: Duration,

	#[arg(long, env = "MAX_SEND_RETRIES", default_value = "3", help = "Retries per entry before giving up")]
	pub max_send_retries: u32,

	#[arg(
        long,
        env = "ALLOW_MULTI_QUEUE",
        default_value_t = false,
        help = "If false, enqueueing atomically removes the player from other queues"
    )]
	pub allow_multi_queue: bool,

	#[arg(long, env = "ALLOW_PAUSED_QUEUE_JOINING", default_value_t = true, help = "If false, enqueue on a paused queue is refused")]
	pub allow_paused_queue_joining: bool,

	#[arg(long, env = "FORWARD_KICK_REASON", default_value_t = true, help = "Propagate backend refusal reason to the player")]
	pub forward_kick_reason: bool,

	/// Backend names that bypass the queue entirely. Populated from a reload
	/// source (config file) rather than repeated CLI flags.
	#[arg(skip)]
	pub no_queue_servers: Vec<String>,

	/// Ordered list of master-eligible proxy ids, highest priority first.
	#[arg(skip)]
	pub master_proxy_ids: Vec<ProxyId>,

	/// Capacity threshold per backend name for the `full` flag.
	#[arg(skip)]
	pub player_caps: HashMap<String, usize>,

	#[arg(skip)]
	pub queue_aliases: Vec<String>,

	#[arg(skip)]
	pub leavequeue_aliases: Vec<String>,

	#[arg(skip)]
	pub queueadmin_aliases: Vec<String>,
}

impl Config {
	#[must_use]
	pub fn new() -> Self {
		Self::parse()
	}
}

impl Default for Config {
	fn default() -> Self {
		Self {
			enabled: true,
			send_delay: Duration::from_secs(1),
			message_delay: Duration::from_secs(1),
			backend_ping_interval: Duration::from_secs(5),
			queue_delay: Duration::from_secs(5),
			max_send_retries: 3,
			allow_multi_queue: false,
			allow_paused_queue_joining: true,
			forward_kick_reason: true,
			no_queue_servers: Vec::new(),
			master_proxy_ids: Vec::new(),
			player_caps: HashMap::new(),
			queue_aliases: vec!["queue".to_string()],
			leavequeue_aliases: vec!["leavequeue".to_string()],
			queueadmin_aliases: vec!["queueadmin".to_string()],
		}
	}
}

#[cfg(test)]
impl Config {
	/// Compressed timings so scenario tests don't spend wall-clock seconds
	/// waiting on real tick intervals.
	#[must_use]
	pub fn test() -> Self {
		Self {
			send_delay: Duration::from_millis(10),
			message_delay: Duration::from_millis(10),
			backend_ping_interval: Duration::from_millis(10),
			queue_delay: Duration::from_millis(20),
			max_send_retries: 2,
			..Self::default()
		}
	}
}

fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
	let secs: f64 = s.parse().map_err(|e| format!("invalid duration '{s}': {e}"))?;
	if secs < 0.0 {
		return Err(format!("duration must be non-negative: {s}"));
	}
	Ok(Duration::from_secs_f64(secs))
}
