//! Per-peer sliding-window rate limiter.
//!
//! At most 10 messages per second per peer device, over a true sliding
//! 1-second window. The tracked-peer map is bounded at 500 entries with
//! FIFO eviction of the oldest-seen peer.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

pub const MAX_MESSAGES_PER_WINDOW: usize = 10;
pub const WINDOW: Duration = Duration::from_secs(1);
pub const MAX_TRACKED_PEERS: usize = 500;

pub struct RateLimiter {
    limit: usize,
    window: Duration,
    peer_cap: usize,
    peers: HashMap<String, VecDeque<Instant>>,
    arrival_order: VecDeque<String>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(MAX_MESSAGES_PER_WINDOW, WINDOW, MAX_TRACKED_PEERS)
    }
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration, peer_cap: usize) -> Self {
        Self {
            limit,
            window,
            peer_cap,
            peers: HashMap::new(),
            arrival_order: VecDeque::new(),
        }
    }

    /// Record one send attempt at `now`. Returns false when the peer is
    /// over its window; a rejected attempt does not consume budget.
    pub fn try_acquire(&mut self, device_id: &str, now: Instant) -> bool {
        if !self.peers.contains_key(device_id) {
            if self.peers.len() == self.peer_cap {
                if let Some(oldest) = self.arrival_order.pop_front() {
                    self.peers.remove(&oldest);
                }
            }
            self.peers.insert(device_id.to_string(), VecDeque::new());
            self.arrival_order.push_back(device_id.to_string());
        }

        let stamps = self.peers.get_mut(device_id).expect("just inserted");
        while let Some(front) = stamps.front() {
            if now.duration_since(*front) >= self.window {
                stamps.pop_front();
            } else {
                break;
            }
        }
        if stamps.len() >= self.limit {
            return false;
        }
        stamps.push_back(now);
        true
    }

    pub fn tracked_peers(&self) -> usize {
        self.peers.len()
    }
}
