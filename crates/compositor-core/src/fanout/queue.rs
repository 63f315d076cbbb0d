//! Bounded FIFO of notifications captured before any session existed.
//! Overflow drops the oldest entry and increments a counter rather than
//! growing unbounded or blocking the mount's consumer task.

use std::collections::VecDeque;

use crate::types::NotificationEvent;

pub struct PendingNotificationQueue {
	capacity: usize,
	items: VecDeque<NotificationEvent>,
	dropped: u64,
}

impl PendingNotificationQueue {
	pub fn new(capacity: usize) -> Self {
		Self {
			capacity,
			items: VecDeque::with_capacity(capacity.min(1024)),
			dropped: 0,
		}
	}

	pub fn push(&mut self, event: NotificationEvent) {
		if self.items.len() >= self.capacity {
			self.items.pop_front();
			self.dropped += 1;
			tracing::warn!(target: "compositor", dropped_total = self.dropped, "pending notification queue full, dropping oldest");
		}
		self.items.push_back(event);
	}

	pub fn drain(&mut self) -> Vec<NotificationEvent> {
		self.items.drain(..).collect()
	}

	pub fn dropped_count(&self) -> u64 {
		self.dropped
	}
}
