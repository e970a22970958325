//! Per-slot waitlists
//!
//! Strict FIFO. A user appears at most once per queue; joining twice is
//! reported rather than duplicated so the caller can word the reply.

use std::collections::VecDeque;

use shared::UserId;

/// Result of a join attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Queued; position is 1-based
    Joined { position: usize },
    AlreadyQueued { position: usize },
}

/// FIFO queue of users waiting on one slot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Waitlist {
    queue: VecDeque<UserId>,
}

impl Waitlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&mut self, user: UserId) -> JoinOutcome {
        if let Some(pos) = self.queue.iter().position(|u| *u == user) {
            return JoinOutcome::AlreadyQueued { position: pos + 1 };
        }
        self.queue.push_back(user);
        JoinOutcome::Joined {
            position: self.queue.len(),
        }
    }

    /// Remove and return the head of the queue
    pub fn pop_next(&mut self) -> Option<UserId> {
        self.queue.pop_front()
    }

    /// Drop a user wherever they stand. Returns whether they were queued.
    pub fn remove(&mut self, user: UserId) -> bool {
        let before = self.queue.len();
        self.queue.retain(|u| *u != user);
        self.queue.len() != before
    }

    pub fn contains(&self, user: UserId) -> bool {
        self.queue.iter().any(|u| *u == user)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Drain everyone, head first. Used when a slot settles for good.
    pub fn drain(&mut self) -> Vec<UserId> {
        self.queue.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_is_fifo_and_deduplicated() {
        let mut wl = Waitlist::new();
        assert_eq!(wl.join(UserId(1)), JoinOutcome::Joined { position: 1 });
        assert_eq!(wl.join(UserId(2)), JoinOutcome::Joined { position: 2 });
        assert_eq!(
            wl.join(UserId(1)),
            JoinOutcome::AlreadyQueued { position: 1 }
        );
        assert_eq!(wl.len(), 2);

        assert_eq!(wl.pop_next(), Some(UserId(1)));
        assert_eq!(wl.pop_next(), Some(UserId(2)));
        assert_eq!(wl.pop_next(), None);
    }

    #[test]
    fn remove_preserves_order_of_the_rest() {
        let mut wl = Waitlist::new();
        wl.join(UserId(1));
        wl.join(UserId(2));
        wl.join(UserId(3));

        assert!(wl.remove(UserId(2)));
        assert!(!wl.remove(UserId(2)));
        assert_eq!(wl.pop_next(), Some(UserId(1)));
        assert_eq!(wl.pop_next(), Some(UserId(3)));
    }

    #[test]
    fn drain_empties_head_first() {
        let mut wl = Waitlist::new();
        wl.join(UserId(5));
        wl.join(UserId(6));
        assert_eq!(wl.drain(), vec![UserId(5), UserId(6)]);
        assert!(wl.is_empty());
    }
}
