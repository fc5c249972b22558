// ABOUTME: Per-conversation async locks serializing turns that extend the same conversation
// ABOUTME: Entries are created on demand and removed once no turn holds or awaits them
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of per-conversation locks
///
/// Uses `DashMap` for sharded locking so unrelated conversations never contend.
#[derive(Clone, Default)]
pub struct ConversationLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl ConversationLocks {
    /// Create an empty lock registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other turn holds `conversation_id`, then hold it
    pub async fn acquire(&self, conversation_id: &str) -> ConversationGuard {
        let mutex = Arc::clone(
            self.locks
                .entry(conversation_id.to_owned())
                .or_default()
                .value(),
        );
        let guard = mutex.lock_owned().await;
        ConversationGuard {
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
            conversation_id: conversation_id.to_owned(),
        }
    }

    /// Number of conversations with a live lock entry
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no conversation is locked or awaited
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive hold on one conversation; released on drop
pub struct ConversationGuard {
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    conversation_id: String,
}

impl Drop for ConversationGuard {
    fn drop(&mut self) {
        // Release first so waiters can proceed, then drop the entry if nobody else references it
        drop(self.guard.take());
        self.locks
            .remove_if(&self.conversation_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
