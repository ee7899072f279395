/*
 * vDesk customer support engine
 * Copyright (C) 2023 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/

use std::collections::HashMap;

struct Slot {
    mutex: std::sync::Arc<tokio::sync::Mutex<()>>,
    holders: usize,
}

/// A map of advisory async mutexes keyed by an arbitrary id, used to
/// serialize every mutation of one ticket while unrelated tickets proceed
/// in parallel.
///
/// Entries are reference counted: a slot is dropped from the map when its
/// last guard (held or waiting) goes away, so the map stays proportional to
/// the number of tickets under active mutation, not the number of tickets.
pub struct KeyedLocks<K: Eq + std::hash::Hash + Clone> {
    slots: std::sync::Mutex<HashMap<K, Slot>>,
}

impl<K: Eq + std::hash::Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            slots: std::sync::Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + std::hash::Hash + Clone> KeyedLocks<K> {
    ///
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, waiting behind earlier holders.
    pub async fn lock(&self, key: K) -> KeyedGuard<'_, K> {
        let mutex = {
            #[allow(clippy::expect_used)]
            let mut slots = self.slots.lock().expect("keyed lock map poisoned");
            let slot = slots.entry(key.clone()).or_insert_with(|| Slot {
                mutex: std::sync::Arc::new(tokio::sync::Mutex::new(())),
                holders: 0,
            });
            slot.holders += 1;
            std::sync::Arc::clone(&slot.mutex)
        };

        let guard = mutex.lock_owned().await;

        KeyedGuard {
            owner: self,
            key: Some(key),
            _guard: guard,
        }
    }

    /// Number of keys currently holding or waiting on a lock.
    #[must_use]
    pub fn active(&self) -> usize {
        #[allow(clippy::expect_used)]
        self.slots.lock().expect("keyed lock map poisoned").len()
    }

    fn release(&self, key: &K) {
        #[allow(clippy::expect_used)]
        let mut slots = self.slots.lock().expect("keyed lock map poisoned");
        if let Some(slot) = slots.get_mut(key) {
            slot.holders -= 1;
            if slot.holders == 0 {
                slots.remove(key);
            }
        }
    }
}

/// Guard of one key; releasing it wakes the next waiter and garbage
/// collects the slot when nobody else wants the key.
pub struct KeyedGuard<'a, K: Eq + std::hash::Hash + Clone> {
    owner: &'a KeyedLocks<K>,
    key: Option<K>,
    _guard: tokio::sync::OwnedMutexGuard<()>,
}

impl<K: Eq + std::hash::Hash + Clone> Drop for KeyedGuard<'_, K> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.owner.release(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn slot_is_collected_after_last_release() {
        let locks = KeyedLocks::new();
        {
            let _guard = locks.lock("t1").await;
            assert_eq!(locks.active(), 1);
        }
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn same_key_is_serialized() {
        let locks = std::sync::Arc::new(KeyedLocks::new());
        let hits = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let tasks = (0..8)
            .map(|_| {
                let locks = locks.clone();
                let hits = hits.clone();
                tokio::spawn(async move {
                    let _guard = locks.lock("same").await;
                    let seen = hits.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    // while the lock is held, nobody else may enter.
                    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
                    assert_eq!(
                        hits.load(std::sync::atomic::Ordering::SeqCst),
                        seen + 1
                    );
                })
            })
            .collect::<Vec<_>>();

        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 8);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn distinct_keys_run_in_parallel() {
        let locks = std::sync::Arc::new(KeyedLocks::new());
        let first = locks.lock("a").await;

        // a second key must not wait behind the first.
        let other = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            locks.lock("b"),
        )
        .await;
        assert!(other.is_ok());
        drop(first);
    }
}
