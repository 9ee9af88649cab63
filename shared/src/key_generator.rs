use std::collections::VecDeque;
use std::marker::PhantomData;

use crate::types::GameTime;

/// Simple implementation of a store that issues locally-unique u16-backed
/// keys, recycling freed keys after a quarantine interval.
pub struct KeyGenerator<K: From<u16> + Into<u16> + Copy> {
    recycled_local_keys: VecDeque<(GameTime, u16)>,
    recycle_after_ticks: GameTime,
    next_new_key: u16,
    phantom_k: PhantomData<K>,
}

impl<K: From<u16> + Into<u16> + Copy> KeyGenerator<K> {
    pub fn new(recycle_after_ticks: GameTime) -> Self {
        Self {
            recycled_local_keys: VecDeque::new(),
            recycle_after_ticks,
            next_new_key: 0,
            phantom_k: PhantomData,
        }
    }

    /// Gets a new, unused key
    pub fn generate(&mut self, now: GameTime) -> K {
        if let Some((released_at, _)) = self.recycled_local_keys.front() {
            if now.saturating_sub(*released_at) >= self.recycle_after_ticks {
                if let Some((_, key)) = self.recycled_local_keys.pop_front() {
                    return K::from(key);
                }
            }
        }

        let key = self.next_new_key;
        self.next_new_key = self.next_new_key.wrapping_add(1);
        K::from(key)
    }

    /// Returns a key to the pool, to be recycled once the quarantine interval
    /// has elapsed
    pub fn recycle_key(&mut self, key: K, now: GameTime) {
        self.recycled_local_keys.push_back((now, key.into()));
    }

    /// Ensures freshly generated keys never collide with keys issued by
    /// another generator, e.g. after a set of keyed items arrives in a
    /// handoff stream.
    pub fn skip_past(&mut self, key: K) {
        let raw: u16 = key.into();
        if raw >= self.next_new_key {
            self.next_new_key = raw.wrapping_add(1);
        }
    }
}
