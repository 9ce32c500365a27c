use std::collections::vec_deque;
use std::collections::VecDeque;

use crate::error::{ProviderError, Result};
use crate::model::candle::Candle;

/// Ordered candle window, ascending by `open_time`.
///
/// Mutated only at the ends: new data is appended at the back and expired
/// data is removed from the front.
#[derive(Debug, Clone, Default)]
pub struct CandleBuffer {
    inner: VecDeque<Candle>,
}

impl CandleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: VecDeque::with_capacity(capacity),
        }
    }

    /// Append at the back. The caller keeps `open_time` non-decreasing.
    pub fn push_back(&mut self, candle: Candle) {
        debug_assert!(
            self.inner
                .back()
                .map_or(true, |last| last.open_time <= candle.open_time),
            "candle appended out of order"
        );
        self.inner.push_back(candle);
    }

    /// Remove and return the oldest candle.
    pub fn pop_front(&mut self) -> Result<Candle> {
        self.inner.pop_front().ok_or(ProviderError::EmptyBuffer)
    }

    pub fn front(&self) -> Result<&Candle> {
        self.inner.front().ok_or(ProviderError::EmptyBuffer)
    }

    pub fn back(&self) -> Result<&Candle> {
        self.inner.back().ok_or(ProviderError::EmptyBuffer)
    }

    /// Zero-based access from the oldest candle.
    pub fn at(&self, position: usize) -> Result<&Candle> {
        self.inner
            .get(position)
            .ok_or(ProviderError::IndexOutOfRange {
                position,
                len: self.inner.len(),
            })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> vec_deque::Iter<'_, Candle> {
        self.inner.iter()
    }

    /// Copy the whole window into a `Vec`, oldest first.
    ///
    /// O(len). Meant for diagnostics and export, not for per-tick reads.
    pub fn to_vec(&self) -> Vec<Candle> {
        self.inner.iter().cloned().collect()
    }

    /// Drop every candle whose `open_time` is strictly before `since`.
    /// Returns how many were removed. An empty buffer removes nothing.
    pub fn evict_before(&mut self, since: i64) -> usize {
        let mut evicted = 0;
        while self
            .inner
            .front()
            .is_some_and(|oldest| oldest.open_time < since)
        {
            self.inner.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// Append a fetched chunk, skipping any candle that does not move the
    /// back strictly forward. Returns `(appended, skipped)`.
    pub fn extend_ordered<I>(&mut self, candles: I) -> (usize, usize)
    where
        I: IntoIterator<Item = Candle>,
    {
        let mut appended = 0;
        let mut skipped = 0;
        for candle in candles {
            let advances = self
                .inner
                .back()
                .map_or(true, |last| candle.open_time > last.open_time);
            if advances {
                self.inner.push_back(candle);
                appended += 1;
            } else {
                skipped += 1;
            }
        }
        (appended, skipped)
    }
}

impl<'a> IntoIterator for &'a CandleBuffer {
    type Item = &'a Candle;
    type IntoIter = vec_deque::Iter<'a, Candle>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
