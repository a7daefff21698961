//! Bounded sensor queue between the two execution units.
//!
//! One producer (the sensor unit) and one consumer (the network unit).
//! The producer blocks while the queue is full; the consumer never blocks
//! and drains everything available into [`LatestValues`], where a newer
//! reading for a topic replaces the older one.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::debug;

use crate::sensors::MAX_SENSORS;

/// Entries the queue holds before the producer blocks.
pub const QUEUE_CAPACITY: usize = 10;
/// Bytes of text carried per reading.
pub const SENSOR_PAYLOAD_LEN: usize = 128;

/// One sensor reading in flight between the units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorQueueEntry {
    topic: u8,
    payload: heapless::String<SENSOR_PAYLOAD_LEN>,
}

impl SensorQueueEntry {
    /// Copy `text` into a fixed-size entry, truncating at a character
    /// boundary if it does not fit.
    pub fn new(topic: u8, text: &str) -> Self {
        let mut payload = heapless::String::new();
        for c in text.chars() {
            if payload.push(c).is_err() {
                debug!("Queue: reading for topic {} truncated", topic);
                break;
            }
        }
        Self { topic, payload }
    }

    pub fn topic_index(&self) -> u8 {
        self.topic
    }

    pub fn text(&self) -> &str {
        &self.payload
    }
}

pub struct SensorQueue<const N: usize = QUEUE_CAPACITY> {
    channel: Channel<CriticalSectionRawMutex, SensorQueueEntry, N>,
}

impl<const N: usize> Default for SensorQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> SensorQueue<N> {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
        }
    }

    /// Enqueue, parking the calling thread while the queue is full.
    pub fn push_blocking(&self, entry: SensorQueueEntry) {
        futures_lite::future::block_on(self.channel.send(entry));
    }

    /// Enqueue without waiting.  Gives the entry back if full.
    pub fn try_push(&self, entry: SensorQueueEntry) -> Result<(), SensorQueueEntry> {
        self.channel.try_send(entry).map_err(|e| match e {
            embassy_sync::channel::TrySendError::Full(entry) => entry,
        })
    }

    pub fn try_pop(&self) -> Option<SensorQueueEntry> {
        self.channel.try_receive().ok()
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    /// Pop until empty, keeping only the newest reading per topic.
    /// Returns how many entries were consumed.
    pub fn drain_into(&self, latest: &mut LatestValues) -> usize {
        let mut drained = 0;
        while let Some(entry) = self.try_pop() {
            latest.store(entry);
            drained += 1;
        }
        drained
    }
}

/// Newest reading per sensor topic index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LatestValues {
    slots: [Option<heapless::String<SENSOR_PAYLOAD_LEN>>; MAX_SENSORS],
}

impl LatestValues {
    pub const fn new() -> Self {
        Self {
            slots: [const { None }; MAX_SENSORS],
        }
    }

    /// Overwrite the slot for the entry's topic.  Out-of-range indices are
    /// dropped.
    pub fn store(&mut self, entry: SensorQueueEntry) {
        match self.slots.get_mut(usize::from(entry.topic)) {
            Some(slot) => *slot = Some(entry.payload),
            None => debug!("Queue: topic index {} out of range, dropped", entry.topic),
        }
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.slots.get(index)?.as_deref()
    }

    /// Every filled slot as `(topic index, text)`.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_deref().map(|text| (i, text)))
    }
}

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn fifo_order() {
        let q: SensorQueue<4> = SensorQueue::new();
        q.push_blocking(SensorQueueEntry::new(0, "a"));
        q.push_blocking(SensorQueueEntry::new(1, "b"));
        assert_eq!(q.try_pop().unwrap().text(), "a");
        assert_eq!(q.try_pop().unwrap().text(), "b");
        assert!(q.try_pop().is_none());
    }

    #[test]
    fn try_push_reports_full() {
        let q: SensorQueue<1> = SensorQueue::new();
        assert!(q.try_push(SensorQueueEntry::new(0, "a")).is_ok());
        let back = q.try_push(SensorQueueEntry::new(0, "b")).unwrap_err();
        assert_eq!(back.text(), "b");
    }

    #[test]
    fn producer_blocks_until_consumer_pops() {
        const N: usize = 3;
        let q: Arc<SensorQueue<N>> = Arc::new(SensorQueue::new());
        let pushed = Arc::new(AtomicUsize::new(0));

        let producer = {
            let q = Arc::clone(&q);
            let pushed = Arc::clone(&pushed);
            std::thread::spawn(move || {
                for i in 0..=N {
                    q.push_blocking(SensorQueueEntry::new(0, &i.to_string()));
                    pushed.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        // The producer fills the queue and then parks on the N+1th push.
        while pushed.load(Ordering::SeqCst) < N {
            std::thread::sleep(Duration::from_millis(1));
        }
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(pushed.load(Ordering::SeqCst), N);
        assert_eq!(q.len(), N);

        assert_eq!(q.try_pop().unwrap().text(), "0");
        producer.join().unwrap();
        assert_eq!(pushed.load(Ordering::SeqCst), N + 1);
        assert_eq!(q.len(), N);
    }

    #[test]
    fn drain_keeps_newest_per_topic() {
        let q: SensorQueue<8> = SensorQueue::new();
        q.push_blocking(SensorQueueEntry::new(0, "old"));
        q.push_blocking(SensorQueueEntry::new(1, "other"));
        q.push_blocking(SensorQueueEntry::new(0, "new"));

        let mut latest = LatestValues::new();
        assert_eq!(q.drain_into(&mut latest), 3);
        assert!(q.is_empty());
        assert_eq!(latest.get(0), Some("new"));
        assert_eq!(latest.get(1), Some("other"));
        assert_eq!(latest.iter().count(), 2);
    }

    #[test]
    fn oversized_text_is_truncated() {
        let long = "x".repeat(SENSOR_PAYLOAD_LEN + 10);
        let e = SensorQueueEntry::new(0, &long);
        assert_eq!(e.text().len(), SENSOR_PAYLOAD_LEN);
    }

    #[test]
    fn out_of_range_topic_is_dropped() {
        let mut latest = LatestValues::new();
        latest.store(SensorQueueEntry::new(MAX_SENSORS as u8, "x"));
        assert_eq!(latest.iter().count(), 0);
    }
}
