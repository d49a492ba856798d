// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Fan-out of decoded frames to independently paced consumers.
//!
//! Every consumer owns a bounded queue.  Publishing never blocks: when a
//! consumer's queue is full its oldest queued frame is dropped and the
//! consumer's drop counter incremented, other consumers are unaffected.
//! Queue order is arrival order, so drops only create gaps.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, Weak,
    },
    time::{Duration, SystemTime},
};

use serde::Serialize;
use tokio::{
    sync::watch,
    time::{sleep_until, Instant},
};
use tracing::{debug, info, trace};

use crate::{
    common::{lock, stopped},
    error::ValidationError,
    frame::Frame,
};

/// Default per consumer queue depth.
pub const DEFAULT_QUEUE_DEPTH: usize = 16;

/// One item of a consumer's stream.
#[derive(Debug, Clone)]
pub enum Delivery {
    /// A decoded frame, shared between consumers
    Frame(Arc<Frame>),
    /// The producer stopped.  Later frames belong to a new run.
    EndOfStream,
}

struct Consumer {
    id: String,
    tx: kanal::Sender<Delivery>,
    // kept to drop the oldest entry when the queue is full
    rx: kanal::Receiver<Delivery>,
    delivered: AtomicU64,
    drops: AtomicU64,
}

impl Consumer {
    /// Queues `item`, evicting the oldest entries while the queue is full.
    /// Returns false if the queue is closed.
    fn offer(&self, item: Delivery) -> bool {
        loop {
            match self.tx.try_send(item.clone()) {
                Ok(true) => {
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
                Ok(false) => match self.rx.try_recv() {
                    Ok(Some(_)) => {
                        self.drops.fetch_add(1, Ordering::Relaxed);
                        trace!("consumer {} full, dropped oldest", self.id);
                    }
                    Ok(None) => {}
                    Err(_) => return false,
                },
                Err(_) => return false,
            }
        }
    }

    /// Closes the queue.  The subscription reads end of stream from then on.
    fn close(&self) {
        let _ = self.tx.close();
    }
}

/// Removes the consumers matching `remove` from the registry and closes
/// their queues.
fn remove_consumers(
    consumers: &mut Vec<Arc<Consumer>>,
    remove: impl Fn(&Consumer) -> bool,
) -> usize {
    let before = consumers.len();
    consumers.retain(|c| {
        if remove(c) {
            c.close();
            false
        } else {
            true
        }
    });
    before - consumers.len()
}

struct Inner {
    consumers: Mutex<Vec<Arc<Consumer>>>,
    depth: usize,
    published: AtomicU64,
}

/// Counters for one consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    /// Consumer id
    pub id: String,
    /// Items queued for the consumer
    pub delivered: u64,
    /// Items dropped from the consumer's full queue
    pub drops: u64,
    /// Items waiting in the queue
    pub queued: usize,
}

/// Distributor counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DistributorStats {
    /// Frames published
    pub published: u64,
    /// Per consumer counters
    pub consumers: Vec<ConsumerStats>,
}

/// Replay pacing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RatePolicy {
    /// Recorded gaps divided by `time_scale`, 2.0 plays twice as fast.
    Original {
        /// Speed up factor
        time_scale: f64,
    },
    /// A fixed frame rate.
    Fixed {
        /// Frames per second
        hz: f64,
    },
    /// As fast as consumers are offered frames.
    Unthrottled,
}

impl Default for RatePolicy {
    fn default() -> Self {
        RatePolicy::Original { time_scale: 1.0 }
    }
}

/// Replay settings.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReplayOptions {
    /// Pacing policy
    pub rate: RatePolicy,
    /// Restart from the first frame after the last one until stopped
    pub loop_forever: bool,
    /// Gap used by `Original` pacing when the capture has no recorded time
    /// span, usually the profile frame period
    pub frame_period: Option<Duration>,
}

/// Fan-out point for decoded frames.  Cheap to clone, clones share the
/// consumer registry.
#[derive(Clone)]
pub struct FrameDistributor {
    inner: Arc<Inner>,
}

impl Default for FrameDistributor {
    fn default() -> Self {
        FrameDistributor::new(DEFAULT_QUEUE_DEPTH)
    }
}

impl std::fmt::Debug for FrameDistributor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameDistributor")
            .field("depth", &self.inner.depth)
            .field("stats", &self.stats())
            .finish()
    }
}

impl FrameDistributor {
    /// Creates a distributor whose consumers queue at most `depth` items.
    pub fn new(depth: usize) -> Self {
        FrameDistributor {
            inner: Arc::new(Inner {
                consumers: Mutex::new(Vec::new()),
                depth: depth.max(1),
                published: AtomicU64::new(0),
            }),
        }
    }

    /// Registers a consumer.  An existing consumer with the same id is
    /// replaced and its subscription reads end of stream.
    pub fn subscribe(&self, id: impl Into<String>) -> Subscription {
        let id = id.into();
        let (tx, rx) = kanal::bounded(self.inner.depth);
        let consumer = Arc::new(Consumer {
            id: id.clone(),
            tx,
            rx: rx.clone(),
            delivered: AtomicU64::new(0),
            drops: AtomicU64::new(0),
        });

        let mut consumers = lock(&self.inner.consumers);
        remove_consumers(&mut consumers, |c| c.id == id);
        consumers.push(consumer.clone());
        debug!("consumer {} subscribed", id);

        Subscription {
            rx,
            consumer,
            distributor: Arc::downgrade(&self.inner),
        }
    }

    /// Removes a consumer, its subscription reads end of stream.  Returns
    /// false if no consumer had the id.
    pub fn unsubscribe(&self, id: &str) -> bool {
        let removed = remove_consumers(&mut lock(&self.inner.consumers), |c| c.id == id) > 0;
        if removed {
            debug!("consumer {} unsubscribed", id);
        }
        removed
    }

    /// Offers a frame to every consumer.  Never blocks.
    pub fn publish(&self, frame: Frame) {
        self.publish_shared(Arc::new(frame));
    }

    /// Offers an already shared frame to every consumer.
    pub fn publish_shared(&self, frame: Arc<Frame>) {
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        self.offer_all(Delivery::Frame(frame));
    }

    /// Signals end of stream to every consumer.
    pub fn end_of_stream(&self) {
        debug!("end of stream");
        self.offer_all(Delivery::EndOfStream);
    }

    fn offer_all(&self, item: Delivery) {
        // the registry lock is held for the whole fan-out so a consumer is
        // either offered the item or was never registered for it
        let mut consumers = lock(&self.inner.consumers);
        consumers.retain(|c| c.offer(item.clone()));
    }

    /// Number of registered consumers.
    pub fn consumer_count(&self) -> usize {
        lock(&self.inner.consumers).len()
    }

    /// Published frames and per consumer counters.
    pub fn stats(&self) -> DistributorStats {
        let consumers = lock(&self.inner.consumers)
            .iter()
            .map(|c| ConsumerStats {
                id: c.id.clone(),
                delivered: c.delivered.load(Ordering::Relaxed),
                drops: c.drops.load(Ordering::Relaxed),
                queued: c.rx.len(),
            })
            .collect();
        DistributorStats {
            published: self.inner.published.load(Ordering::Relaxed),
            consumers,
        }
    }

    /// Republishes recorded frames through [`FrameDistributor::publish`].
    ///
    /// Frames are restamped with the current time.  When looping, sequence
    /// numbers of later passes are offset so they keep increasing.  End of
    /// stream is signalled when the frames run out or `stop` becomes true.
    ///
    /// # Returns
    ///
    /// The number of frames published.
    ///
    /// # Errors
    ///
    /// A non-positive `time_scale` or `hz`, or looping a capture without
    /// recorded time span under `Original` pacing and no `frame_period`.
    pub async fn replay(
        &self,
        frames: &[Frame],
        options: ReplayOptions,
        mut stop: watch::Receiver<bool>,
    ) -> Result<u64, ValidationError> {
        match options.rate {
            RatePolicy::Original { time_scale } if !(time_scale > 0.0) => {
                return Err(ValidationError::new(
                    "time_scale",
                    format!("{time_scale} must be positive"),
                ))
            }
            RatePolicy::Fixed { hz } if !(hz > 0.0) => {
                return Err(ValidationError::new("hz", format!("{hz} must be positive")))
            }
            _ => {}
        }

        let (Some(first), Some(last)) = (frames.first(), frames.last()) else {
            self.end_of_stream();
            return Ok(0);
        };
        let seq_span = last
            .sequence_number
            .wrapping_sub(first.sequence_number)
            .wrapping_add(1);
        let recorded = last
            .timestamp
            .duration_since(first.timestamp)
            .unwrap_or_default();
        // a single frame or one shared timestamp leaves nothing to pace by
        let fallback = match options.rate {
            RatePolicy::Original { .. } if recorded.is_zero() => {
                match options.frame_period.filter(|p| !p.is_zero()) {
                    Some(period) => Some(period),
                    None if options.loop_forever => {
                        return Err(ValidationError::new(
                            "frame_period",
                            "looping a capture without recorded time span needs a frame period",
                        ))
                    }
                    None => None,
                }
            }
            _ => None,
        };
        let loop_gap = if frames.len() > 1 {
            recorded / (frames.len() as u32 - 1)
        } else {
            Duration::ZERO
        };
        info!(
            "replaying {} frames, {:?}, loop={}",
            frames.len(),
            options.rate,
            options.loop_forever
        );

        let mut published = 0;
        let mut pass: u32 = 0;
        let mut deadline = Instant::now();
        'replay: loop {
            let mut previous: Option<SystemTime> = None;
            for frame in frames {
                if published > 0 {
                    let recorded_gap = match (fallback, previous) {
                        (Some(period), _) => period,
                        (None, Some(prev)) => frame.timestamp.duration_since(prev).unwrap_or_default(),
                        (None, None) => loop_gap,
                    };
                    let gap = match options.rate {
                        RatePolicy::Original { time_scale } => recorded_gap.div_f64(time_scale),
                        RatePolicy::Fixed { hz } => Duration::from_secs_f64(1.0 / hz),
                        RatePolicy::Unthrottled => Duration::ZERO,
                    };
                    deadline += gap;
                    if gap.is_zero() {
                        tokio::task::yield_now().await;
                    } else {
                        tokio::select! {
                            _ = sleep_until(deadline) => {}
                            _ = stopped(&mut stop) => break 'replay,
                        }
                    }
                }
                if *stop.borrow() {
                    break 'replay;
                }
                previous = Some(frame.timestamp);

                let mut out = frame.clone();
                out.timestamp = SystemTime::now();
                out.sequence_number = frame
                    .sequence_number
                    .wrapping_add(seq_span.wrapping_mul(pass));
                self.publish(out);
                published += 1;
            }
            if !options.loop_forever {
                break;
            }
            pass = pass.wrapping_add(1);
        }

        debug!("replay published {} frames", published);
        self.end_of_stream();
        Ok(published)
    }
}

/// A consumer's end of the distributor.  Dropping it unsubscribes.
pub struct Subscription {
    rx: kanal::Receiver<Delivery>,
    consumer: Arc<Consumer>,
    distributor: Weak<Inner>,
}

impl Subscription {
    /// Consumer id.
    pub fn id(&self) -> &str {
        &self.consumer.id
    }

    /// Waits for the next item.  A closed queue reads as end of stream.
    pub async fn recv(&self) -> Delivery {
        self.rx
            .as_async()
            .recv()
            .await
            .unwrap_or(Delivery::EndOfStream)
    }

    /// Blocking form of [`Subscription::recv`] for consumer threads.
    pub fn recv_blocking(&self) -> Delivery {
        self.rx.recv().unwrap_or(Delivery::EndOfStream)
    }

    /// Returns a queued item without waiting.
    pub fn try_recv(&self) -> Option<Delivery> {
        self.rx.try_recv().ok().flatten()
    }

    /// Frames dropped from this consumer's queue.
    pub fn drops(&self) -> u64 {
        self.consumer.drops.load(Ordering::Relaxed)
    }

    /// Items queued for this consumer.
    pub fn delivered(&self) -> u64 {
        self.consumer.delivered.load(Ordering::Relaxed)
    }
}

/// Blocking iteration over frames up to the next end of stream.
impl Iterator for Subscription {
    type Item = Arc<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.recv_blocking() {
            Delivery::Frame(frame) => Some(frame),
            Delivery::EndOfStream => None,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.distributor.upgrade() {
            lock(&inner.consumers).retain(|c| !Arc::ptr_eq(c, &self.consumer));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    fn frame(seq: u32) -> Frame {
        Frame::new(seq, UNIX_EPOCH + Duration::from_millis(u64::from(seq) * 100))
    }

    fn sequence(delivery: Delivery) -> Option<u32> {
        match delivery {
            Delivery::Frame(frame) => Some(frame.sequence_number),
            Delivery::EndOfStream => None,
        }
    }

    #[test]
    fn test_slow_and_fast_consumer() {
        let distributor = FrameDistributor::new(4);
        let fast = distributor.subscribe("fast");
        let slow = distributor.subscribe("slow");

        let mut received = Vec::new();
        for seq in 1..=20 {
            distributor.publish(frame(seq));
            while let Some(delivery) = fast.try_recv() {
                received.extend(sequence(delivery));
            }
        }
        assert_eq!(received, (1..=20).collect::<Vec<_>>());
        assert_eq!(fast.drops(), 0);

        // the slow consumer keeps the newest frames, in order
        assert_eq!(slow.drops(), 16);
        let backlog: Vec<_> = std::iter::from_fn(|| slow.try_recv())
            .filter_map(sequence)
            .collect();
        assert_eq!(backlog, vec![17, 18, 19, 20]);

        let stats = distributor.stats();
        assert_eq!(stats.published, 20);
        assert_eq!(stats.consumers.len(), 2);
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let distributor = FrameDistributor::default();
        let first = distributor.subscribe("gui");
        let second = distributor.subscribe("gui");
        assert_eq!(distributor.consumer_count(), 1);

        distributor.publish(frame(1));
        assert!(first.try_recv().is_none());
        assert_eq!(second.try_recv().and_then(sequence), Some(1));

        // dropping the replaced subscription leaves the new one registered
        drop(first);
        assert_eq!(distributor.consumer_count(), 1);
        drop(second);
        assert_eq!(distributor.consumer_count(), 0);

        let _rec = distributor.subscribe("recorder");
        assert!(distributor.unsubscribe("recorder"));
        assert!(!distributor.unsubscribe("recorder"));
    }

    #[test]
    fn test_end_of_stream() {
        let distributor = FrameDistributor::new(2);
        let mut sub = distributor.subscribe("iter");
        distributor.publish(frame(1));
        distributor.publish(frame(2));
        // a full queue still gets the end of stream marker
        distributor.end_of_stream();
        let frames: Vec<u32> = sub.by_ref().map(|f| f.sequence_number).collect();
        assert_eq!(frames, vec![2]);
        assert_eq!(sub.drops(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_time_scale() {
        let distributor = FrameDistributor::new(32);
        let sub = distributor.subscribe("timing");
        let frames: Vec<Frame> = (1..=10).map(frame).collect();
        let (_stop_tx, stop_rx) = watch::channel(false);

        let replay = {
            let distributor = distributor.clone();
            tokio::spawn(async move {
                let options = ReplayOptions {
                    rate: RatePolicy::Original { time_scale: 2.0 },
                    loop_forever: false,
                    frame_period: None,
                };
                distributor.replay(&frames, options, stop_rx).await
            })
        };

        let mut arrivals = Vec::new();
        let mut sequences = Vec::new();
        while let Delivery::Frame(frame) = sub.recv().await {
            arrivals.push(Instant::now());
            sequences.push(frame.sequence_number);
        }
        assert_eq!(replay.await.unwrap().unwrap(), 10);
        assert_eq!(sequences, (1..=10).collect::<Vec<_>>());
        for pair in arrivals.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(
                gap >= Duration::from_millis(45) && gap <= Duration::from_millis(55),
                "gap {gap:?}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_loop_and_stop() {
        let distributor = FrameDistributor::new(64);
        let sub = distributor.subscribe("loop");
        let frames: Vec<Frame> = (1..=3).map(frame).collect();
        let (stop_tx, stop_rx) = watch::channel(false);

        let replay = {
            let distributor = distributor.clone();
            tokio::spawn(async move {
                let options = ReplayOptions {
                    rate: RatePolicy::Fixed { hz: 10.0 },
                    loop_forever: true,
                    frame_period: None,
                };
                distributor.replay(&frames, options, stop_rx).await
            })
        };

        let mut sequences = Vec::new();
        while sequences.len() < 7 {
            if let Some(seq) = sequence(sub.recv().await) {
                sequences.push(seq);
            }
        }
        stop_tx.send(true).unwrap();
        let published = replay.await.unwrap().unwrap();
        assert!(published >= 7);
        assert_eq!(&sequences[..7], &[1, 2, 3, 4, 5, 6, 7]);

        // drain to the end of stream marker
        while let Delivery::Frame(_) = sub.recv().await {}
    }

    #[tokio::test]
    async fn test_replay_rejects_bad_rate() {
        let distributor = FrameDistributor::default();
        let (_tx, rx) = watch::channel(false);
        let options = ReplayOptions {
            rate: RatePolicy::Fixed { hz: 0.0 },
            loop_forever: false,
            frame_period: None,
        };
        assert!(distributor.replay(&[frame(1)], options, rx).await.is_err());
    }

    #[tokio::test]
    async fn test_removed_consumer_ends() {
        let distributor = FrameDistributor::default();
        let replaced = distributor.subscribe("gui");
        let _current = distributor.subscribe("gui");
        let delivery = tokio::time::timeout(Duration::from_millis(300), replaced.recv())
            .await
            .unwrap();
        assert!(matches!(delivery, Delivery::EndOfStream));

        let publisher = distributor.subscribe("pub");
        assert!(distributor.unsubscribe("pub"));
        distributor.publish(frame(1));
        let delivery = tokio::time::timeout(Duration::from_millis(300), publisher.recv())
            .await
            .unwrap();
        assert!(matches!(delivery, Delivery::EndOfStream));
        assert_eq!(publisher.delivered(), 0);

        let mut iter = distributor.subscribe("iter");
        distributor.unsubscribe("iter");
        assert!(iter.next().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_without_time_span() {
        let distributor = FrameDistributor::new(64);
        let single = [frame(1)];
        let (_tx, rx) = watch::channel(false);

        let looping = ReplayOptions {
            rate: RatePolicy::Original { time_scale: 1.0 },
            loop_forever: true,
            frame_period: None,
        };
        let err = distributor.replay(&single, looping, rx.clone()).await.unwrap_err();
        assert_eq!(err.field, "frame_period");

        // the frame period paces a capture that cannot pace itself
        let sub = distributor.subscribe("period");
        let (stop_tx, stop_rx) = watch::channel(false);
        let replay = {
            let distributor = distributor.clone();
            tokio::spawn(async move {
                let options = ReplayOptions {
                    frame_period: Some(Duration::from_millis(100)),
                    ..looping
                };
                distributor.replay(&single, options, stop_rx).await
            })
        };
        let mut arrivals = Vec::new();
        while arrivals.len() < 4 {
            if let Delivery::Frame(_) = sub.recv().await {
                arrivals.push(Instant::now());
            }
        }
        stop_tx.send(true).unwrap();
        assert!(replay.await.unwrap().unwrap() >= 4);
        for pair in arrivals.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_millis(100));
        }
    }
}
