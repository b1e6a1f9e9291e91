//! deal synchronizer - replays the deal as 52 timed card arrivals
//!
//! nothing moves until every pile destination is known. measurement gets one
//! retry; after that the deal is abandoned.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::card::{Rank, CARDS_PER_PILE, DEAL_ORDER};
use crate::config::Timings;
use crate::error::{PatienceError, Result};
use crate::event::{DealStep, Event, EventSink, Point};
use crate::signal::CancelFlag;

/// rendered board geometry, owned by the front end
pub trait PileLayout: Send + Sync {
    /// centre of every pile relative to the board centre, `None` while the
    /// board is not laid out yet
    fn measure_pile_destinations(&self) -> Option<HashMap<Rank, Point>>;
}

impl<F> PileLayout for F
where
    F: Fn() -> Option<HashMap<Rank, Point>> + Send + Sync,
{
    fn measure_pile_destinations(&self) -> Option<HashMap<Rank, Point>> {
        self()
    }
}

/// static clock face: ace at one o'clock through queen at twelve, kings in the middle
#[derive(Clone, Copy, Debug)]
pub struct FixedLayout {
    radius: f32,
}

impl FixedLayout {
    pub fn clock(radius: f32) -> Self {
        Self { radius }
    }

    pub fn position(&self, rank: Rank) -> Point {
        if rank == Rank::King {
            return Point::new(0.0, 0.0);
        }
        let hour = (rank.index() + 1) as f32;
        let angle = hour * std::f32::consts::PI / 6.0;
        Point::new(self.radius * angle.sin(), -self.radius * angle.cos())
    }
}

impl Default for FixedLayout {
    fn default() -> Self {
        Self::clock(240.0)
    }
}

impl PileLayout for FixedLayout {
    fn measure_pile_destinations(&self) -> Option<HashMap<Rank, Point>> {
        Some(Rank::ALL.iter().map(|r| (*r, self.position(*r))).collect())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DealRun {
    /// all 52 arrivals played and the settle delay elapsed
    Completed,
    /// another deal was already running
    Ignored,
}

#[derive(Clone)]
pub struct DealSynchronizer {
    layout: Arc<dyn PileLayout>,
    events: EventSink,
    timings: Timings,
    in_progress: Arc<AtomicBool>,
}

struct InProgress(Arc<AtomicBool>);

impl Drop for InProgress {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl DealSynchronizer {
    pub fn new(layout: Arc<dyn PileLayout>, events: EventSink, timings: Timings) -> Self {
        Self {
            layout,
            events,
            timings,
            in_progress: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_dealing(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// play the deal; `DealComplete` is emitted once, and only on `Completed`
    pub async fn run_deal(&self, cancel: &CancelFlag) -> Result<DealRun> {
        if self.in_progress.swap(true, Ordering::SeqCst) {
            debug!("deal: already in progress, ignoring");
            return Ok(DealRun::Ignored);
        }
        let _guard = InProgress(Arc::clone(&self.in_progress));

        let destinations = self.measure(cancel).await?;
        self.events.emit(Event::DealStarted);
        info!("deal: 52 cards to 13 piles");

        let mut index = 0;
        for pile in DEAL_ORDER {
            let destination = destinations
                .get(&pile)
                .copied()
                .ok_or(PatienceError::LayoutUnavailable)?;
            for card_in_pile in 0..CARDS_PER_PILE {
                if cancel.is_cancelled() {
                    return Err(PatienceError::Cancelled);
                }
                self.events.emit(Event::CardDealt(DealStep {
                    index,
                    pile,
                    card_in_pile,
                    destination,
                }));
                index += 1;

                let pause = if card_in_pile + 1 == CARDS_PER_PILE {
                    self.timings.deal_pile_pause_ms
                } else {
                    self.timings.deal_card_interval_ms
                };
                if !cancel.sleep(Timings::ms(pause)).await {
                    return Err(PatienceError::Cancelled);
                }
            }
        }

        if !cancel.sleep(Timings::ms(self.timings.deal_settle_ms)).await {
            return Err(PatienceError::Cancelled);
        }
        self.events.emit(Event::DealComplete);
        info!("deal: complete");
        Ok(DealRun::Completed)
    }

    async fn measure(&self, cancel: &CancelFlag) -> Result<HashMap<Rank, Point>> {
        let delays = [
            self.timings.deal_measure_delay_ms,
            self.timings.deal_retry_delay_ms,
        ];
        for (attempt, delay) in delays.into_iter().enumerate() {
            if !cancel.sleep(Timings::ms(delay)).await {
                return Err(PatienceError::Cancelled);
            }
            match self.layout.measure_pile_destinations() {
                Some(found) if Rank::ALL.iter().all(|r| found.contains_key(r)) => return Ok(found),
                Some(found) => debug!("deal: {}/13 piles measured on attempt {}", found.len(), attempt + 1),
                None => debug!("deal: layout not ready on attempt {}", attempt + 1),
            }
        }
        error!("deal: pile destinations could not be resolved, abandoning deal");
        Err(PatienceError::LayoutUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn drain(rx: &mut UnboundedReceiver<Event>) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    fn synchronizer(layout: Arc<dyn PileLayout>) -> (DealSynchronizer, UnboundedReceiver<Event>) {
        let (events, rx) = EventSink::channel();
        (DealSynchronizer::new(layout, events, Timings::default()), rx)
    }

    #[test]
    fn test_clock_layout_positions() {
        let layout = FixedLayout::clock(100.0);
        assert_eq!(layout.position(Rank::King), Point::new(0.0, 0.0));

        let queen = layout.position(Rank::Queen);
        assert!(queen.x.abs() < 1e-3);
        assert!((queen.y + 100.0).abs() < 1e-3);

        let three = layout.position(Rank::Three);
        assert!((three.x - 100.0).abs() < 1e-3);
        assert_eq!(layout.measure_pile_destinations().unwrap().len(), 13);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deal_emits_52_arrivals_then_completes_once() {
        let (deal, mut rx) = synchronizer(Arc::new(FixedLayout::default()));

        let started = tokio::time::Instant::now();
        assert_eq!(deal.run_deal(&CancelFlag::new()).await.unwrap(), DealRun::Completed);
        assert!(!deal.is_dealing());

        // 13 * (3 * 700 + 1200) + 2500 settle + 500 measure
        assert_eq!(started.elapsed(), Duration::from_millis(13 * 3300 + 2500 + 500));

        let events = drain(&mut rx);
        let steps: Vec<DealStep> = events
            .iter()
            .filter_map(|e| match e {
                Event::CardDealt(step) => Some(*step),
                _ => None,
            })
            .collect();
        assert_eq!(steps.len(), 52);
        assert!(steps[..4].iter().all(|s| s.pile == Rank::Ace));
        assert!(steps[48..].iter().all(|s| s.pile == Rank::King));
        assert_eq!(steps[5].card_in_pile, 1);
        assert_eq!(events.first(), Some(&Event::DealStarted));
        assert_eq!(events.last(), Some(&Event::DealComplete));
        assert_eq!(events.iter().filter(|e| **e == Event::DealComplete).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deal_retries_measurement_once() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let layout = move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                None
            } else {
                FixedLayout::default().measure_pile_destinations()
            }
        };
        let (deal, _rx) = synchronizer(Arc::new(layout));

        assert_eq!(deal.run_deal(&CancelFlag::new()).await.unwrap(), DealRun::Completed);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deal_abandoned_without_layout() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let layout = move || {
            counter.fetch_add(1, Ordering::SeqCst);
            None
        };
        let (deal, mut rx) = synchronizer(Arc::new(layout));

        assert_eq!(
            deal.run_deal(&CancelFlag::new()).await,
            Err(PatienceError::LayoutUnavailable)
        );
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        // no motion was scheduled
        assert!(drain(&mut rx).is_empty());
        assert!(!deal.is_dealing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reentrant_deal_is_ignored() {
        let (deal, mut rx) = synchronizer(Arc::new(FixedLayout::default()));

        let first = deal.clone();
        let handle = tokio::spawn(async move { first.run_deal(&CancelFlag::new()).await });
        tokio::task::yield_now().await;
        assert!(deal.is_dealing());

        assert_eq!(deal.run_deal(&CancelFlag::new()).await.unwrap(), DealRun::Ignored);
        assert_eq!(handle.await.unwrap().unwrap(), DealRun::Completed);

        let complete = drain(&mut rx)
            .into_iter()
            .filter(|e| *e == Event::DealComplete)
            .count();
        assert_eq!(complete, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_deal_never_completes() {
        let (deal, mut rx) = synchronizer(Arc::new(FixedLayout::default()));
        let cancel = CancelFlag::new();

        let runner = deal.clone();
        let flag = cancel.clone();
        let handle = tokio::spawn(async move { runner.run_deal(&flag).await });
        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();

        assert_eq!(handle.await.unwrap(), Err(PatienceError::Cancelled));
        assert!(!drain(&mut rx).contains(&Event::DealComplete));
        assert!(!deal.is_dealing());
    }
}
