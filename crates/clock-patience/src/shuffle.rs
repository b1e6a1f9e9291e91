//! shuffle presentation pipeline - replays one shuffle as a five phase animation
//!
//! fanSpread -> closing -> cutting -> shuffling -> finalFan -> idle
//!
//! the request runs concurrently with the phases. the shuffled ordering is
//! shown from `shuffling` on, or as soon as the response lands if it is late,
//! and `finalFan` never leaves for `idle` before the response exists.

use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::card::{Deck, DECK_SIZE};
use crate::config::{batch_cut_point, GameMode, Timings};
use crate::error::{PatienceError, Result};
use crate::event::{Cue, Event, EventSink, NoticeLevel};
use crate::mirror::SharedMirror;
use crate::service::{GameService, ShuffleResult};
use crate::signal::{completion_gate, CancelFlag, Channel, PendingOps};

/// largest batch accepted by `run_batch`
pub const MAX_BATCH: usize = 10;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ShufflePhase {
    #[default]
    Idle,
    FanSpread,
    Closing,
    Cutting,
    Shuffling,
    FinalFan,
}

impl ShufflePhase {
    pub fn next(self) -> ShufflePhase {
        match self {
            ShufflePhase::Idle => ShufflePhase::Idle,
            ShufflePhase::FanSpread => ShufflePhase::Closing,
            ShufflePhase::Closing => ShufflePhase::Cutting,
            ShufflePhase::Cutting => ShufflePhase::Shuffling,
            ShufflePhase::Shuffling => ShufflePhase::FinalFan,
            ShufflePhase::FinalFan => ShufflePhase::Idle,
        }
    }

    /// how long the phase stays on screen when timers drive it
    pub fn dwell(self, timings: &Timings) -> Duration {
        Timings::ms(match self {
            ShufflePhase::Idle => 0,
            ShufflePhase::FanSpread => timings.fan_spread_ms,
            ShufflePhase::Closing => timings.closing_ms,
            ShufflePhase::Cutting => timings.cutting_ms,
            ShufflePhase::Shuffling => timings.shuffling_ms,
            ShufflePhase::FinalFan => timings.final_fan_ms,
        })
    }

    /// phases that show the shuffled ordering once it is known
    pub fn shows_result(self) -> bool {
        matches!(self, ShufflePhase::Shuffling | ShufflePhase::FinalFan)
    }

    pub fn name(self) -> &'static str {
        match self {
            ShufflePhase::Idle => "idle",
            ShufflePhase::FanSpread => "fanSpread",
            ShufflePhase::Closing => "closing",
            ShufflePhase::Cutting => "cutting",
            ShufflePhase::Shuffling => "shuffling",
            ShufflePhase::FinalFan => "finalFan",
        }
    }
}

impl fmt::Display for ShufflePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// result of one transition
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhaseChange {
    pub phase: ShufflePhase,
    /// the shuffled ordering replaced the displayed one
    pub adopted: bool,
}

/// presentation of a single shuffle
///
/// manual and timed runs drive the same transition function, only the
/// trigger differs.
#[derive(Clone, Debug, PartialEq)]
pub struct ShuffleRun {
    phase: ShufflePhase,
    cut_point: u8,
    before: Deck,
    after: Option<Deck>,
    displayed: Deck,
}

impl ShuffleRun {
    pub fn new(cut_point: u8, before: Deck) -> Self {
        Self {
            phase: ShufflePhase::FanSpread,
            cut_point,
            displayed: before.clone(),
            before,
            after: None,
        }
    }

    pub fn phase(&self) -> ShufflePhase {
        self.phase
    }

    pub fn cut_point(&self) -> u8 {
        self.cut_point
    }

    pub fn before(&self) -> &Deck {
        &self.before
    }

    pub fn after(&self) -> Option<&Deck> {
        self.after.as_ref()
    }

    pub fn displayed(&self) -> &Deck {
        &self.displayed
    }

    /// final fan is held until the response is in
    pub fn awaiting_result(&self) -> bool {
        self.phase == ShufflePhase::FinalFan && self.after.is_none()
    }

    /// move to the next phase; `None` when idle or held
    pub fn advance(&mut self) -> Option<PhaseChange> {
        if self.phase == ShufflePhase::Idle || self.awaiting_result() {
            return None;
        }
        self.phase = self.phase.next();
        Some(PhaseChange {
            phase: self.phase,
            adopted: self.show_result(),
        })
    }

    /// record the response; returns true when the displayed ordering changed
    pub fn adopt(&mut self, after: Deck) -> bool {
        self.after = Some(after);
        self.show_result()
    }

    fn show_result(&mut self) -> bool {
        if !self.phase.shows_result() {
            return false;
        }
        match &self.after {
            Some(after) if *after != self.displayed => {
                self.displayed = after.clone();
                true
            }
            _ => false,
        }
    }
}

/// one shuffle to present
#[derive(Clone, Debug)]
pub struct ShuffleJob {
    pub session_id: String,
    pub cut_point: u8,
    /// ordering the animation starts from
    pub before: Deck,
    /// 1-based step and total inside a batch
    pub step: Option<(usize, usize)>,
    pub mode: GameMode,
}

/// what a finished run settled on
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShuffleOutcome {
    pub session_id: String,
    pub shuffle_count: u32,
    pub cut_point: u8,
    pub deck_before: Deck,
    pub deck_after: Deck,
}

#[derive(Clone)]
pub struct ShufflePipeline {
    inner: Arc<PipelineInner>,
}

struct PipelineInner {
    service: Arc<dyn GameService>,
    mirror: SharedMirror,
    pending: PendingOps,
    events: EventSink,
    timings: Timings,
    /// trigger of the manual run currently waiting for the user
    advance: Mutex<Option<Arc<Notify>>>,
}

/// closes the manual trigger when a run ends on any path
struct ManualTrigger<'a>(&'a Mutex<Option<Arc<Notify>>>);

impl Drop for ManualTrigger<'_> {
    fn drop(&mut self) {
        *self.0.lock() = None;
    }
}

impl ShufflePipeline {
    pub fn new(
        service: Arc<dyn GameService>,
        mirror: SharedMirror,
        pending: PendingOps,
        events: EventSink,
        timings: Timings,
    ) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                service,
                mirror,
                pending,
                events,
                timings,
                advance: Mutex::new(None),
            }),
        }
    }

    /// user asked for the next phase; false unless a manual run is waiting
    /// on the user
    pub fn advance(&self) -> bool {
        match self.inner.advance.lock().as_ref() {
            Some(trigger) => {
                trigger.notify_one();
                true
            }
            None => false,
        }
    }

    /// issue one shuffle and present it until the phases are back to idle
    pub async fn run(&self, job: ShuffleJob, cancel: &CancelFlag) -> Result<ShuffleOutcome> {
        if !(1..DECK_SIZE).contains(&(job.cut_point as usize)) {
            let e = PatienceError::InvalidArgument(format!(
                "cut point must be 1-51, got {}",
                job.cut_point
            ));
            self.inner.events.notice(NoticeLevel::Warning, e.to_string());
            return Err(e);
        }
        let _token = self.inner.pending.begin(Channel::Shuffle)?;
        info!(
            "shuffle: session={} cut={} step={:?} mode={:?}",
            job.session_id, job.cut_point, job.step, job.mode
        );

        let mut run = ShuffleRun::new(job.cut_point, job.before.clone());
        self.publish(&job, &run);
        self.inner.events.emit(Event::DisplayedDeck(run.displayed().clone()));

        let mut request = self.inner.service.shuffle(&job.session_id, job.cut_point);
        let mut result: Option<ShuffleResult> = None;
        let mut deadline = Instant::now() + run.phase().dwell(&self.inner.timings);
        let manual = Arc::new(Notify::new());
        let _trigger = ManualTrigger(&self.inner.advance);

        loop {
            let trigger_open = !run.awaiting_result();
            *self.inner.advance.lock() = (job.mode == GameMode::Manual && trigger_open)
                .then(|| Arc::clone(&manual));
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("shuffle: cancelled in {}", run.phase());
                    self.go_idle(&job);
                    return Err(PatienceError::Cancelled);
                }

                response = &mut request, if result.is_none() => {
                    match response.and_then(|r| check_result(&job.before, r)) {
                        Ok(r) => {
                            debug!("shuffle: response #{} during {}", r.shuffle_count, run.phase());
                            if run.adopt(r.deck_after.clone()) {
                                self.show_adopted(&job, &run);
                            }
                            result = Some(r);
                        }
                        Err(e) => return Err(self.fail(&job, e)),
                    }
                }

                _ = trigger(job.mode, deadline, &manual), if trigger_open => {
                    if let Some(change) = run.advance() {
                        self.publish(&job, &run);
                        if change.adopted {
                            self.show_adopted(&job, &run);
                        }
                        if change.phase == ShufflePhase::Idle {
                            break;
                        }
                        deadline = Instant::now() + change.phase.dwell(&self.inner.timings);
                    }
                }
            }
        }

        drop(request);

        let result = result
            .ok_or_else(|| PatienceError::Invariant("shuffle finished without a result".into()))?;

        {
            let mut mirror = self.inner.mirror.lock();
            if mirror.is_current(&job.session_id) {
                let p = mirror.presentation_mut();
                p.shuffle_phase = ShufflePhase::Idle;
                p.deck_before = Some(job.before.clone());
                p.deck_after = Some(result.deck_after.clone());
                p.displayed = Some(result.deck_after.clone());
            }
        }
        self.inner.events.emit(Event::ShuffleComplete {
            shuffle_count: result.shuffle_count,
        });
        info!("shuffle: #{} complete", result.shuffle_count);

        Ok(ShuffleOutcome {
            session_id: job.session_id,
            shuffle_count: result.shuffle_count,
            cut_point: job.cut_point,
            deck_before: job.before,
            deck_after: result.deck_after,
        })
    }

    /// run `count` shuffles back to back, one in flight at a time
    ///
    /// every step is awaited through its own completion gate before the next
    /// is requested. `after_step` runs once per finished step.
    pub async fn run_batch<F, Fut>(
        &self,
        session_id: &str,
        count: usize,
        before: Deck,
        cancel: &CancelFlag,
        mut after_step: F,
    ) -> Result<Vec<ShuffleOutcome>>
    where
        F: FnMut(ShuffleOutcome) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        if !(1..=MAX_BATCH).contains(&count) {
            let e = PatienceError::InvalidArgument(format!(
                "number of shuffles must be between 1 and {}, got {}",
                MAX_BATCH, count
            ));
            self.inner.events.notice(NoticeLevel::Warning, e.to_string());
            return Err(e);
        }
        info!("batch: {} shuffles for {}", count, session_id);

        let mut before = before;
        let mut outcomes = Vec::with_capacity(count);
        for i in 0..count {
            if cancel.is_cancelled() {
                return Err(PatienceError::Cancelled);
            }

            let job = ShuffleJob {
                session_id: session_id.to_string(),
                cut_point: batch_cut_point(i),
                before: before.clone(),
                step: Some((i + 1, count)),
                mode: GameMode::Auto,
            };
            let (signal, gate) = completion_gate();
            let pipeline = self.clone();
            let flag = cancel.clone();
            tokio::spawn(async move {
                let result = pipeline.run(job, &flag).await;
                signal.release(result);
            });

            let outcome = gate.wait().await??;
            after_step(outcome.clone()).await?;
            before = outcome.deck_after.clone();
            outcomes.push(outcome);

            if i + 1 < count && !cancel.sleep(Timings::ms(self.inner.timings.batch_settle_ms)).await {
                return Err(PatienceError::Cancelled);
            }
        }

        self.inner.events.notice(
            NoticeLevel::Success,
            format!("{} shuffles complete", count),
        );
        Ok(outcomes)
    }

    fn publish(&self, job: &ShuffleJob, run: &ShuffleRun) {
        {
            let mut mirror = self.inner.mirror.lock();
            if !mirror.is_current(&job.session_id) {
                return;
            }
            let p = mirror.presentation_mut();
            p.shuffle_phase = run.phase();
            p.cut_point = Some(run.cut_point());
            p.deck_before = Some(run.before().clone());
            p.deck_after = run.after().cloned();
            p.displayed = Some(run.displayed().clone());
        }
        self.inner.events.emit(Event::ShufflePhase {
            phase: run.phase(),
            cut_point: run.cut_point(),
            step: job.step,
        });
    }

    fn show_adopted(&self, job: &ShuffleJob, run: &ShuffleRun) {
        {
            let mut mirror = self.inner.mirror.lock();
            if !mirror.is_current(&job.session_id) {
                return;
            }
            let p = mirror.presentation_mut();
            p.deck_after = run.after().cloned();
            p.displayed = Some(run.displayed().clone());
        }
        self.inner.events.emit(Event::DisplayedDeck(run.displayed().clone()));
        self.inner.events.emit(Event::Cue(Cue::Shuffle));
    }

    fn go_idle(&self, job: &ShuffleJob) {
        {
            let mut mirror = self.inner.mirror.lock();
            if !mirror.is_current(&job.session_id) {
                return;
            }
            mirror.presentation_mut().shuffle_phase = ShufflePhase::Idle;
        }
        self.inner.events.emit(Event::ShufflePhase {
            phase: ShufflePhase::Idle,
            cut_point: job.cut_point,
            step: job.step,
        });
    }

    fn fail(&self, job: &ShuffleJob, e: PatienceError) -> PatienceError {
        warn!("shuffle: session={} cut={} failed: {}", job.session_id, job.cut_point, e);
        self.go_idle(job);
        self.inner
            .events
            .notice(NoticeLevel::Error, format!("shuffle failed: {}", e));
        e
    }
}

/// phase timer in auto mode, user press in manual mode
async fn trigger(mode: GameMode, deadline: Instant, manual: &Notify) {
    match mode {
        GameMode::Auto => tokio::time::sleep_until(deadline).await,
        GameMode::Manual => manual.notified().await,
    }
}

/// the service must return a reordering of the same 52 cards
fn check_result(before: &Deck, result: ShuffleResult) -> Result<ShuffleResult> {
    if !result.deck_after.is_permutation_of(&result.deck_before) {
        return Err(PatienceError::Malformed(
            "shuffled deck is not a permutation of its input".into(),
        ));
    }
    if result.deck_before != *before {
        debug!("shuffle: service started from a different ordering than the one shown");
    }
    Ok(result)
}
