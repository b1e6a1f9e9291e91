//! orchestrator - owns the session, the mirror and the mutation channels
//!
//! at most one of manual shuffle, batch shuffle, deal or auto-play runs at a
//! time. every mutating call is followed by a refresh and a merge, and the
//! first terminal snapshot of a session stops auto-play and reports the
//! outcome.

use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::autoplay::{AutoPlayExit, AutoPlayHandle, AutoPlayLoop, MoveExecutor};
use crate::card::{Card, Deck, Rank};
use crate::config::{ClientConfig, GameMode, Timings};
use crate::deal::{DealRun, DealSynchronizer, PileLayout};
use crate::error::{PatienceError, Result};
use crate::event::{Cue, Event, EventSink, NoticeLevel, Outcome};
use crate::mirror::{MergeEffect, SharedMirror, StateMirror};
use crate::service::GameService;
use crate::shuffle::{ShuffleJob, ShuffleOutcome, ShufflePipeline};
use crate::signal::{completion_gate, CancelFlag, Channel, CompletionGate, PendingOps};
use crate::state::{GameState, GameStatus};

const SESSION_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// `game-<unix millis>-<9 base36 chars>`
pub fn generate_session_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| SESSION_ALPHABET[rng.gen_range(0..SESSION_ALPHABET.len())] as char)
        .collect();
    format!("game-{}-{}", millis, suffix)
}

/// activities that drive state mutation on their own
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activity {
    ManualShuffle,
    BatchShuffle,
    Deal,
    AutoPlay,
}

impl Activity {
    pub fn name(self) -> &'static str {
        match self {
            Activity::ManualShuffle => "shuffle",
            Activity::BatchShuffle => "batch shuffle",
            Activity::Deal => "deal",
            Activity::AutoPlay => "auto-play",
        }
    }
}

/// a manual shuffle in progress; resolves after the presentation is idle and
/// the state was refreshed
#[derive(Debug)]
pub struct ShuffleTicket {
    gate: CompletionGate<Result<ShuffleOutcome>>,
}

impl ShuffleTicket {
    pub async fn wait(self) -> Result<ShuffleOutcome> {
        self.gate.wait().await?
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    service: Arc<dyn GameService>,
    config: ClientConfig,
    mirror: SharedMirror,
    pending: PendingOps,
    events: EventSink,
    shuffler: ShufflePipeline,
    dealer: DealSynchronizer,
    activity: Mutex<Option<Activity>>,
    autoplay: Mutex<Option<AutoPlayHandle>>,
    /// cancelled whenever the session is abandoned
    session_cancel: Mutex<CancelFlag>,
}

/// holds the single activity slot until dropped
struct ActivityGuard {
    inner: Arc<Inner>,
    activity: Activity,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        *self.inner.activity.lock() = None;
        match self.activity {
            Activity::AutoPlay => {
                self.inner.mirror.lock().presentation_mut().auto_playing = false;
                self.inner.events.emit(Event::AutoPlay { active: false });
            }
            Activity::Deal => {
                self.inner.mirror.lock().presentation_mut().dealing = false;
            }
            _ => {}
        }
        debug!("orchestrator: {} finished", self.activity.name());
    }
}

impl Orchestrator {
    pub fn new(
        service: Arc<dyn GameService>,
        layout: Arc<dyn PileLayout>,
        config: ClientConfig,
    ) -> (Self, UnboundedReceiver<Event>) {
        let (events, rx) = EventSink::channel();
        let mirror = StateMirror::shared();
        let pending = PendingOps::new();
        let shuffler = ShufflePipeline::new(
            Arc::clone(&service),
            Arc::clone(&mirror),
            pending.clone(),
            events.clone(),
            config.timings.clone(),
        );
        let dealer = DealSynchronizer::new(layout, events.clone(), config.timings.clone());

        let inner = Inner {
            service,
            config,
            mirror,
            pending,
            events,
            shuffler,
            dealer,
            activity: Mutex::new(None),
            autoplay: Mutex::new(None),
            session_cancel: Mutex::new(CancelFlag::new()),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.mirror.lock().session_id().map(str::to_string)
    }

    /// copy of the mirror: last snapshot plus presentation flags
    pub fn snapshot(&self) -> StateMirror {
        self.inner.mirror.lock().clone()
    }

    pub fn activity(&self) -> Option<Activity> {
        *self.inner.activity.lock()
    }

    pub fn is_auto_playing(&self) -> bool {
        self.activity() == Some(Activity::AutoPlay)
    }

    /// start a fresh session, abandoning whatever the old one was doing
    pub async fn new_game(&self) -> Result<String> {
        self.abandon_session();
        let session_id = generate_session_id();
        let state = self
            .inner
            .service
            .create(&session_id, self.inner.config.rules)
            .await
            .map_err(|e| self.report("new game failed", e))?;
        self.inner.mirror.lock().begin_session(&session_id, state.clone())?;
        info!("orchestrator: new session {} ({:?})", session_id, state.game_rules);

        self.inner.events.emit(Event::StateUpdated(Box::new(state)));
        self.inner.events.emit(Event::Interactable(None));
        self.inner
            .events
            .notice(NoticeLevel::Info, "new game ready, shuffle before dealing");
        Ok(session_id)
    }

    /// put the current session back to an ordered, unshuffled deck
    pub async fn reset_game(&self) -> Result<GameState> {
        let session_id = self.require_session()?;
        self.abandon_session();
        self.inner
            .service
            .reset(&session_id)
            .await
            .map_err(|e| self.report("reset failed", e))?;
        let state = self.inner.service.state(&session_id).await?;
        self.inner.mirror.lock().begin_session(&session_id, state.clone())?;
        info!("orchestrator: session {} reset", session_id);

        self.inner.events.emit(Event::StateUpdated(Box::new(state.clone())));
        self.inner.events.emit(Event::Interactable(None));
        Ok(state)
    }

    /// one shuffle at `cut_point`, presented in the configured mode
    pub fn shuffle(&self, cut_point: u8) -> Result<ShuffleTicket> {
        let session_id = self.require_session()?;
        let guard = self.claim(Activity::ManualShuffle)?;
        let before = self
            .inner
            .mirror
            .lock()
            .last_shuffled()
            .cloned()
            .unwrap_or_else(Deck::ordered);
        let job = ShuffleJob {
            session_id,
            cut_point,
            before,
            step: None,
            mode: self.inner.config.mode,
        };

        let (signal, gate) = completion_gate();
        let this = self.clone();
        let cancel = self.session_cancel();
        tokio::spawn(async move {
            let result = match this.inner.shuffler.run(job, &cancel).await {
                Ok(outcome) => this
                    .settle_and_refresh(&outcome.session_id)
                    .await
                    .map(|_| outcome),
                Err(e) => Err(e),
            };
            drop(guard);
            signal.release(result);
        });
        Ok(ShuffleTicket { gate })
    }

    /// next shuffle phase in manual mode; false when no manual shuffle is
    /// waiting for input
    pub fn advance_shuffle(&self) -> bool {
        self.inner.shuffler.advance()
    }

    /// `count` timed shuffles in a row with the batch cut points
    pub async fn batch_shuffle(&self, count: usize) -> Result<Vec<ShuffleOutcome>> {
        let session_id = self.require_session()?;
        let _guard = self.claim(Activity::BatchShuffle)?;
        let before = self
            .inner
            .mirror
            .lock()
            .last_shuffled()
            .cloned()
            .unwrap_or_else(Deck::ordered);
        let cancel = self.session_cancel();

        let this = self.clone();
        self.inner
            .shuffler
            .run_batch(&session_id, count, before, &cancel, move |outcome| {
                let this = this.clone();
                async move {
                    this.settle_and_refresh(&outcome.session_id).await?;
                    Ok(())
                }
            })
            .await
    }

    /// deal the shuffled deck and, in auto mode, hand the game to auto-play
    ///
    /// `question` is carried to the outcome of this session.
    pub async fn start_game(&self, question: Option<String>) -> Result<GameState> {
        let session_id = self.require_session()?;
        let guard = self.claim(Activity::Deal)?;
        let cancel = self.session_cancel();
        let auto = self.inner.config.mode == GameMode::Auto;

        {
            let mut mirror = self.inner.mirror.lock();
            mirror.set_question(question.filter(|q| !q.trim().is_empty()));
            if auto {
                let state = mirror.require_state()?;
                if state.status != GameStatus::Waiting || !state.piles_empty() {
                    drop(mirror);
                    return Err(self.report(
                        "cannot deal",
                        PatienceError::InvalidArgument("piles are not empty, start a new game".into()),
                    ));
                }
            }
        }

        let state = self
            .inner
            .service
            .start(&session_id)
            .await
            .map_err(|e| self.report("start failed", e))?;
        self.absorb(&session_id, state)?;

        self.inner.mirror.lock().presentation_mut().dealing = true;
        match self.inner.dealer.run_deal(&cancel).await {
            Ok(DealRun::Completed) | Ok(DealRun::Ignored) => {}
            Err(PatienceError::LayoutUnavailable) => {
                self.inner.events.notice(
                    NoticeLevel::Warning,
                    "board layout unavailable, skipping the deal animation",
                );
            }
            Err(e) => return Err(e),
        }
        let state = self.settle_and_refresh(&session_id).await?;
        drop(guard);

        if !auto {
            self.inner.events.notice(NoticeLevel::Success, "game started");
            return Ok(state);
        }

        if !state.fully_dealt() {
            return Err(self.report(
                "auto-play cannot start",
                PatienceError::Invariant("not every pile holds 4 cards".into()),
            ));
        }
        if !cancel
            .sleep(Timings::ms(self.inner.config.timings.autoplay_start_delay_ms))
            .await
        {
            return Err(PatienceError::Cancelled);
        }
        self.start_auto_play()?;
        Ok(state)
    }

    /// reveal the top card of `pile`
    pub async fn flip(&self, pile: Rank) -> Result<GameState> {
        let session_id = self.require_session()?;
        self.refuse_during(Activity::Deal)?;
        match self.flip_in(&session_id, pile).await {
            Ok(state) => Ok(state),
            Err(e) => Err(self.report("flip failed", e)),
        }
    }

    /// place the revealed card on `pile`
    pub async fn place(&self, pile: Rank) -> Result<GameState> {
        let session_id = self.require_session()?;
        self.refuse_during(Activity::Deal)?;
        match self.place_in(&session_id, pile).await {
            Ok(state) => Ok(state),
            Err(e) => {
                // the service may have ended the game under us
                if let Err(refresh) = self.refresh_session(&session_id).await {
                    debug!("orchestrator: refresh after failed place: {}", refresh);
                }
                Err(self.report("place failed", e))
            }
        }
    }

    pub async fn refresh(&self) -> Result<GameState> {
        let session_id = self.require_session()?;
        self.refresh_session(&session_id).await
    }

    /// hand the session to the auto-play loop
    pub fn start_auto_play(&self) -> Result<()> {
        let session_id = self.require_session()?;
        {
            let mirror = self.inner.mirror.lock();
            let state = mirror.require_state()?;
            if state.status != GameStatus::Playing {
                return Err(PatienceError::InvalidArgument(format!(
                    "auto-play needs a game in progress (status: {})",
                    state.status
                )));
            }
        }
        let guard = self.claim(Activity::AutoPlay)?;

        self.inner.mirror.lock().presentation_mut().auto_playing = true;
        self.inner.events.emit(Event::AutoPlay { active: true });
        info!("orchestrator: auto-play on {}", session_id);

        let moves = Arc::new(SessionMoves {
            orchestrator: self.clone(),
            session_id,
        });
        let events = self.inner.events.clone();
        let handle = AutoPlayLoop::new(moves, self.inner.config.timings.clone()).start_with(
            move |result| {
                match result {
                    Ok(AutoPlayExit::NoLegalMove) => {
                        events.notice(NoticeLevel::Warning, "auto-play found no legal move")
                    }
                    Err(e) if *e != PatienceError::Cancelled => {
                        events.notice(NoticeLevel::Error, format!("auto-play stopped: {}", e))
                    }
                    _ => {}
                }
                drop(guard);
            },
        );
        *self.inner.autoplay.lock() = Some(handle);
        Ok(())
    }

    /// ask the loop to stop; false when it was not running
    pub fn stop_auto_play(&self) -> bool {
        match self.inner.autoplay.lock().as_ref() {
            Some(handle) if !handle.is_finished() => {
                handle.stop();
                true
            }
            _ => false,
        }
    }

    /// returns whether auto-play is running afterwards
    pub fn toggle_auto_play(&self) -> Result<bool> {
        if self.is_auto_playing() {
            self.stop_auto_play();
            Ok(false)
        } else {
            self.start_auto_play()?;
            Ok(true)
        }
    }

    /// wait for the current auto-play loop, if any, to end
    pub async fn wait_auto_play(&self) -> Option<Result<AutoPlayExit>> {
        let handle = self.inner.autoplay.lock().take()?;
        Some(handle.join().await)
    }

    fn require_session(&self) -> Result<String> {
        self.session_id().ok_or(PatienceError::NoSession)
    }

    fn session_cancel(&self) -> CancelFlag {
        self.inner.session_cancel.lock().clone()
    }

    fn claim(&self, activity: Activity) -> Result<ActivityGuard> {
        let mut current = self.inner.activity.lock();
        if let Some(active) = *current {
            debug!("orchestrator: {} refused, {} running", activity.name(), active.name());
            return Err(PatienceError::Busy(active.name().into()));
        }
        *current = Some(activity);
        Ok(ActivityGuard {
            inner: Arc::clone(&self.inner),
            activity,
        })
    }

    fn refuse_during(&self, activity: Activity) -> Result<()> {
        if self.activity() == Some(activity) {
            return Err(PatienceError::Busy(activity.name().into()));
        }
        Ok(())
    }

    /// stop auto-play and every timer bound to the current session
    fn abandon_session(&self) {
        if let Some(handle) = self.inner.autoplay.lock().take() {
            handle.stop();
        }
        let old = std::mem::replace(&mut *self.inner.session_cancel.lock(), CancelFlag::new());
        old.cancel();
    }

    fn report(&self, context: &str, e: PatienceError) -> PatienceError {
        warn!("orchestrator: {}: {}", context, e);
        self.inner
            .events
            .notice(NoticeLevel::Error, format!("{}: {}", context, e));
        e
    }

    async fn settle_and_refresh(&self, session_id: &str) -> Result<GameState> {
        tokio::time::sleep(Timings::ms(self.inner.config.timings.refresh_delay_ms)).await;
        self.refresh_session(session_id).await
    }

    async fn refresh_session(&self, session_id: &str) -> Result<GameState> {
        let state = self.inner.service.state(session_id).await?;
        self.absorb(session_id, state)
    }

    /// merge a snapshot and publish what changed
    fn absorb(&self, session_id: &str, state: GameState) -> Result<GameState> {
        let (effect, interactable) = {
            let mut mirror = self.inner.mirror.lock();
            let effect = mirror.merge(session_id, state.clone())?;
            (effect, mirror.presentation().interactable)
        };
        if effect == MergeEffect::Discarded {
            return Err(PatienceError::Cancelled);
        }

        self.inner.events.emit(Event::StateUpdated(Box::new(state.clone())));
        self.inner.events.emit(Event::Interactable(interactable));
        if effect == MergeEffect::Terminal {
            self.finish(session_id, state.status);
        }
        Ok(state)
    }

    /// first terminal snapshot of a session
    fn finish(&self, session_id: &str, status: GameStatus) {
        if let Some(handle) = self.inner.autoplay.lock().as_ref() {
            handle.stop();
        }
        let question = self.inner.mirror.lock().question().map(str::to_string);
        info!("orchestrator: session {} ended {}", session_id, status);

        let outcome = Outcome {
            session_id: session_id.to_string(),
            status,
            question,
        };
        if outcome.won() {
            self.inner.events.notice(NoticeLevel::Success, "you won");
        } else {
            self.inner.events.notice(NoticeLevel::Error, "you lost");
        }
        self.inner.events.emit(Event::Outcome(outcome));
    }

    async fn flip_in(&self, session_id: &str, pile: Rank) -> Result<GameState> {
        let _token = self.inner.pending.begin(Channel::Flip)?;
        let result = self.inner.service.flip(session_id, pile).await?;
        debug!("orchestrator: revealed {} from {}", result.card, result.pile);

        self.inner.events.emit(Event::CardRevealed {
            card: result.card,
            pile: result.pile,
        });
        self.inner.events.emit(Event::Cue(Cue::Flip));

        let timings = &self.inner.config.timings;
        tokio::time::sleep(Timings::ms(timings.flip_animation_ms)).await;
        match self.settle_and_refresh(session_id).await {
            Ok(state) => Ok(state),
            Err(PatienceError::Cancelled) => Err(PatienceError::Cancelled),
            Err(e) => {
                warn!("orchestrator: refresh after flip failed, using flip response: {}", e);
                self.absorb(session_id, result.game_state)
            }
        }
    }

    async fn place_in(&self, session_id: &str, pile: Rank) -> Result<GameState> {
        let _token = self.inner.pending.begin(Channel::Place)?;
        let card: Option<Card> = self
            .inner
            .mirror
            .lock()
            .state()
            .and_then(|s| s.current_card);
        let result = self.inner.service.place(session_id, pile).await?;

        self.inner.events.emit(Event::Cue(Cue::Place));
        if let Some(card) = card {
            self.inner.events.emit(Event::CardPlaced { card, pile });
        }
        if let Some(message) = &result.message {
            debug!("orchestrator: place on {}: {}", pile, message);
        }

        let state = match self.settle_and_refresh(session_id).await {
            Ok(state) => state,
            Err(PatienceError::Cancelled) => return Err(PatienceError::Cancelled),
            Err(e) => {
                warn!("orchestrator: refresh after place failed, using place response: {}", e);
                self.absorb(session_id, result.game_state.clone())?
            }
        };
        if result.game_over && !state.status.is_terminal() {
            // the read raced the terminal write; trust the place response
            return self.absorb(session_id, result.game_state);
        }
        Ok(state)
    }
}

/// auto-play's view of one session
struct SessionMoves {
    orchestrator: Orchestrator,
    session_id: String,
}

#[async_trait::async_trait]
impl MoveExecutor for SessionMoves {
    async fn refresh(&self) -> Result<GameState> {
        self.orchestrator.refresh_session(&self.session_id).await
    }

    async fn flip(&self, pile: Rank) -> Result<GameState> {
        self.orchestrator.flip_in(&self.session_id, pile).await
    }

    async fn place(&self, pile: Rank) -> Result<GameState> {
        self.orchestrator.place_in(&self.session_id, pile).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deal::FixedLayout;
    use crate::mock::MockTable;
    use crate::shuffle::ShufflePhase;
    use std::time::Duration;

    fn orchestrator(
        table: Arc<MockTable>,
        config: ClientConfig,
    ) -> (Orchestrator, UnboundedReceiver<Event>) {
        Orchestrator::new(table, Arc::new(FixedLayout::default()), config)
    }

    fn manual() -> ClientConfig {
        ClientConfig {
            mode: GameMode::Manual,
            timings: Timings::instant(),
            ..Default::default()
        }
    }

    fn drain(rx: &mut UnboundedReceiver<Event>) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[test]
    fn test_session_id_format() {
        let id = generate_session_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "game");
        assert!(parts[1].parse::<u128>().is_ok());
        assert_eq!(parts[2].len(), 9);
        assert!(parts[2].bytes().all(|b| SESSION_ALPHABET.contains(&b)));
        assert_ne!(generate_session_id(), id);
    }

    #[tokio::test]
    async fn test_requires_session() {
        let (game, _rx) = orchestrator(Arc::new(MockTable::new()), manual());
        assert!(matches!(game.shuffle(26), Err(PatienceError::NoSession)));
        assert_eq!(game.start_auto_play(), Err(PatienceError::NoSession));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shuffle_refreshes_state_once() {
        let table = Arc::new(MockTable::new());
        let (game, _rx) = orchestrator(table.clone(), manual());
        game.new_game().await.unwrap();

        let ticket = game.shuffle(26).unwrap();
        assert!(matches!(game.shuffle(13), Err(PatienceError::Busy(_))));
        // manual mode: walk the five phases
        let mut advanced = 0;
        while advanced < 5 {
            if game.advance_shuffle() {
                advanced += 1;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let outcome = ticket.wait().await.unwrap();

        assert_eq!(outcome.deck_after, Deck::ordered().riffle(26).unwrap());
        assert_eq!(table.calls("state"), 1);
        let mirror = game.snapshot();
        assert_eq!(mirror.state().unwrap().shuffle_count, 1);
        assert_eq!(mirror.presentation().shuffle_phase, ShufflePhase::Idle);
        assert_eq!(game.activity(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_refreshes_after_every_step() {
        let table = Arc::new(MockTable::new());
        let (game, _rx) = orchestrator(table.clone(), manual());
        game.new_game().await.unwrap();

        let outcomes = game.batch_shuffle(4).await.unwrap();
        assert_eq!(outcomes.len(), 4);
        assert_eq!(table.calls("shuffle"), 4);
        assert_eq!(table.calls("state"), 4);
        assert_eq!(game.snapshot().state().unwrap().shuffle_count, 4);

        // the next shuffle continues from where the batch stopped
        assert_eq!(game.snapshot().last_shuffled(), Some(&outcomes[3].deck_after));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deal_refreshes_state_once() {
        let table = Arc::new(MockTable::new());
        let (game, mut rx) = orchestrator(table.clone(), manual());
        game.new_game().await.unwrap();
        game.batch_shuffle(1).await.unwrap();
        let before = table.calls("state");

        let state = game.start_game(None).await.unwrap();
        assert_eq!(state.status, GameStatus::Playing);
        assert_eq!(table.calls("state"), before + 1);
        assert!(!game.snapshot().presentation().dealing);

        let events = drain(&mut rx);
        let dealt = events.iter().filter(|e| matches!(e, Event::CardDealt(_))).count();
        assert_eq!(dealt, 52);
        assert_eq!(events.iter().filter(|e| **e == Event::DealComplete).count(), 1);
        // manual mode leaves the moves to the user
        assert!(!game.is_auto_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_play_refused_while_dealing() {
        let table = Arc::new(MockTable::new());
        let config = ClientConfig {
            mode: GameMode::Manual,
            ..Default::default()
        };
        let (game, _rx) = orchestrator(table.clone(), config);
        game.new_game().await.unwrap();
        game.batch_shuffle(1).await.unwrap();

        let dealer = game.clone();
        let deal = tokio::spawn(async move { dealer.start_game(None).await });
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(game.activity(), Some(Activity::Deal));
        assert!(game.snapshot().presentation().dealing);

        assert_eq!(game.start_auto_play(), Err(PatienceError::Busy("deal".into())));
        assert!(matches!(game.flip(Rank::King).await, Err(PatienceError::Busy(_))));
        assert!(matches!(game.batch_shuffle(1).await, Err(PatienceError::Busy(_))));

        deal.await.unwrap().unwrap();
        assert_eq!(table.calls("flip"), 0);
        game.start_auto_play().unwrap();
        assert!(game.is_auto_playing());
        assert!(game.stop_auto_play());
        assert_eq!(game.wait_auto_play().await, Some(Ok(AutoPlayExit::Cancelled)));
        assert!(!game.is_auto_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_game_reports_outcome_once() {
        let table = Arc::new(MockTable::new());
        let (game, mut rx) = orchestrator(table.clone(), ClientConfig::headless());
        let session = game.new_game().await.unwrap();
        game.batch_shuffle(3).await.unwrap();

        game.start_game(Some("will it work?".into())).await.unwrap();
        let exit = game.wait_auto_play().await.unwrap().unwrap();
        let status = match exit {
            AutoPlayExit::Finished(status) => status,
            other => panic!("unexpected exit {:?}", other),
        };
        assert!(status.is_terminal());
        assert!(!game.is_auto_playing());

        let outcomes: Vec<Outcome> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                Event::Outcome(outcome) => Some(outcome),
                _ => None,
            })
            .collect();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].session_id, session);
        assert_eq!(outcomes[0].status, status);
        assert_eq!(outcomes[0].question.as_deref(), Some("will it work?"));

        // refreshing a finished game does not report it again
        game.refresh().await.unwrap();
        assert!(!drain(&mut rx).iter().any(|e| matches!(e, Event::Outcome(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_mode_refuses_second_deal() {
        let table = Arc::new(MockTable::new());
        let (game, _rx) = orchestrator(table.clone(), ClientConfig::headless());
        game.new_game().await.unwrap();
        game.batch_shuffle(1).await.unwrap();
        game.start_game(None).await.unwrap();
        game.wait_auto_play().await;

        assert!(matches!(
            game.start_game(None).await,
            Err(PatienceError::InvalidArgument(_))
        ));
        assert_eq!(table.calls("start"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_moves_follow_the_turn() {
        let table = Arc::new(MockTable::new());
        let (game, _rx) = orchestrator(table.clone(), manual());
        game.new_game().await.unwrap();
        game.batch_shuffle(1).await.unwrap();
        game.start_game(None).await.unwrap();

        let state = game.flip(Rank::King).await.unwrap();
        let card = state.current_card.unwrap();
        assert_eq!(game.snapshot().presentation().interactable, Some(card.rank));

        let wrong = Rank::ALL.into_iter().find(|r| *r != card.rank).unwrap();
        assert!(matches!(game.place(wrong).await, Err(PatienceError::Rejected(_))));

        let state = game.place(card.rank).await.unwrap();
        assert_eq!(state.current_card, None);
        assert_eq!(state.moves_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_advance_during_batch_does_not_leak_into_manual_shuffle() {
        let table = Arc::new(MockTable::new());
        let config = ClientConfig {
            mode: GameMode::Manual,
            ..Default::default()
        };
        let (game, _rx) = orchestrator(table.clone(), config);
        game.new_game().await.unwrap();

        let batcher = game.clone();
        let batch = tokio::spawn(async move { batcher.batch_shuffle(1).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!game.advance_shuffle());
        batch.await.unwrap().unwrap();

        let ticket = game.shuffle(26).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            game.snapshot().presentation().shuffle_phase,
            ShufflePhase::FanSpread
        );

        for _ in 0..5 {
            assert!(game.advance_shuffle());
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(ticket.wait().await.unwrap().cut_point, 26);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_game_abandons_running_shuffle() {
        let table = Arc::new(MockTable::new());
        let (game, _rx) = orchestrator(table.clone(), manual());
        let first = game.new_game().await.unwrap();

        let ticket = game.shuffle(26).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = game.new_game().await.unwrap();

        assert_ne!(first, second);
        assert_eq!(ticket.wait().await, Err(PatienceError::Cancelled));
        assert_eq!(game.activity(), None);
        let mirror = game.snapshot();
        assert_eq!(mirror.session_id(), Some(second.as_str()));
        assert_eq!(mirror.presentation().shuffle_phase, ShufflePhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_returns_to_ordered_deck() {
        let table = Arc::new(MockTable::new());
        let (game, _rx) = orchestrator(table.clone(), manual());
        let session = game.new_game().await.unwrap();
        game.batch_shuffle(2).await.unwrap();

        let state = game.reset_game().await.unwrap();
        assert_eq!(state.shuffle_count, 0);
        assert_eq!(game.session_id(), Some(session));
        assert_eq!(game.snapshot().last_shuffled(), None);
    }
}
