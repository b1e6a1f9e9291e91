//! auto-play loop - plays the session unattended until it ends or is stopped
//!
//! every iteration starts from a fresh snapshot and re-reads it again right
//! before committing, so a move is never made on a card that has moved on.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::card::{Card, Rank};
use crate::config::Timings;
use crate::error::{PatienceError, Result};
use crate::signal::CancelFlag;
use crate::state::{GameState, GameStatus};

/// moves the loop can make, provided by whoever owns the session
#[async_trait::async_trait]
pub trait MoveExecutor: Send + Sync {
    /// fetch the authoritative snapshot and merge it
    async fn refresh(&self) -> Result<GameState>;

    async fn flip(&self, pile: Rank) -> Result<GameState>;

    async fn place(&self, pile: Rank) -> Result<GameState>;
}

/// why the loop stopped without an error
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AutoPlayExit {
    /// the session left `playing`
    Finished(GameStatus),
    /// nothing revealed and nothing left to flip
    NoLegalMove,
    Cancelled,
}

/// move chosen from a snapshot
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Decision {
    Place(Card),
    Flip(Rank),
}

impl Decision {
    fn from_state(state: &GameState) -> Option<Decision> {
        match (state.current_card, state.next_flip_pile) {
            (Some(card), _) => Some(Decision::Place(card)),
            (None, Some(pile)) => Some(Decision::Flip(pile)),
            (None, None) => None,
        }
    }
}

pub struct AutoPlayLoop<E: ?Sized> {
    executor: Arc<E>,
    timings: Timings,
}

impl<E: MoveExecutor + ?Sized + 'static> AutoPlayLoop<E> {
    pub fn new(executor: Arc<E>, timings: Timings) -> Self {
        Self { executor, timings }
    }

    /// run on a background task
    pub fn start(self) -> AutoPlayHandle {
        self.start_with(|_| {})
    }

    /// run on a background task and hand the result to `on_exit` before the
    /// handle resolves
    pub fn start_with<F>(self, on_exit: F) -> AutoPlayHandle
    where
        F: FnOnce(&Result<AutoPlayExit>) + Send + 'static,
    {
        let cancel = CancelFlag::new();
        let flag = cancel.clone();
        let task = tokio::spawn(async move {
            let result = self.run(&flag).await;
            on_exit(&result);
            result
        });
        AutoPlayHandle { cancel, task }
    }

    pub async fn run(&self, cancel: &CancelFlag) -> Result<AutoPlayExit> {
        info!("autoplay: started");
        let exit = self.play(cancel).await;
        match &exit {
            Ok(reason) => info!("autoplay: stopped ({:?})", reason),
            Err(e) => warn!("autoplay: stopped on error: {}", e),
        }
        exit
    }

    async fn play(&self, cancel: &CancelFlag) -> Result<AutoPlayExit> {
        loop {
            if cancel.is_cancelled() {
                return Ok(AutoPlayExit::Cancelled);
            }

            let state = self.executor.refresh().await?;
            if state.status != GameStatus::Playing {
                return Ok(AutoPlayExit::Finished(state.status));
            }
            let decision = match Decision::from_state(&state) {
                Some(decision) => decision,
                None => return Ok(AutoPlayExit::NoLegalMove),
            };

            let pace = match decision {
                Decision::Place(_) => self.timings.autoplay_place_pace_ms,
                Decision::Flip(_) => self.timings.autoplay_flip_pace_ms,
            };
            if !cancel.sleep(Timings::ms(pace)).await {
                return Ok(AutoPlayExit::Cancelled);
            }

            // decision basis must still hold
            let latest = self.executor.refresh().await?;
            if latest.status != GameStatus::Playing {
                return Ok(AutoPlayExit::Finished(latest.status));
            }
            if Decision::from_state(&latest) != Some(decision) {
                debug!("autoplay: {:?} went stale, yielding", decision);
                continue;
            }
            if cancel.is_cancelled() {
                return Ok(AutoPlayExit::Cancelled);
            }

            let (attempt, settle) = match decision {
                Decision::Place(card) => {
                    debug!("autoplay: place {} on {}", card, card.rank);
                    (
                        self.executor.place(card.rank).await,
                        self.timings.autoplay_after_place_ms,
                    )
                }
                Decision::Flip(pile) => {
                    debug!("autoplay: flip {}", pile);
                    (self.executor.flip(pile).await, self.timings.autoplay_after_flip_ms)
                }
            };

            match attempt {
                Ok(state) if state.status != GameStatus::Playing => {
                    return Ok(AutoPlayExit::Finished(state.status));
                }
                Ok(_) => {}
                Err(e) if e.is_benign_staleness() => {
                    debug!("autoplay: target moved on ({}), yielding", e);
                    continue;
                }
                Err(e) => return Err(e),
            }

            if !cancel.sleep(Timings::ms(settle)).await {
                return Ok(AutoPlayExit::Cancelled);
            }
        }
    }
}

/// running loop; dropping the handle does not stop it
#[derive(Debug)]
pub struct AutoPlayHandle {
    cancel: CancelFlag,
    task: JoinHandle<Result<AutoPlayExit>>,
}

impl AutoPlayHandle {
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) -> Result<AutoPlayExit> {
        self.task.await.map_err(|e| {
            warn!("autoplay: task ended abnormally: {}", e);
            PatienceError::Cancelled
        })?
    }
}
