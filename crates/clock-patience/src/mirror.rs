//! state mirror - last known authoritative snapshot plus local presentation flags

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::card::{Deck, Rank};
use crate::error::{PatienceError, Result};
use crate::shuffle::ShufflePhase;
use crate::state::GameState;

/// mirror handle shared by the orchestrator and the presentation components
pub type SharedMirror = Arc<Mutex<StateMirror>>;

/// local-only presentation state, reset whenever the session changes
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PresentationState {
    pub shuffle_phase: ShufflePhase,
    pub cut_point: Option<u8>,
    pub deck_before: Option<Deck>,
    pub deck_after: Option<Deck>,
    /// ordering the shuffle presentation currently shows
    pub displayed: Option<Deck>,
    pub dealing: bool,
    pub auto_playing: bool,
    /// pile the front end accepts input on
    pub interactable: Option<Rank>,
}

/// what a merge changed, for the caller to react to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeEffect {
    /// snapshot adopted
    Updated,
    /// snapshot adopted and it is the first terminal one for this session
    Terminal,
    /// snapshot belonged to an abandoned session and was dropped
    Discarded,
}

#[derive(Clone, Debug, Default)]
pub struct StateMirror {
    session_id: Option<String>,
    state: Option<GameState>,
    presentation: PresentationState,
    question: Option<String>,
    outcome_reported: bool,
}

impl StateMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedMirror {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn is_current(&self, session_id: &str) -> bool {
        self.session_id.as_deref() == Some(session_id)
    }

    pub fn state(&self) -> Option<&GameState> {
        self.state.as_ref()
    }

    pub fn presentation(&self) -> &PresentationState {
        &self.presentation
    }

    pub fn presentation_mut(&mut self) -> &mut PresentationState {
        &mut self.presentation
    }

    pub fn question(&self) -> Option<&str> {
        self.question.as_deref()
    }

    pub fn set_question(&mut self, question: Option<String>) {
        self.question = question;
    }

    /// switch to a new session; everything local is thrown away
    pub fn begin_session(&mut self, session_id: &str, state: GameState) -> Result<()> {
        state.check_invariants()?;
        debug!("mirror: new session {}", session_id);
        self.session_id = Some(session_id.to_string());
        self.presentation = PresentationState {
            interactable: state.interactable_pile(),
            ..Default::default()
        };
        self.state = Some(state);
        self.question = None;
        self.outcome_reported = false;
        Ok(())
    }

    /// adopt a snapshot for `session_id`; stale sessions are ignored and
    /// snapshots that break card accounting are refused
    pub fn merge(&mut self, session_id: &str, state: GameState) -> Result<MergeEffect> {
        if !self.is_current(session_id) {
            debug!("mirror: dropping snapshot for abandoned session {}", session_id);
            return Ok(MergeEffect::Discarded);
        }
        if let Err(e) = state.check_invariants() {
            warn!("mirror: refusing snapshot for {}: {}", session_id, e);
            return Err(e);
        }

        self.presentation.interactable = state.interactable_pile();
        let terminal = state.status.is_terminal() && !self.outcome_reported;
        if terminal {
            self.outcome_reported = true;
        }
        self.state = Some(state);

        Ok(if terminal {
            MergeEffect::Terminal
        } else {
            MergeEffect::Updated
        })
    }

    /// snapshot for the current session or an error when none exists
    pub fn require_state(&self) -> Result<&GameState> {
        self.state.as_ref().ok_or(PatienceError::NoSession)
    }

    /// last ordering the shuffle presentation settled on, if any
    pub fn last_shuffled(&self) -> Option<&Deck> {
        self.presentation.deck_after.as_ref()
    }
}
