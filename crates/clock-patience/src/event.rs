//! presentation events - everything the controller asks a front end to show or play

use tokio::sync::mpsc;

use crate::card::{Card, Deck, Rank};
use crate::shuffle::ShufflePhase;
use crate::state::{GameState, GameStatus};

/// screen position of a pile, relative to the board centre
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// audio cues
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cue {
    Shuffle,
    Flip,
    Place,
}

/// terminal result of a session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outcome {
    pub session_id: String,
    pub status: GameStatus,
    /// question asked before the game started, answered by the result
    pub question: Option<String>,
}

impl Outcome {
    pub fn won(&self) -> bool {
        self.status == GameStatus::Won
    }
}

/// one "card arrives at pile" step of the deal animation
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DealStep {
    /// 0..52
    pub index: usize,
    pub pile: Rank,
    /// 0..4 within the pile
    pub card_in_pile: usize,
    pub destination: Point,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// user-visible notice
    Notice { level: NoticeLevel, message: String },

    Cue(Cue),

    /// shuffle presentation moved to a new phase
    ShufflePhase {
        phase: ShufflePhase,
        cut_point: u8,
        /// 1-based step and total when part of a batch
        step: Option<(usize, usize)>,
    },

    /// ordering currently shown by the shuffle presentation
    DisplayedDeck(Deck),

    /// shuffle presentation finished and is back to idle
    ShuffleComplete { shuffle_count: u32 },

    DealStarted,
    CardDealt(DealStep),
    DealComplete,

    CardRevealed { card: Card, pile: Rank },
    CardPlaced { card: Card, pile: Rank },

    /// mirrored authoritative state changed
    StateUpdated(Box<GameState>),

    /// pile the front end should accept input on
    Interactable(Option<Rank>),

    AutoPlay { active: bool },

    Outcome(Outcome),
}

/// sending side handed to each component
#[derive(Clone, Debug)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// dropped silently once the receiver is gone
    pub fn emit(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    pub fn notice(&self, level: NoticeLevel, message: impl Into<String>) {
        self.emit(Event::Notice {
            level,
            message: message.into(),
        });
    }
}
