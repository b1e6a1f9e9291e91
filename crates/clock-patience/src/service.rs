//! game service contract - the remote rules engine seen from the client
//!
//! the service owns dealing, shuffling, move legality and win/loss. the
//! controller only issues requests and merges the snapshots it gets back.

use serde::{Deserialize, Serialize};

use crate::card::{Card, Deck, Rank};
use crate::error::Result;
use crate::state::{GameState, RulesVariant};

/// result of one shuffle request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShuffleResult {
    pub shuffle_count: u32,
    pub deck_before: Deck,
    pub deck_after: Deck,
}

/// result of revealing the top face-down card of a pile
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlipResult {
    pub card: Card,
    pub pile: Rank,
    pub game_state: GameState,
}

/// result of placing the revealed card
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceResult {
    pub game_state: GameState,
    #[serde(default)]
    pub game_over: bool,
    #[serde(default)]
    pub won: Option<bool>,
    #[serde(default)]
    pub next_flip_pile: Option<Rank>,
    #[serde(default)]
    pub message: Option<String>,
}

/// request/response contract of the game service
#[async_trait::async_trait]
pub trait GameService: Send + Sync {
    /// create (or replace) a session with an ordered deck
    async fn create(&self, session_id: &str, rules: RulesVariant) -> Result<GameState>;

    /// cut at `cut_point` (1-51) and riffle the session's current ordering
    async fn shuffle(&self, session_id: &str, cut_point: u8) -> Result<ShuffleResult>;

    /// deal 13 piles of 4 face-down cards; rejected before the first shuffle
    async fn start(&self, session_id: &str) -> Result<GameState>;

    /// reveal the top face-down card of the eligible pile
    async fn flip(&self, session_id: &str, pile: Rank) -> Result<FlipResult>;

    /// move the revealed card onto its pile
    async fn place(&self, session_id: &str, pile: Rank) -> Result<PlaceResult>;

    /// read-only snapshot
    async fn state(&self, session_id: &str) -> Result<GameState>;

    /// replace the session with a fresh, ordered one
    async fn reset(&self, session_id: &str) -> Result<()>;
}
