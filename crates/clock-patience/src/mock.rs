//! in-process game service - a small rules engine for offline play and tests
//!
//! shuffles are perfect riffles, the deal takes the ordering top down into
//! piles A..K, and both rules variants decide win/loss on placement.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::debug;

use crate::card::{Card, Deck, Rank, CARDS_PER_PILE, DEAL_ORDER, FLIP_SEARCH_ORDER};
use crate::error::{PatienceError, Result};
use crate::http::classify_rejection;
use crate::service::{FlipResult, GameService, PlaceResult, ShuffleResult};
use crate::state::{GameState, GameStatus, RulesVariant};

#[derive(Clone, Debug)]
struct Table {
    rules: RulesVariant,
    status: GameStatus,
    /// undealt ordering, top card first
    deck: Vec<Card>,
    shuffle_count: u32,
    face_down: BTreeMap<Rank, Vec<Card>>,
    piles: BTreeMap<Rank, Vec<Card>>,
    current: Option<Card>,
    source: Option<Rank>,
    kings_revealed: u8,
    moves: u32,
}

impl Table {
    fn new(rules: RulesVariant) -> Self {
        Self {
            rules,
            status: GameStatus::Waiting,
            deck: Deck::ordered().cards().to_vec(),
            shuffle_count: 0,
            face_down: Rank::ALL.iter().map(|r| (*r, Vec::new())).collect(),
            piles: Rank::ALL.iter().map(|r| (*r, Vec::new())).collect(),
            current: None,
            source: None,
            kings_revealed: 0,
            moves: 0,
        }
    }

    fn face_down(&self, pile: Rank) -> usize {
        self.face_down.get(&pile).map_or(0, Vec::len)
    }

    fn face_up(&self, pile: Rank) -> usize {
        self.piles.get(&pile).map_or(0, Vec::len)
    }

    fn any_face_down(&self) -> bool {
        self.face_down.values().any(|cards| !cards.is_empty())
    }

    fn all_complete(&self) -> bool {
        Rank::ALL.iter().all(|r| self.face_up(*r) == CARDS_PER_PILE)
    }

    /// the pile the last card came from keeps the turn while it has cards,
    /// otherwise the highest rank with a face-down card
    fn next_flip_pile(&self) -> Option<Rank> {
        if self.current.is_some() {
            return None;
        }
        if let Some(source) = self.source {
            if self.face_down(source) > 0 {
                return Some(source);
            }
        }
        FLIP_SEARCH_ORDER
            .iter()
            .copied()
            .find(|r| self.face_down(*r) > 0)
    }

    fn snapshot(&self) -> GameState {
        GameState {
            status: self.status,
            current_card: self.current,
            current_card_source: self.source,
            piles: self.piles.clone(),
            face_down_cards: self
                .face_down
                .iter()
                .map(|(rank, cards)| (*rank, cards.len() as u8))
                .collect(),
            kings_revealed: self.kings_revealed,
            cards_remaining: self.deck.len() as u8,
            moves_count: self.moves,
            shuffle_count: self.shuffle_count,
            next_flip_pile: self.next_flip_pile(),
            game_rules: self.rules,
        }
    }

    fn require_playing(&self) -> Result<()> {
        if self.status != GameStatus::Playing {
            return Err(PatienceError::Rejected(format!(
                "game is not in progress (status: {})",
                self.status
            )));
        }
        Ok(())
    }

    fn shuffle(&mut self, cut_point: u8) -> Result<ShuffleResult> {
        if self.status != GameStatus::Waiting {
            return Err(PatienceError::Rejected("cannot shuffle after the deal".into()));
        }
        let before = Deck::from_cards(self.deck.clone())?;
        let after = before
            .riffle(cut_point as usize)
            .map_err(|e| PatienceError::Rejected(e.to_string()))?;
        self.deck = after.cards().to_vec();
        self.shuffle_count += 1;
        Ok(ShuffleResult {
            shuffle_count: self.shuffle_count,
            deck_before: before,
            deck_after: after,
        })
    }

    fn deal(&mut self) -> Result<()> {
        if self.status != GameStatus::Waiting {
            return Err(PatienceError::Rejected("game already started".into()));
        }
        if self.shuffle_count == 0 {
            return Err(PatienceError::Rejected("shuffle the deck first".into()));
        }
        let mut cards = std::mem::take(&mut self.deck).into_iter();
        for pile in DEAL_ORDER {
            let slot = self.face_down.entry(pile).or_default();
            slot.extend(cards.by_ref().take(CARDS_PER_PILE));
        }
        self.status = GameStatus::Playing;
        Ok(())
    }

    fn flip(&mut self, pile: Rank) -> Result<Card> {
        self.require_playing()?;
        if let Some(card) = self.current {
            return Err(PatienceError::Stale(format!("card {} already revealed", card)));
        }
        if self.face_down(pile) == 0 {
            return Err(classify_rejection(format!("no face-down cards on pile {}", pile)));
        }
        if self.next_flip_pile() != Some(pile) {
            return Err(classify_rejection(format!("pile {} not eligible", pile)));
        }
        let card = match self.face_down.get_mut(&pile) {
            Some(cards) if !cards.is_empty() => cards.remove(0),
            _ => return Err(PatienceError::Invariant(format!("pile {} emptied", pile))),
        };
        self.current = Some(card);
        self.source = Some(pile);
        Ok(card)
    }

    fn place(&mut self, pile: Rank) -> Result<PlaceResult> {
        self.require_playing()?;
        let card = self
            .current
            .ok_or_else(|| PatienceError::Stale("no current card to place".into()))?;
        if card.rank != pile {
            return Err(PatienceError::Rejected(format!(
                "{} belongs on pile {}",
                card, card.rank
            )));
        }

        let from_own_pile = self.source == Some(pile);
        let completes_pile = self.face_up(pile) + 1 == CARDS_PER_PILE;

        self.piles.entry(pile).or_default().push(card);
        self.moves += 1;
        self.current = None;
        self.source = Some(pile);

        let self_completed = match self.rules {
            RulesVariant::Original => completes_pile && from_own_pile && self.face_down(pile) == 0,
            RulesVariant::Alternative => completes_pile && from_own_pile,
        };
        if self_completed {
            let won = self.all_complete() && !self.any_face_down();
            let message = if won {
                "every pile complete".to_string()
            } else {
                format!("pile {} completed from itself", pile)
            };
            return Ok(self.finish(won, message));
        }

        if pile == Rank::King {
            self.kings_revealed += 1;
            if self.kings_revealed as usize == CARDS_PER_PILE {
                let won = !self.any_face_down();
                let message = if won {
                    "every pile complete".to_string()
                } else {
                    "fourth king came out early".to_string()
                };
                return Ok(self.finish(won, message));
            }
        }

        if self.all_complete() && !self.any_face_down() {
            return Ok(self.finish(true, "every pile complete".into()));
        }

        Ok(PlaceResult {
            game_state: self.snapshot(),
            game_over: false,
            won: None,
            next_flip_pile: self.next_flip_pile(),
            message: None,
        })
    }

    fn finish(&mut self, won: bool, message: String) -> PlaceResult {
        self.status = if won { GameStatus::Won } else { GameStatus::Lost };
        PlaceResult {
            game_state: self.snapshot(),
            game_over: true,
            won: Some(won),
            next_flip_pile: None,
            message: Some(message),
        }
    }
}

#[derive(Debug, Default)]
struct Books {
    tables: HashMap<String, Table>,
    calls: HashMap<&'static str, usize>,
    in_flight: HashMap<&'static str, usize>,
    peak: HashMap<&'static str, usize>,
    failures: HashMap<&'static str, PatienceError>,
}

/// rules engine living in the same process
#[derive(Debug, Default)]
pub struct MockTable {
    books: Mutex<Books>,
    latency: Duration,
}

/// counts a request as outstanding until dropped
struct InFlight<'a> {
    books: &'a Mutex<Books>,
    op: &'static str,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(n) = self.books.lock().in_flight.get_mut(self.op) {
            *n = n.saturating_sub(1);
        }
    }
}

impl MockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// every request takes `latency` before it is answered
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// requests received for `op` (create, shuffle, start, flip, place, state, reset)
    pub fn calls(&self, op: &str) -> usize {
        self.books.lock().calls.get(op).copied().unwrap_or(0)
    }

    /// most requests of kind `op` ever outstanding at once
    pub fn max_in_flight(&self, op: &str) -> usize {
        self.books.lock().peak.get(op).copied().unwrap_or(0)
    }

    /// the next `op` request fails with `error` after its latency
    pub fn fail_next(&self, op: &'static str, error: PatienceError) {
        self.books.lock().failures.insert(op, error);
    }

    pub fn snapshot(&self, session_id: &str) -> Option<GameState> {
        self.books.lock().tables.get(session_id).map(Table::snapshot)
    }

    /// undealt ordering of a session
    pub fn ordering(&self, session_id: &str) -> Option<Vec<Card>> {
        self.books.lock().tables.get(session_id).map(|t| t.deck.clone())
    }

    async fn enter(&self, op: &'static str) -> Result<InFlight<'_>> {
        let failure = {
            let mut books = self.books.lock();
            *books.calls.entry(op).or_default() += 1;
            let now = {
                let n = books.in_flight.entry(op).or_default();
                *n += 1;
                *n
            };
            let peak = books.peak.entry(op).or_default();
            *peak = (*peak).max(now);
            books.failures.remove(op)
        };
        let flight = InFlight {
            books: &self.books,
            op,
        };

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(e) = failure {
            debug!("mock: injected {} failure: {}", op, e);
            return Err(e);
        }
        Ok(flight)
    }

    fn with_table<T>(&self, session_id: &str, f: impl FnOnce(&mut Table) -> Result<T>) -> Result<T> {
        let mut books = self.books.lock();
        let table = books
            .tables
            .get_mut(session_id)
            .ok_or_else(|| PatienceError::SessionNotFound(session_id.to_string()))?;
        f(table)
    }
}

#[async_trait::async_trait]
impl GameService for MockTable {
    async fn create(&self, session_id: &str, rules: RulesVariant) -> Result<GameState> {
        let _flight = self.enter("create").await?;
        let table = Table::new(rules);
        let state = table.snapshot();
        self.books.lock().tables.insert(session_id.to_string(), table);
        debug!("mock: created {} ({:?})", session_id, rules);
        Ok(state)
    }

    async fn shuffle(&self, session_id: &str, cut_point: u8) -> Result<ShuffleResult> {
        let _flight = self.enter("shuffle").await?;
        self.with_table(session_id, |t| t.shuffle(cut_point))
    }

    async fn start(&self, session_id: &str) -> Result<GameState> {
        let _flight = self.enter("start").await?;
        self.with_table(session_id, |t| {
            t.deal()?;
            Ok(t.snapshot())
        })
    }

    async fn flip(&self, session_id: &str, pile: Rank) -> Result<FlipResult> {
        let _flight = self.enter("flip").await?;
        self.with_table(session_id, |t| {
            let card = t.flip(pile)?;
            Ok(FlipResult {
                card,
                pile,
                game_state: t.snapshot(),
            })
        })
    }

    async fn place(&self, session_id: &str, pile: Rank) -> Result<PlaceResult> {
        let _flight = self.enter("place").await?;
        self.with_table(session_id, |t| t.place(pile))
    }

    async fn state(&self, session_id: &str) -> Result<GameState> {
        let _flight = self.enter("state").await?;
        self.with_table(session_id, |t| Ok(t.snapshot()))
    }

    async fn reset(&self, session_id: &str) -> Result<()> {
        let _flight = self.enter("reset").await?;
        self.with_table(session_id, |t| {
            *t = Table::new(t.rules);
            Ok(())
        })
    }
}
