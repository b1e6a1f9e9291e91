//! authoritative game snapshot as reported by the game service

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::card::{Card, Rank, CARDS_PER_PILE, DECK_SIZE};
use crate::error::{PatienceError, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    #[default]
    Waiting,
    Dealing,
    Playing,
    Won,
    Lost,
}

impl GameStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, GameStatus::Won | GameStatus::Lost)
    }
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GameStatus::Waiting => "waiting",
            GameStatus::Dealing => "dealing",
            GameStatus::Playing => "playing",
            GameStatus::Won => "won",
            GameStatus::Lost => "lost",
        };
        f.write_str(s)
    }
}

/// rules variant, interpreted by the game service only
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RulesVariant {
    #[default]
    Original,
    Alternative,
}

impl std::str::FromStr for RulesVariant {
    type Err = PatienceError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "original" => Ok(RulesVariant::Original),
            "alternative" => Ok(RulesVariant::Alternative),
            other => Err(PatienceError::InvalidArgument(format!("unknown rules variant: {}", other))),
        }
    }
}

/// server-authoritative snapshot; never edited locally, only replaced
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    pub status: GameStatus,
    #[serde(default)]
    pub current_card: Option<Card>,
    #[serde(default)]
    pub current_card_source: Option<Rank>,
    /// face-up cards per pile, bottom first
    #[serde(default)]
    pub piles: BTreeMap<Rank, Vec<Card>>,
    /// face-down card count per pile
    #[serde(default)]
    pub face_down_cards: BTreeMap<Rank, u8>,
    #[serde(default)]
    pub kings_revealed: u8,
    /// undealt cards still in the deck
    #[serde(default)]
    pub cards_remaining: u8,
    #[serde(default)]
    pub moves_count: u32,
    #[serde(default)]
    pub shuffle_count: u32,
    #[serde(default)]
    pub next_flip_pile: Option<Rank>,
    #[serde(default)]
    pub game_rules: RulesVariant,
}

impl GameState {
    pub fn face_down(&self, pile: Rank) -> usize {
        self.face_down_cards.get(&pile).copied().unwrap_or(0) as usize
    }

    pub fn face_up(&self, pile: Rank) -> &[Card] {
        self.piles.get(&pile).map(Vec::as_slice).unwrap_or(&[])
    }

    /// cards on the table for a pile, either face
    pub fn pile_total(&self, pile: Rank) -> usize {
        self.face_down(pile) + self.face_up(pile).len()
    }

    pub fn piles_empty(&self) -> bool {
        Rank::ALL.iter().all(|&p| self.pile_total(p) == 0)
    }

    pub fn fully_dealt(&self) -> bool {
        Rank::ALL.iter().all(|&p| self.pile_total(p) == CARDS_PER_PILE)
    }

    /// pile the player may act on next: the revealed card's home pile while a
    /// card is showing, otherwise the pile eligible for the next reveal
    pub fn interactable_pile(&self) -> Option<Rank> {
        if self.status != GameStatus::Playing {
            return None;
        }
        match self.current_card {
            Some(card) => Some(card.rank),
            None => self.next_flip_pile,
        }
    }

    /// a placed card sits on its pile until the replacement is revealed, so
    /// the pile holding the turn may carry one card over
    fn pile_capacity(&self, pile: Rank) -> usize {
        if self.current_card.is_none() && self.next_flip_pile == Some(pile) {
            CARDS_PER_PILE + 1
        } else {
            CARDS_PER_PILE
        }
    }

    /// per-pile and whole-table card accounting
    pub fn check_invariants(&self) -> Result<()> {
        for &pile in Rank::ALL.iter() {
            if self.face_up(pile).len() > CARDS_PER_PILE {
                return Err(PatienceError::Invariant(format!(
                    "pile {} has {} face-up cards",
                    pile,
                    self.face_up(pile).len()
                )));
            }
            if self.pile_total(pile) > self.pile_capacity(pile) {
                return Err(PatienceError::Invariant(format!(
                    "pile {} holds {} cards",
                    pile,
                    self.pile_total(pile)
                )));
            }
        }

        if self.kings_revealed > 4 {
            return Err(PatienceError::Invariant(format!(
                "{} kings revealed",
                self.kings_revealed
            )));
        }

        let on_table: usize = Rank::ALL.iter().map(|&p| self.pile_total(p)).sum();
        let total = on_table
            + usize::from(self.current_card.is_some())
            + self.cards_remaining as usize;
        if total != DECK_SIZE {
            return Err(PatienceError::Invariant(format!(
                "{} cards accounted for, expected {}",
                total, DECK_SIZE
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::Suit;

    fn dealt_state() -> GameState {
        let mut state = GameState {
            status: GameStatus::Playing,
            shuffle_count: 1,
            next_flip_pile: Some(Rank::King),
            ..Default::default()
        };
        for rank in Rank::ALL {
            state.face_down_cards.insert(rank, 4);
            state.piles.insert(rank, Vec::new());
        }
        state
    }

    #[test]
    fn test_waiting_state_accounts_for_deck() {
        let state = GameState {
            cards_remaining: 52,
            ..Default::default()
        };
        assert!(state.check_invariants().is_ok());
        assert!(state.piles_empty());
    }

    #[test]
    fn test_dealt_state_invariants() {
        let mut state = dealt_state();
        assert!(state.check_invariants().is_ok());
        assert!(state.fully_dealt());

        // reveal a card: it leaves the face-down count and is held as current
        state.face_down_cards.insert(Rank::King, 3);
        state.current_card = Some(Card::new(Rank::Five, Suit::Clubs));
        assert!(state.check_invariants().is_ok());

        state.current_card = None;
        assert!(state.check_invariants().is_err());
    }

    #[test]
    fn test_overfull_pile_rejected() {
        let mut state = dealt_state();
        state.face_down_cards.insert(Rank::Ace, 3);
        state.piles.insert(Rank::Ace, vec![Card::new(Rank::Ace, Suit::Hearts); 2]);
        state.face_down_cards.insert(Rank::Two, 3);
        assert!(matches!(state.check_invariants(), Err(PatienceError::Invariant(_))));
    }

    #[test]
    fn test_placed_card_waits_on_turn_pile() {
        // 5C came off the king pile and was placed on the five pile
        let mut state = dealt_state();
        state.face_down_cards.insert(Rank::King, 3);
        state.piles.insert(Rank::Five, vec![Card::new(Rank::Five, Suit::Clubs)]);
        state.next_flip_pile = Some(Rank::Five);
        assert!(state.check_invariants().is_ok());

        // the extra card is only allowed on the pile that flips next
        state.next_flip_pile = Some(Rank::King);
        assert!(state.check_invariants().is_err());
    }

    #[test]
    fn test_interactable_pile() {
        let mut state = dealt_state();
        assert_eq!(state.interactable_pile(), Some(Rank::King));

        state.current_card = Some(Card::new(Rank::Seven, Suit::Spades));
        assert_eq!(state.interactable_pile(), Some(Rank::Seven));

        state.status = GameStatus::Lost;
        assert_eq!(state.interactable_pile(), None);
    }

    #[test]
    fn test_wire_format() {
        let json = r#"{
            "status": "playing",
            "current_card": "0H",
            "current_card_source": "K",
            "piles": {"A": [], "0": ["0S"]},
            "face_down_cards": {"A": 4, "K": 3},
            "kings_revealed": 0,
            "cards_remaining": 0,
            "moves_count": 1,
            "shuffle_count": 3,
            "next_flip_pile": null,
            "game_rules": "alternative"
        }"#;
        let state: GameState = serde_json::from_str(json).unwrap();
        assert_eq!(state.status, GameStatus::Playing);
        assert_eq!(state.current_card, Some(Card::new(Rank::Ten, Suit::Hearts)));
        assert_eq!(state.face_down(Rank::King), 3);
        assert_eq!(state.face_up(Rank::Ten).len(), 1);
        assert_eq!(state.game_rules, RulesVariant::Alternative);
    }
}
