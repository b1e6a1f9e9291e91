//! cards, ranks and the 52-card deck
//!
//! cards travel over the wire as two-character codes: rank symbol
//! (A, 2-9, 0 for ten, J, Q, K) followed by suit symbol (S, D, C, H).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{PatienceError, Result};

/// number of cards in a deck
pub const DECK_SIZE: usize = 52;

/// cards dealt to each pile
pub const CARDS_PER_PILE: usize = 4;

/// card rank, doubles as the pile identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Rank {
    #[serde(rename = "A")]
    Ace,
    #[serde(rename = "2")]
    Two,
    #[serde(rename = "3")]
    Three,
    #[serde(rename = "4")]
    Four,
    #[serde(rename = "5")]
    Five,
    #[serde(rename = "6")]
    Six,
    #[serde(rename = "7")]
    Seven,
    #[serde(rename = "8")]
    Eight,
    #[serde(rename = "9")]
    Nine,
    #[serde(rename = "0")]
    Ten,
    #[serde(rename = "J")]
    Jack,
    #[serde(rename = "Q")]
    Queen,
    #[serde(rename = "K")]
    King,
}

impl Rank {
    /// all ranks in deal order (A first, K last)
    pub const ALL: [Rank; 13] = [
        Rank::Ace,
        Rank::Two,
        Rank::Three,
        Rank::Four,
        Rank::Five,
        Rank::Six,
        Rank::Seven,
        Rank::Eight,
        Rank::Nine,
        Rank::Ten,
        Rank::Jack,
        Rank::Queen,
        Rank::King,
    ];

    pub fn symbol(self) -> char {
        match self {
            Rank::Ace => 'A',
            Rank::Two => '2',
            Rank::Three => '3',
            Rank::Four => '4',
            Rank::Five => '5',
            Rank::Six => '6',
            Rank::Seven => '7',
            Rank::Eight => '8',
            Rank::Nine => '9',
            Rank::Ten => '0',
            Rank::Jack => 'J',
            Rank::Queen => 'Q',
            Rank::King => 'K',
        }
    }

    pub fn from_symbol(symbol: char) -> Option<Self> {
        Rank::ALL.into_iter().find(|r| r.symbol() == symbol)
    }

    /// position in deal order
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

impl FromStr for Rank {
    type Err = PatienceError;

    fn from_str(s: &str) -> Result<Self> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Rank::from_symbol(c)
                .ok_or_else(|| PatienceError::InvalidArgument(format!("unknown pile: {}", s))),
            _ => Err(PatienceError::InvalidArgument(format!("unknown pile: {}", s))),
        }
    }
}

/// piles in the order cards are dealt onto them
pub const DEAL_ORDER: [Rank; 13] = Rank::ALL;

/// order in which piles are searched for face-down cards when no source pile applies
pub const FLIP_SEARCH_ORDER: [Rank; 13] = [
    Rank::King,
    Rank::Queen,
    Rank::Jack,
    Rank::Ten,
    Rank::Nine,
    Rank::Eight,
    Rank::Seven,
    Rank::Six,
    Rank::Five,
    Rank::Four,
    Rank::Three,
    Rank::Two,
    Rank::Ace,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Suit {
    #[serde(rename = "S")]
    Spades,
    #[serde(rename = "D")]
    Diamonds,
    #[serde(rename = "C")]
    Clubs,
    #[serde(rename = "H")]
    Hearts,
}

impl Suit {
    /// canonical deck order: hearts, diamonds, clubs, spades
    pub const CANONICAL: [Suit; 4] = [Suit::Hearts, Suit::Diamonds, Suit::Clubs, Suit::Spades];

    pub fn symbol(self) -> char {
        match self {
            Suit::Spades => 'S',
            Suit::Diamonds => 'D',
            Suit::Clubs => 'C',
            Suit::Hearts => 'H',
        }
    }

    pub fn from_symbol(symbol: char) -> Option<Self> {
        Suit::CANONICAL.into_iter().find(|s| s.symbol() == symbol)
    }
}

/// immutable playing card, identified only by its code
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Card {
    pub rank: Rank,
    pub suit: Suit,
}

impl Card {
    pub const fn new(rank: Rank, suit: Suit) -> Self {
        Self { rank, suit }
    }

    /// two-character wire code, e.g. `0H` for the ten of hearts
    pub fn code(&self) -> String {
        format!("{}{}", self.rank.symbol(), self.suit.symbol())
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.rank.symbol(), self.suit.symbol())
    }
}

impl FromStr for Card {
    type Err = PatienceError;

    fn from_str(code: &str) -> Result<Self> {
        let mut chars = code.chars();
        let parsed = match (chars.next(), chars.next(), chars.next()) {
            (Some(r), Some(s), None) => Rank::from_symbol(r).zip(Suit::from_symbol(s)),
            _ => None,
        };

        parsed
            .map(|(rank, suit)| Card { rank, suit })
            .ok_or_else(|| PatienceError::Malformed(format!("invalid card code: {:?}", code)))
    }
}

impl TryFrom<String> for Card {
    type Error = PatienceError;

    fn try_from(code: String) -> Result<Self> {
        code.parse()
    }
}

impl From<Card> for String {
    fn from(card: Card) -> Self {
        card.code()
    }
}

/// ordered sequence of exactly 52 distinct cards
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Card>", into = "Vec<Card>")]
pub struct Deck {
    cards: Vec<Card>,
}

impl Deck {
    /// canonical ordering a fresh session holds: AH..KH, AD..KD, AC..KC, AS..KS
    pub fn ordered() -> Self {
        let cards = Suit::CANONICAL
            .iter()
            .flat_map(|&suit| Rank::ALL.iter().map(move |&rank| Card::new(rank, suit)))
            .collect();
        Self { cards }
    }

    /// validate an ordering: 52 cards, no duplicates
    pub fn from_cards(cards: Vec<Card>) -> Result<Self> {
        if cards.len() != DECK_SIZE {
            return Err(PatienceError::Malformed(format!(
                "deck has {} cards, expected {}",
                cards.len(),
                DECK_SIZE
            )));
        }

        let mut seen = HashSet::with_capacity(DECK_SIZE);
        for card in &cards {
            if !seen.insert(*card) {
                return Err(PatienceError::Malformed(format!("duplicate card {} in deck", card)));
            }
        }

        Ok(Self { cards })
    }

    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    pub fn codes(&self) -> Vec<String> {
        self.cards.iter().map(Card::code).collect()
    }

    /// perfect riffle: split at `cut`, alternate starting with the top
    /// segment, then append what is left of the longer segment
    pub fn riffle(&self, cut: usize) -> Result<Deck> {
        if !(1..DECK_SIZE).contains(&cut) {
            return Err(PatienceError::InvalidArgument(format!(
                "cut point must be 1-51, got {}",
                cut
            )));
        }

        let (top, bottom) = self.cards.split_at(cut);
        let mut shuffled = Vec::with_capacity(DECK_SIZE);
        for i in 0..top.len().max(bottom.len()) {
            if let Some(card) = top.get(i) {
                shuffled.push(*card);
            }
            if let Some(card) = bottom.get(i) {
                shuffled.push(*card);
            }
        }

        Ok(Deck { cards: shuffled })
    }

    /// true when both orderings hold the same 52 cards
    pub fn is_permutation_of(&self, other: &Deck) -> bool {
        let mine: HashSet<_> = self.cards.iter().collect();
        other.cards.iter().all(|c| mine.contains(c))
    }
}

impl Default for Deck {
    fn default() -> Self {
        Self::ordered()
    }
}

impl TryFrom<Vec<Card>> for Deck {
    type Error = PatienceError;

    fn try_from(cards: Vec<Card>) -> Result<Self> {
        Deck::from_cards(cards)
    }
}

impl From<Deck> for Vec<Card> {
    fn from(deck: Deck) -> Self {
        deck.cards
    }
}
