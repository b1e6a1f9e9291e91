//! end-to-end sessions against the in-process table

use std::sync::Arc;
use std::time::Duration;

use clock_patience::{
    AutoPlayExit, Card, ClientConfig, Deck, Event, FixedLayout, GameMode, GameStatus, MockTable,
    Orchestrator, PatienceError, Rank, Suit, Timings,
};
use tokio::sync::mpsc::UnboundedReceiver;

fn drain(rx: &mut UnboundedReceiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

fn setup(table: Arc<MockTable>, config: ClientConfig) -> (Orchestrator, UnboundedReceiver<Event>) {
    Orchestrator::new(table, Arc::new(FixedLayout::default()), config)
}

#[test]
fn test_even_cut_interleaves_halves() {
    let deck = Deck::ordered().riffle(26).unwrap();
    let cards = deck.cards();
    assert_eq!(cards[0], Card::new(Rank::Ace, Suit::Hearts));
    assert_eq!(cards[1], Card::new(Rank::Ace, Suit::Clubs));
    assert_eq!(cards[2], Card::new(Rank::Two, Suit::Hearts));
    assert_eq!(cards[51], Card::new(Rank::King, Suit::Spades));
    assert!(deck.is_permutation_of(&Deck::ordered()));
}

#[tokio::test(start_paused = true)]
async fn test_shuffled_order_reaches_the_deal() {
    let table = Arc::new(MockTable::new());
    let config = ClientConfig {
        mode: GameMode::Manual,
        timings: Timings::instant(),
        ..Default::default()
    };
    let (game, _rx) = setup(table.clone(), config);
    let session = game.new_game().await.unwrap();

    let outcomes = game.batch_shuffle(2).await.unwrap();
    let expected = Deck::ordered().riffle(20).unwrap().riffle(27).unwrap();
    assert_eq!(outcomes[1].deck_after, expected);
    assert_eq!(table.ordering(&session).unwrap(), expected.cards().to_vec());

    game.start_game(None).await.unwrap();
    let state = table.snapshot(&session).unwrap();
    assert!(state.fully_dealt());
    assert_eq!(state.status, GameStatus::Playing);
}

#[tokio::test(start_paused = true)]
async fn test_headless_game_runs_to_an_outcome() {
    let table = Arc::new(MockTable::new());
    let (game, mut rx) = setup(table.clone(), ClientConfig::headless());
    game.new_game().await.unwrap();
    game.batch_shuffle(5).await.unwrap();
    game.start_game(Some("rain tomorrow?".into())).await.unwrap();

    let exit = game.wait_auto_play().await.unwrap().unwrap();
    assert!(matches!(
        exit,
        AutoPlayExit::Finished(GameStatus::Won) | AutoPlayExit::Finished(GameStatus::Lost)
    ));

    let events = drain(&mut rx);
    let outcomes: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            Event::Outcome(outcome) => Some(outcome.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].question.as_deref(), Some("rain tomorrow?"));

    // every reveal was placed on its own pile
    let placed: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            Event::CardPlaced { card, pile } => Some((*card, *pile)),
            _ => None,
        })
        .collect();
    assert!(!placed.is_empty());
    assert!(placed.iter().all(|(card, pile)| card.rank == *pile));
    assert!(events.contains(&Event::AutoPlay { active: false }));
}

#[tokio::test(start_paused = true)]
async fn test_stopped_auto_play_issues_no_more_moves() {
    let table = Arc::new(MockTable::new());
    let config = ClientConfig {
        mode: GameMode::Auto,
        ..Default::default()
    };
    let (game, _rx) = setup(table.clone(), config);
    game.new_game().await.unwrap();
    game.batch_shuffle(1).await.unwrap();
    game.start_game(None).await.unwrap();
    assert!(game.is_auto_playing());

    // a few moves in, then stop mid-pacing
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(game.stop_auto_play());
    let moves = table.calls("flip") + table.calls("place");

    assert_eq!(game.wait_auto_play().await, Some(Ok(AutoPlayExit::Cancelled)));
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(table.calls("flip") + table.calls("place"), moves);
    assert!(!game.is_auto_playing());
}

#[tokio::test(start_paused = true)]
async fn test_batch_out_of_range_is_refused() {
    let table = Arc::new(MockTable::new());
    let (game, _rx) = setup(table.clone(), ClientConfig::headless());
    game.new_game().await.unwrap();

    for count in [0, 11] {
        assert!(matches!(
            game.batch_shuffle(count).await,
            Err(PatienceError::InvalidArgument(_))
        ));
    }
    assert_eq!(table.calls("shuffle"), 0);
    // refusal releases the activity slot
    assert_eq!(game.activity(), None);
}
