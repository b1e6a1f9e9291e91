//! clock-patience: client-side controller for clock patience sessions
//!
//! the game service owns the rules and the deck. this crate mirrors its
//! state, presents shuffles and deals as timed event streams, and can play
//! a session unattended.
//!
//! ## components
//!
//! - `mirror`: last authoritative snapshot plus local presentation flags
//! - `shuffle`: phased shuffle presentation, single and batched
//! - `deal`: 52 timed card arrivals once pile destinations are measured
//! - `autoplay`: cancellable flip/place loop with re-confirmation
//! - `orchestrator`: one activity at a time, refresh after every mutation
//!
//! ## usage
//!
//! ```rust,ignore
//! let service = Arc::new(HttpGameService::from_config(&config)?);
//! let (game, mut events) = Orchestrator::new(service, Arc::new(FixedLayout::default()), config);
//!
//! game.new_game().await?;
//! game.batch_shuffle(3).await?;
//! game.start_game(Some("should i ship it?".into())).await?;
//!
//! while let Some(event) = events.recv().await {
//!     if let Event::Outcome(outcome) = event {
//!         println!("{}", outcome.status);
//!         break;
//!     }
//! }
//! ```

pub mod autoplay;
pub mod card;
pub mod config;
pub mod deal;
pub mod error;
pub mod event;
pub mod http;
pub mod mirror;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod orchestrator;
pub mod service;
pub mod shuffle;
pub mod signal;
pub mod state;

pub use autoplay::{AutoPlayExit, AutoPlayHandle, AutoPlayLoop, MoveExecutor};
pub use card::{Card, Deck, Rank, Suit, CARDS_PER_PILE, DECK_SIZE};
pub use config::{batch_cut_point, ClientConfig, GameMode, Timings};
pub use deal::{DealRun, DealSynchronizer, FixedLayout, PileLayout};
pub use error::{PatienceError, Result};
pub use event::{Cue, DealStep, Event, EventSink, NoticeLevel, Outcome, Point};
pub use http::HttpGameService;
pub use mirror::{MergeEffect, PresentationState, SharedMirror, StateMirror};
#[cfg(any(test, feature = "mock"))]
pub use mock::MockTable;
pub use orchestrator::{generate_session_id, Activity, Orchestrator, ShuffleTicket};
pub use service::{FlipResult, GameService, PlaceResult, ShuffleResult};
pub use shuffle::{ShuffleOutcome, ShufflePhase, ShufflePipeline, MAX_BATCH};
pub use signal::{CancelFlag, Channel, PendingOps};
pub use state::{GameState, GameStatus, RulesVariant};
