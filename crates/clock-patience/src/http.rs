//! http client for the game service

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::card::Rank;
use crate::config::ClientConfig;
use crate::error::{PatienceError, Result};
use crate::service::{FlipResult, GameService, PlaceResult, ShuffleResult};
use crate::state::{GameState, RulesVariant};

/// service messages meaning the action target already moved on
const STALE_MARKERS: &[&str] = &[
    "no current card",
    "no hay carta actual",
    "already revealed",
    "not eligible",
    "no face-down cards",
    "no hay cartas boca abajo",
];

#[derive(Clone)]
pub struct HttpGameService {
    base_url: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct StateBody {
    game_state: GameState,
}

impl HttpGameService {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        Ok(Self {
            base_url: config.server_url.trim_end_matches('/').to_string(),
            client: builder.build()?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, route: &str) -> String {
        format!("{}/{}", self.base_url, route)
    }

    async fn post<T: DeserializeOwned>(&self, route: &str, session_id: &str, body: Value) -> Result<T> {
        debug!("POST /{} game_id={}", route, session_id);
        let response = self.client.post(self.url(route)).json(&body).send().await?;
        decode(session_id, response).await
    }

    async fn get<T: DeserializeOwned>(&self, route: &str, session_id: &str) -> Result<T> {
        debug!("GET /{} game_id={}", route, session_id);
        let response = self
            .client
            .get(self.url(route))
            .query(&[("game_id", session_id)])
            .send()
            .await?;
        decode(session_id, response).await
    }
}

async fn decode<T: DeserializeOwned>(session_id: &str, response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let text = response.text().await?;
    decode_body(status, &text, session_id)
}

/// map a service answer onto the result or the error it stands for
fn decode_body<T: DeserializeOwned>(status: StatusCode, text: &str, session_id: &str) -> Result<T> {
    let body: Option<Value> = serde_json::from_str(text).ok();
    let message = body
        .as_ref()
        .and_then(|b| b.get("error").or_else(|| b.get("message")))
        .and_then(Value::as_str)
        .unwrap_or("no detail")
        .to_string();

    if status == StatusCode::NOT_FOUND {
        return Err(PatienceError::SessionNotFound(session_id.to_string()));
    }
    if status.is_server_error() {
        return Err(PatienceError::Transport(format!("http {}: {}", status.as_u16(), message)));
    }
    let body = body.ok_or_else(|| {
        PatienceError::Malformed(format!("http {}: not json ({})", status.as_u16(), text))
    })?;
    let success = body.get("success").and_then(Value::as_bool).unwrap_or(true);
    if status.is_client_error() || !success {
        return Err(classify_rejection(message));
    }

    Ok(serde_json::from_value(body)?)
}

/// split service rejections into benign staleness and real refusals
pub fn classify_rejection(message: String) -> PatienceError {
    let lower = message.to_lowercase();
    if STALE_MARKERS.iter().any(|m| lower.contains(m)) {
        PatienceError::Stale(message)
    } else {
        PatienceError::Rejected(message)
    }
}

#[async_trait::async_trait]
impl GameService for HttpGameService {
    async fn create(&self, session_id: &str, rules: RulesVariant) -> Result<GameState> {
        let body: StateBody = self
            .post("new", session_id, json!({ "game_id": session_id, "game_rules": rules }))
            .await?;
        Ok(body.game_state)
    }

    async fn shuffle(&self, session_id: &str, cut_point: u8) -> Result<ShuffleResult> {
        self.post("shuffle", session_id, json!({ "game_id": session_id, "cut_point": cut_point }))
            .await
    }

    async fn start(&self, session_id: &str) -> Result<GameState> {
        let body: StateBody = self.post("start", session_id, json!({ "game_id": session_id })).await?;
        Ok(body.game_state)
    }

    async fn flip(&self, session_id: &str, pile: Rank) -> Result<FlipResult> {
        self.post("flip-card", session_id, json!({ "game_id": session_id, "pile": pile }))
            .await
    }

    async fn place(&self, session_id: &str, pile: Rank) -> Result<PlaceResult> {
        self.post("place-card", session_id, json!({ "game_id": session_id, "pile": pile }))
            .await
    }

    async fn state(&self, session_id: &str) -> Result<GameState> {
        let body: StateBody = self.get("state", session_id).await?;
        Ok(body.game_state)
    }

    async fn reset(&self, session_id: &str) -> Result<()> {
        let _: Value = self.post("reset", session_id, json!({ "game_id": session_id })).await?;
        Ok(())
    }
}
