//! HTTP surface: the Slack events webhook and housekeeping endpoints.
//!
//! Routes:
//! - `POST /slack/events` - Slack Events API callback (signature-verified)
//! - `GET /clear-history/{user_id}` - wipe a user's conversation history
//! - `GET /health` - liveness probe
//!
//! Event handling acknowledges Slack immediately with 200 and hands the
//! message to the responder loop through the bus; replies go out through
//! the Slack channel, never through this endpoint.

use crate::bus::InboundHandle;
use crate::error::Result;
use crate::events::InboundMessage;
use crate::session::SessionManager;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use hmac::{Hmac, Mac};
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed request before it is rejected as a replay.
const SIGNATURE_MAX_AGE_SECS: u64 = 60 * 5;

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Slack signing secret for request verification.
    pub signing_secret: String,
    /// Handle for enqueueing inbound messages.
    pub inbound: InboundHandle,
    /// Session manager for the history-clear endpoint.
    pub sessions: SessionManager,
    /// The bot's own user id, when known. Used to strip its mention from
    /// queries and to drop its own messages.
    pub bot_user_id: Option<String>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("bot_user_id", &self.bot_user_id)
            .finish_non_exhaustive()
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/slack/events", post(slack_events))
        .route("/clear-history/:user_id", get(clear_history))
        .route("/health", get(health))
        .with_state(state)
}

/// Bind and serve the HTTP surface until the process exits.
pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "events webhook listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn clear_history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Response {
    match state.sessions.clear(&user_id).await {
        Ok(()) => Json(json!({
            "status": "success",
            "message": format!("Chat history cleared for {user_id}"),
        }))
        .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "status": "error", "message": e.to_string() })),
        )
            .into_response(),
    }
}

async fn slack_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let timestamp = header_str(&headers, "x-slack-request-timestamp");
    let signature = header_str(&headers, "x-slack-signature");

    if !verify_signature(&state.signing_secret, timestamp, &body, signature) {
        warn!("rejected slack request with bad signature");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid signature" })),
        )
            .into_response();
    }

    let envelope: EventEnvelope = match serde_json::from_str(&body) {
        Ok(env) => env,
        Err(e) => {
            warn!(error = %e, "unparseable slack event payload");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "invalid payload" })),
            )
                .into_response();
        }
    };

    match envelope.kind.as_str() {
        "url_verification" => {
            info!("answering url verification challenge");
            Json(json!({ "challenge": envelope.challenge.unwrap_or_default() })).into_response()
        }
        "event_callback" => {
            if let Some(event) = &envelope.event
                && let Some(msg) = inbound_from_event(event, state.bot_user_id.as_deref())
            {
                debug!(sender = %msg.sender_id, chat = %msg.chat_id, "enqueueing slack event");
                if let Err(e) = state.inbound.publish(msg).await {
                    // Slack still gets a 200: it would otherwise retry the
                    // event against a bus that is already gone.
                    warn!(error = %e, "failed to enqueue slack event");
                }
            }
            StatusCode::OK.into_response()
        }
        other => {
            debug!(kind = %other, "ignoring slack payload type");
            StatusCode::OK.into_response()
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

/// Verify an Events API request signature against the signing secret.
pub fn verify_signature(secret: &str, timestamp: &str, body: &str, signature: &str) -> bool {
    verify_signature_at(
        secret,
        timestamp,
        body,
        signature,
        crate::util::timestamp_secs(),
    )
}

/// Signature check against an explicit clock, for testability.
fn verify_signature_at(
    secret: &str,
    timestamp: &str,
    body: &str,
    signature: &str,
    now_secs: u64,
) -> bool {
    let Ok(ts) = timestamp.parse::<u64>() else {
        return false;
    };
    if now_secs.abs_diff(ts) > SIGNATURE_MAX_AGE_SECS {
        return false;
    }

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(format!("v0:{timestamp}:{body}").as_bytes());
    let expected = format!("v0={}", hex::encode(mac.finalize().into_bytes()));

    // Constant-time comparison
    expected.len() == signature.len()
        && expected
            .bytes()
            .zip(signature.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

/// Convert a Slack event into an inbound message, or `None` when the
/// event is not addressed to the responder (bot echoes, edits, channel
/// chatter outside mentions).
fn inbound_from_event(event: &SlackEvent, bot_user_id: Option<&str>) -> Option<InboundMessage> {
    // Skip messages from bots (including our own replies) and message
    // edits/deletions, which arrive with a subtype.
    if event.bot_id.is_some() || event.subtype.is_some() {
        return None;
    }

    let user = event.user.as_deref()?;
    let channel = event.channel.as_deref()?;
    if bot_user_id == Some(user) {
        return None;
    }

    let raw = event.text.as_deref().unwrap_or_default();
    let content = match event.kind.as_str() {
        "app_mention" => strip_mentions(raw, bot_user_id),
        "message" if event.channel_type.as_deref() == Some("im") => raw.trim().to_string(),
        _ => return None,
    };

    let mut msg = InboundMessage::new("slack", user, channel, content);
    if let Some(ts) = &event.thread_ts {
        msg = msg.with_thread(ts.clone());
    }
    Some(msg)
}

/// Remove the bot's `<@U...>` mention from the text, leaving the query.
///
/// When the bot's user id is unknown, only leading mentions are stripped
/// so that mentions of other users survive inside the query.
fn strip_mentions(text: &str, bot_user_id: Option<&str>) -> String {
    static LEADING: OnceLock<Regex> = OnceLock::new();

    let stripped = match bot_user_id {
        Some(id) => text.replace(&format!("<@{id}>"), ""),
        None => {
            let re = LEADING
                .get_or_init(|| Regex::new(r"^(?:\s*<@[A-Z0-9]+>)+").expect("valid regex"));
            re.replace(text, "").into_owned()
        }
    };

    stripped.trim().to_string()
}

#[derive(Debug, Deserialize)]
struct EventEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    challenge: Option<String>,
    #[serde(default)]
    event: Option<SlackEvent>,
}

#[derive(Debug, Deserialize)]
struct SlackEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    channel_type: Option<String>,
    #[serde(default)]
    thread_ts: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    subtype: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MessageBus;
    use crate::session::{MemoryStorage, Turn};
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;
    use tower::ServiceExt;

    const SECRET: &str = "8f742231b10e8888abcd99yyyzzz85a5";

    fn sign(secret: &str, timestamp: &str, body: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("v0:{timestamp}:{body}").as_bytes());
        format!("v0={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn test_state(bus: &MessageBus) -> AppState {
        AppState {
            signing_secret: SECRET.to_string(),
            inbound: bus.inbound_handle(),
            sessions: SessionManager::new(MemoryStorage::new()),
            bot_user_id: Some("UBOT".to_string()),
        }
    }

    fn signed_request(body: &str) -> Request<Body> {
        let ts = crate::util::timestamp_secs().to_string();
        Request::builder()
            .method("POST")
            .uri("/slack/events")
            .header("content-type", "application/json")
            .header("x-slack-request-timestamp", &ts)
            .header("x-slack-signature", sign(SECRET, &ts, body))
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[test]
    fn test_signature_round_trip() {
        let body = r#"{"type":"event_callback"}"#;
        let sig = sign(SECRET, "1600000000", body);
        assert!(verify_signature_at(SECRET, "1600000000", body, &sig, 1_600_000_010));
    }

    #[test]
    fn test_signature_rejects_tampered_body() {
        let sig = sign(SECRET, "1600000000", "original");
        assert!(!verify_signature_at(SECRET, "1600000000", "tampered", &sig, 1_600_000_010));
    }

    #[test]
    fn test_signature_rejects_stale_timestamp() {
        let body = "payload";
        let sig = sign(SECRET, "1600000000", body);
        // Six minutes later: outside the replay window.
        assert!(!verify_signature_at(SECRET, "1600000000", body, &sig, 1_600_000_360));
    }

    #[test]
    fn test_strip_known_bot_mention() {
        assert_eq!(
            strip_mentions("<@UBOT> what is rust?", Some("UBOT")),
            "what is rust?"
        );
        // Mentions of other users survive.
        assert_eq!(
            strip_mentions("<@UBOT> ask <@UOTHER> too", Some("UBOT")),
            "ask <@UOTHER> too"
        );
    }

    #[test]
    fn test_strip_leading_mentions_when_bot_unknown() {
        assert_eq!(strip_mentions("<@U1> <@U2> hello", None), "hello");
        assert_eq!(strip_mentions("hello <@U1>", None), "hello <@U1>");
    }

    #[test]
    fn test_inbound_from_event_filters() {
        let mention = SlackEvent {
            kind: "app_mention".to_string(),
            user: Some("U1".to_string()),
            text: Some("<@UBOT> hi".to_string()),
            channel: Some("C1".to_string()),
            channel_type: None,
            thread_ts: Some("123.456".to_string()),
            bot_id: None,
            subtype: None,
        };
        let msg = inbound_from_event(&mention, Some("UBOT")).unwrap();
        assert_eq!(msg.sender_id, "U1");
        assert_eq!(msg.content, "hi");
        assert_eq!(msg.thread_ts.as_deref(), Some("123.456"));

        // Bot echoes are dropped.
        let echo = SlackEvent {
            bot_id: Some("B1".to_string()),
            ..mention
        };
        assert!(inbound_from_event(&echo, Some("UBOT")).is_none());
    }

    #[test]
    fn test_inbound_from_event_dm_requires_im() {
        let dm = SlackEvent {
            kind: "message".to_string(),
            user: Some("U1".to_string()),
            text: Some("hello".to_string()),
            channel: Some("D1".to_string()),
            channel_type: Some("im".to_string()),
            thread_ts: None,
            bot_id: None,
            subtype: None,
        };
        assert!(inbound_from_event(&dm, None).is_some());

        let channel_chatter = SlackEvent {
            channel_type: Some("channel".to_string()),
            ..dm
        };
        assert!(inbound_from_event(&channel_chatter, None).is_none());
    }

    #[tokio::test]
    async fn test_url_verification_echoes_challenge() {
        let bus = MessageBus::new();
        let app = router(test_state(&bus));

        let body = r#"{"type":"url_verification","challenge":"abc123"}"#;
        let response = app.oneshot(signed_request(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["challenge"], "abc123");
    }

    #[tokio::test]
    async fn test_bad_signature_is_rejected() {
        let bus = MessageBus::new();
        let app = router(test_state(&bus));

        let body = r#"{"type":"url_verification","challenge":"abc123"}"#;
        let request = Request::builder()
            .method("POST")
            .uri("/slack/events")
            .header("x-slack-request-timestamp", "1600000000")
            .header("x-slack-signature", "v0=deadbeef")
            .body(Body::from(body))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_event_callback_enqueues_message() {
        let bus = MessageBus::new();
        let app = router(test_state(&bus));

        let body = serde_json::to_string(&json!({
            "type": "event_callback",
            "event": {
                "type": "app_mention",
                "user": "U42",
                "text": "<@UBOT> hello bot",
                "channel": "C7",
                "ts": "1730000000.1000"
            }
        }))
        .unwrap();

        let response = app.oneshot(signed_request(&body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let msg = bus
            .consume_inbound_timeout(std::time::Duration::from_millis(200))
            .await
            .expect("event should reach the bus");
        assert_eq!(msg.sender_id, "U42");
        assert_eq!(msg.chat_id, "C7");
        assert_eq!(msg.content, "hello bot");
    }

    #[tokio::test]
    async fn test_clear_history_endpoint() {
        let bus = MessageBus::new();
        let state = test_state(&bus);
        state
            .sessions
            .append("U9", Turn::user("remember me"))
            .await
            .unwrap();
        let app = router(state.clone());

        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/clear-history/U9")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        assert!(state.sessions.load("U9").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_health() {
        let bus = MessageBus::new();
        let app = router(test_state(&bus));

        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
