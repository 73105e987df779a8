use std::{
    collections::HashMap,
    convert::Infallible,
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    Router,
    body::Body,
    extract::Query,
    http::{StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::get,
};
use client::{
    api::HttpTaskApi,
    auth::{AuthSession, TokenSession},
    events::{self, EventReceiver, StreamState, SyncEvent},
    stream::UpdateStream,
};
use futures_util::{StreamExt, stream};
use shared::{
    config::{RetryConfig, SyncConfig},
    models::{ChatId, UpdateEvent},
};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use url::Url;

const WAIT: Duration = Duration::from_secs(5);

const EVENTS: &str = concat!(
    "event: ping\ndata: {}\n\n",
    ": keep-alive\n",
    "event: update\ndata: not json\n\n",
    "event: update\ndata: {\"type\":\"heartbeat\"}\n\n",
    "event: update\ndata: {\"type\":\"new_tasks\",\"chat_id\":42,\"data\":{\"count\":2}}\n\n",
);

type Tokens = Arc<Mutex<Vec<String>>>;

/// Rejects the `stale` token; otherwise sends `EVENTS` and, when `hold` is
/// set, keeps the connection open.
fn backend(tokens: &Tokens, hold: bool) -> Router {
    let tokens = tokens.clone();
    Router::new().route(
        "/tasks/updates/stream",
        get(move |Query(query): Query<HashMap<String, String>>| {
            let tokens = tokens.clone();
            async move {
                let token = query.get("token").cloned().unwrap_or_default();
                tokens.lock().unwrap().push(token.clone());
                if token == "stale" {
                    return StatusCode::UNAUTHORIZED.into_response();
                }
                let body = if hold {
                    Body::from_stream(
                        stream::once(async { Ok::<_, Infallible>(EVENTS) })
                            .chain(stream::pending()),
                    )
                } else {
                    Body::from(EVENTS)
                };
                Response::builder()
                    .header(CONTENT_TYPE, "text/event-stream")
                    .body(body)
                    .unwrap()
            }
        }),
    )
}

async fn serve(router: Router) -> Url {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    Url::parse(&format!("http://{addr}")).unwrap()
}

fn update_stream(base: Url, session: Arc<TokenSession>) -> (Arc<UpdateStream>, EventReceiver) {
    let auth: Arc<dyn AuthSession> = session;
    let api = HttpTaskApi::new(base, auth, RetryConfig::default()).unwrap();
    let (tx, rx) = events::channel();
    let config = SyncConfig {
        reconnect_backoff_ms: 50,
        ..SyncConfig::default()
    };
    (Arc::new(UpdateStream::new(api, tx, &config)), rx)
}

async fn next_update(rx: &mut EventReceiver) -> UpdateEvent {
    timeout(WAIT, async {
        loop {
            if let Some(SyncEvent::Update(update)) = rx.recv().await {
                return update;
            }
        }
    })
    .await
    .expect("no update received")
}

#[tokio::test]
async fn forwards_updates_and_records_pings() {
    let tokens = Tokens::default();
    let base = serve(backend(&tokens, false)).await;
    let (stream, mut rx) = update_stream(base, Arc::new(TokenSession::new(Some("t1".into()))));
    let cancel = CancellationToken::new();
    let handle = stream.spawn(cancel.clone());

    let update = next_update(&mut rx).await;

    assert_eq!(update.chat_id(), Some(&ChatId::from(42)));
    assert!(update.announces_tasks());
    assert!(stream.last_ping().is_some());

    cancel.cancel();
    timeout(WAIT, handle).await.unwrap().unwrap();
    assert_eq!(stream.state(), StreamState::Closed);
}

#[tokio::test]
async fn ended_stream_reconnects_after_backoff() {
    let tokens = Tokens::default();
    let base = serve(backend(&tokens, false)).await;
    let (stream, mut rx) = update_stream(base, Arc::new(TokenSession::new(Some("t1".into()))));
    let cancel = CancellationToken::new();
    stream.spawn(cancel.clone());

    next_update(&mut rx).await;
    next_update(&mut rx).await;
    cancel.cancel();

    let tokens = tokens.lock().unwrap();
    assert!(tokens.len() >= 2);
    assert!(tokens.iter().all(|token| token == "t1"));
}

#[tokio::test]
async fn rejected_token_is_refreshed_before_reconnecting() {
    let tokens = Tokens::default();
    let base = serve(backend(&tokens, true)).await;
    let session = Arc::new(
        TokenSession::new(Some("stale".into()))
            .with_refresh_hook(Arc::new(|| Some("fresh".to_string()))),
    );
    let (stream, mut rx) = update_stream(base, session.clone());
    let cancel = CancellationToken::new();
    stream.spawn(cancel.clone());

    next_update(&mut rx).await;
    cancel.cancel();

    assert_eq!(*tokens.lock().unwrap(), vec!["stale", "fresh"]);
    assert_eq!(session.refresh_requests(), 1);
}

#[tokio::test]
async fn token_rotation_reopens_the_connection() {
    let tokens = Tokens::default();
    let base = serve(backend(&tokens, true)).await;
    let session = Arc::new(TokenSession::new(Some("first".into())));
    let (stream, mut rx) = update_stream(base, session.clone());
    let cancel = CancellationToken::new();
    stream.spawn(cancel.clone());
    next_update(&mut rx).await;

    session.set_token("rotated");
    next_update(&mut rx).await;
    cancel.cancel();

    assert_eq!(*tokens.lock().unwrap(), vec!["first", "rotated"]);
}

#[tokio::test]
async fn signed_out_stream_waits_for_a_token() {
    let tokens = Tokens::default();
    let base = serve(backend(&tokens, true)).await;
    let session = Arc::new(TokenSession::new(None));
    let (stream, mut rx) = update_stream(base, session.clone());
    let mut state = stream.watch_state();
    let cancel = CancellationToken::new();
    stream.spawn(cancel.clone());

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(tokens.lock().unwrap().is_empty());

    session.set_token("late");
    timeout(WAIT, state.wait_for(|state| *state == StreamState::Open))
        .await
        .unwrap()
        .unwrap();
    next_update(&mut rx).await;
    cancel.cancel();

    assert_eq!(*tokens.lock().unwrap(), vec!["late"]);
}
