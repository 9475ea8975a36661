//! Routes, redirects, socket messages, and store listeners driving dispatch.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::{json, Value};
use switchyard_engine::{
    serve_listeners, serve_navigation, serve_socket, subscribe_listeners, ChannelRedirect,
    Dispatcher, DispatcherBuilder, Input, SocketMessage,
};
use switchyard_store::{MemoryStore, Store};
use tokio::sync::mpsc;
use tokio::time::timeout;

fn obj(value: Value) -> Input {
    value.as_object().cloned().unwrap_or_default()
}

fn builder() -> DispatcherBuilder<MemoryStore> {
    Dispatcher::builder()
}

/// Local handler that forwards its input to `tx` and returns nothing.
fn report(
    tx: mpsc::UnboundedSender<Input>,
) -> impl Fn(&mut MemoryStore, &Input) -> Result<Input> + Send + Sync {
    move |_store: &mut MemoryStore, input: &Input| {
        let _ = tx.send(input.clone());
        Ok(Input::new())
    }
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Input>) -> Input {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for dispatch")
        .expect("channel closed")
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn navigate_merges_params_and_query() -> Result<()> {
    let dispatcher = builder()
        .route("/users/:id", vec!["loadUser".into()])
        .local("loadUser", |_store: &mut MemoryStore, input: &Input| {
            Ok(obj(json!({"loaded": input["id"].clone()})))
        })
        .build(MemoryStore::new())?;

    let out = dispatcher.navigate("/users/7?tab=posts").await?.unwrap();

    assert_eq!(out["id"], json!("7"));
    assert_eq!(out["tab"], json!("posts"));
    assert_eq!(out["loaded"], json!("7"));
    Ok(())
}

#[tokio::test]
async fn query_overrides_route_params() -> Result<()> {
    let dispatcher = builder()
        .route("/users/:id", vec![])
        .build(MemoryStore::new())?;

    let out = dispatcher
        .navigate_with("/users/7?id=8", obj(json!({"id": "base", "from": "base"})))
        .await?
        .unwrap();

    assert_eq!(out["id"], json!("8"));
    assert_eq!(out["from"], json!("base"));
    Ok(())
}

#[tokio::test]
async fn unmatched_url_dispatches_nothing() -> Result<()> {
    let dispatcher = builder()
        .route("/users/:id", vec![])
        .build(MemoryStore::new())?;

    assert!(dispatcher.navigate("/teams/1").await?.is_none());
    assert_eq!(dispatcher.with_store(|s| s.commit_count()), 0);
    Ok(())
}

#[tokio::test]
async fn redirects_are_served_as_navigations() -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (redirect, navigations) = ChannelRedirect::new();

    let dispatcher = Arc::new(
        builder()
            .event("user:open", vec!["pick".into(), "/users/9".into()])
            .route("/users/:id", vec!["report".into()])
            .local("pick", |_store: &mut MemoryStore, _input: &Input| {
                Ok(obj(json!({"picked": true})))
            })
            .local("report", report(tx))
            .redirect(Arc::new(redirect))
            .build(MemoryStore::new())?,
    );
    let server = tokio::spawn(serve_navigation(dispatcher.clone(), navigations));

    dispatcher.dispatch("user:open", Input::new()).await?;
    let routed = next(&mut rx).await;

    assert_eq!(routed["id"], json!("9"));
    assert_eq!(routed["picked"], json!(true));
    server.abort();
    Ok(())
}

// ---------------------------------------------------------------------------
// Sockets
// ---------------------------------------------------------------------------

#[tokio::test]
async fn socket_messages_dispatch_registered_sequences() -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let dispatcher = Arc::new(
        builder()
            .socket("chat:message", vec!["receive".into()])
            .event("not:a:socket", vec!["receive".into()])
            .local("receive", report(tx))
            .build(MemoryStore::new())?,
    );

    let (socket_tx, socket_rx) = mpsc::channel(8);
    let server = tokio::spawn(serve_socket(dispatcher.clone(), socket_rx));

    socket_tx
        .send(SocketMessage {
            event: "not:a:socket".into(),
            payload: json!({"ignored": true}),
        })
        .await?;
    socket_tx
        .send(SocketMessage {
            event: "chat:message".into(),
            payload: json!("hi"),
        })
        .await?;
    drop(socket_tx);

    let received = next(&mut rx).await;
    assert_eq!(received["value"], json!("hi"));

    server.await?;
    assert!(rx.try_recv().is_err());
    Ok(())
}

#[test]
fn socket_message_payload_defaults_to_null() {
    let message: SocketMessage = serde_json::from_str(r#"{"event": "ping"}"#).unwrap();
    assert_eq!(message.payload, Value::Null);
}

// ---------------------------------------------------------------------------
// Listeners
// ---------------------------------------------------------------------------

#[tokio::test]
async fn listeners_fire_on_watched_path_changes() -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let dispatcher = Arc::new(
        builder()
            .event("rename", vec!["rename".into()])
            .listener("user.name, user.email", vec!["onUser".into()])
            .local("rename", |store: &mut MemoryStore, input: &Input| {
                store.set(&["user", "name"], input["name"].clone());
                Ok(Input::new())
            })
            .local("onUser", report(tx))
            .build(MemoryStore::new())?,
    );

    let updates = subscribe_listeners(&dispatcher);
    let server = tokio::spawn(serve_listeners(dispatcher.clone(), updates));

    dispatcher.dispatch("rename", obj(json!({"name": "Ann"}))).await?;
    let fired = next(&mut rx).await;
    assert_eq!(fired["value"], json!("Ann"));

    // Same value again: no change, no listener dispatch.
    dispatcher.dispatch("rename", obj(json!({"name": "Ann"}))).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());

    server.abort();
    Ok(())
}
