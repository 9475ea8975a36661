//! Trigger surfaces: routes, socket messages, store listeners, and redirects.
//!
//! Each surface turns an outside occurrence into a `dispatch` call against
//! the sequence table. The serve loops run until their channel closes.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use switchyard_store::{MemoryStore, Store, StoreUpdate};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use url::form_urlencoded;

use crate::action::{merge, Input, SequenceKind};
use crate::engine::Dispatcher;
use crate::error::DispatchResult;

// ---------------------------------------------------------------------------
// Redirects
// ---------------------------------------------------------------------------

/// Receives navigation requests from sequences that name a `/path` action.
pub trait Redirect: Send + Sync {
    fn redirect(&self, target: &str, input: &Input);
}

impl<F> Redirect for F
where
    F: Fn(&str, &Input) + Send + Sync,
{
    fn redirect(&self, target: &str, input: &Input) {
        self(target, input)
    }
}

/// A pending navigation. `input` is the sequence input at the point of the
/// redirect and becomes the base payload of the route dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Navigation {
    pub target: String,
    pub input: Input,
}

/// Redirect that queues navigations for `serve_navigation`.
pub struct ChannelRedirect {
    tx: mpsc::UnboundedSender<Navigation>,
}

impl ChannelRedirect {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Navigation>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Redirect for ChannelRedirect {
    fn redirect(&self, target: &str, input: &Input) {
        let navigation = Navigation {
            target: target.to_string(),
            input: input.clone(),
        };
        if self.tx.send(navigation).is_err() {
            warn!(to = target, "Navigation dropped: router is gone");
        }
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

/// Match `path` against a route pattern. `:name` segments capture one
/// segment; a trailing `*` captures the rest under `"*"`.
pub fn match_route(pattern: &str, path: &str) -> Option<Input> {
    let pattern: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let mut params = Input::new();
    for (i, part) in pattern.iter().enumerate() {
        if *part == "*" {
            params.insert("*".to_string(), Value::String(segments.get(i..)?.join("/")));
            return Some(params);
        }
        let segment = segments.get(i)?;
        match part.strip_prefix(':') {
            Some(name) => {
                params.insert(name.to_string(), Value::String(segment.to_string()));
            }
            None if part == segment => {}
            None => return None,
        }
    }

    (pattern.len() == segments.len()).then_some(params)
}

/// Decode a query string into string values. Repeated keys keep the last.
pub fn parse_query(query: &str) -> Input {
    form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
        .collect()
}

fn split_url(url: &str) -> (&str, &str) {
    let url = url.split('#').next().unwrap_or(url);
    match url.split_once('?') {
        Some((path, query)) => (path, query),
        None => (url, ""),
    }
}

impl<S: Store> Dispatcher<S> {
    /// Dispatch the first registered route matching `url`. `Ok(None)` when
    /// no route matches.
    pub async fn navigate(&self, url: &str) -> DispatchResult<Option<Input>> {
        self.navigate_with(url, Input::new()).await
    }

    /// Like `navigate`, starting from `base`. Route params override `base`;
    /// query parameters override both.
    pub async fn navigate_with(&self, url: &str, base: Input) -> DispatchResult<Option<Input>> {
        let (path, query) = split_url(url);

        let matched = self
            .sequences()
            .keys_of(SequenceKind::Route)
            .find_map(|pattern| {
                match_route(pattern, path).map(|params| (pattern.to_string(), params))
            });
        let Some((pattern, params)) = matched else {
            warn!(url, "No route matches");
            return Ok(None);
        };

        let mut payload = base;
        merge(&mut payload, params);
        merge(&mut payload, parse_query(query));

        debug!(url, route = pattern.as_str(), "Route matched");
        self.dispatch(&pattern, payload).await.map(Some)
    }
}

/// Drive queued navigations until every `ChannelRedirect` is dropped.
pub async fn serve_navigation<S: Store>(
    dispatcher: Arc<Dispatcher<S>>,
    mut rx: mpsc::UnboundedReceiver<Navigation>,
) {
    while let Some(Navigation { target, input }) = rx.recv().await {
        if let Err(e) = dispatcher.navigate_with(&target, input).await {
            error!(to = target.as_str(), error = %e, "Navigation failed");
        }
    }
    info!("Navigation loop stopped");
}

// ---------------------------------------------------------------------------
// Sockets
// ---------------------------------------------------------------------------

/// An inbound socket message. Non-object payloads arrive as `{"value": ..}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocketMessage {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

/// Dispatch socket messages in arrival order. Messages with no registered
/// socket sequence are dropped with a warning.
pub async fn serve_socket<S: Store>(
    dispatcher: Arc<Dispatcher<S>>,
    mut rx: mpsc::Receiver<SocketMessage>,
) {
    while let Some(message) = rx.recv().await {
        if dispatcher.sequences().kind_of(&message.event) != Some(SequenceKind::Socket) {
            warn!(event = message.event.as_str(), "No socket sequence for message");
            continue;
        }
        let payload = payload_from(message.payload);
        if let Err(e) = dispatcher.dispatch(&message.event, payload).await {
            error!(event = message.event.as_str(), error = %e, "Socket dispatch failed");
        }
    }
    info!("Socket loop stopped");
}

// ---------------------------------------------------------------------------
// Listeners
// ---------------------------------------------------------------------------

fn listener_paths(key: &str) -> impl Iterator<Item = &str> {
    key.split(',').map(str::trim).filter(|p| !p.is_empty())
}

/// Watch every path named by a listener sequence and subscribe to the
/// resulting cursor updates.
pub fn subscribe_listeners(
    dispatcher: &Dispatcher<MemoryStore>,
) -> broadcast::Receiver<StoreUpdate> {
    let keys: Vec<String> = dispatcher
        .sequences()
        .keys_of(SequenceKind::Listener)
        .map(str::to_string)
        .collect();

    dispatcher.with_store(|store| {
        for key in &keys {
            for path in listener_paths(key) {
                store.watch(path);
            }
        }
        store.subscribe()
    })
}

/// Dispatch each listener whose paths include the updated one, with the
/// new value as payload.
pub async fn serve_listeners<S: Store>(
    dispatcher: Arc<Dispatcher<S>>,
    mut rx: broadcast::Receiver<StoreUpdate>,
) {
    loop {
        let update = match rx.recv().await {
            Ok(update) => update,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Listener loop lagged; updates dropped");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let keys: Vec<String> = dispatcher
            .sequences()
            .keys_of(SequenceKind::Listener)
            .filter(|key| listener_paths(key).any(|p| p == update.path))
            .map(str::to_string)
            .collect();

        for key in keys {
            debug!(listener = key.as_str(), path = update.path.as_str(), "Cursor updated");
            if let Err(e) = dispatcher.dispatch(&key, payload_from(update.data.clone())).await {
                error!(listener = key.as_str(), error = %e, "Listener dispatch failed");
            }
        }
    }
    info!("Listener loop stopped");
}

fn payload_from(data: Value) -> Input {
    match data {
        Value::Object(map) => map,
        Value::Null => Input::new(),
        other => {
            let mut input = Input::new();
            input.insert("value".to_string(), other);
            input
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn routes_capture_named_segments() {
        let params = match_route("/users/:id", "/users/7").unwrap();
        assert_eq!(params.get("id"), Some(&json!("7")));

        assert!(match_route("/users/:id", "/users").is_none());
        assert!(match_route("/users/:id", "/users/7/posts").is_none());
        assert!(match_route("/users/:id", "/teams/7").is_none());
    }

    #[test]
    fn root_and_trailing_slashes() {
        assert!(match_route("/", "/").is_some());
        assert!(match_route("/login", "/login/").is_some());
        assert!(match_route("/", "/login").is_none());
    }

    #[test]
    fn wildcard_takes_the_rest() {
        let params = match_route("/files/*", "/files/a/b.txt").unwrap();
        assert_eq!(params.get("*"), Some(&json!("a/b.txt")));
    }

    #[test]
    fn query_is_decoded() {
        let query = parse_query("tab=posts&q=hello%20world&tab=likes");
        assert_eq!(query.get("tab"), Some(&json!("likes")));
        assert_eq!(query.get("q"), Some(&json!("hello world")));
    }

    #[test]
    fn urls_split_on_query_and_fragment() {
        assert_eq!(split_url("/users/7?tab=x#top"), ("/users/7", "tab=x"));
        assert_eq!(split_url("/users/7#top"), ("/users/7", ""));
    }

    #[test]
    fn scalar_payloads_are_wrapped() {
        assert_eq!(payload_from(json!("Ann")).get("value"), Some(&json!("Ann")));
        assert!(payload_from(Value::Null).is_empty());
        assert_eq!(payload_from(json!({"id": 7})).get("id"), Some(&json!(7)));
    }

    #[test]
    fn listener_keys_split_on_commas() {
        let paths: Vec<&str> = listener_paths("user.name, user.id,").collect();
        assert_eq!(paths, vec!["user.name", "user.id"]);
    }

    #[test]
    fn channel_redirect_queues_navigation() {
        let (redirect, mut rx) = ChannelRedirect::new();
        let mut input = Input::new();
        input.insert("id".into(), json!(7));
        redirect.redirect("/login", &input);

        let navigation = rx.try_recv().unwrap();
        assert_eq!(navigation.target, "/login");
        assert_eq!(navigation.input, input);
    }
}
