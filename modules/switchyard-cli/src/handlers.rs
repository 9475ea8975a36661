//! Handlers defined in the config file rather than in code.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use switchyard_engine::{Input, RemoteAction, StoreHandle};
use switchyard_store::{get_path, split_path, Store};
use tracing::debug;
use url::{form_urlencoded, Url};

// ---------------------------------------------------------------------------
// Local
// ---------------------------------------------------------------------------

/// A declarative local action: copy input fields into the store, then merge
/// a constant object into the input.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalSpec {
    /// Store path ← dotted input field.
    #[serde(default)]
    pub assign: BTreeMap<String, String>,
    #[serde(default)]
    pub merge: Map<String, Value>,
}

impl LocalSpec {
    pub fn apply<S: Store>(&self, store: &mut S, input: &Input) -> Result<Input> {
        for (path, field) in &self.assign {
            let value = field_value(input, field)
                .ok_or_else(|| anyhow!("input has no field `{field}` to assign to `{path}`"))?;
            store.set(&split_path(path), value.clone());
        }
        Ok(self.merge.clone())
    }
}

fn field_value<'a>(input: &'a Input, field: &str) -> Option<&'a Value> {
    let path = split_path(field);
    let (first, rest) = path.split_first()?;
    get_path(input.get(*first)?, rest)
}

// ---------------------------------------------------------------------------
// Remote
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    #[default]
    Get,
    /// Sends the input as the JSON body.
    Post,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteSpec {
    /// URL template; `{field}` is replaced by the input value at `field`.
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}

/// Remote action backed by an HTTP endpoint. A JSON object response is
/// merged into the input; any other JSON value lands under `response`.
pub struct HttpRemote {
    client: reqwest::Client,
    spec: RemoteSpec,
}

impl HttpRemote {
    pub fn new(spec: RemoteSpec) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(spec.timeout_ms))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, spec })
    }
}

#[async_trait]
impl<S: Send + 'static> RemoteAction<S> for HttpRemote {
    async fn call(&self, _store: StoreHandle<S>, input: Input) -> Result<Input> {
        let url = render_url(&self.spec.url, &input)?;
        debug!(url = url.as_str(), method = ?self.spec.method, "Calling remote action");

        let request = match self.spec.method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url).json(&input),
        };
        let resp = request
            .send()
            .await
            .with_context(|| format!("Request to {url} failed"))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            bail!("{url} returned {}: {message}", status.as_u16());
        }

        let body: Value = resp
            .json()
            .await
            .with_context(|| format!("Response from {url} is not JSON"))?;
        Ok(match body {
            Value::Object(map) => map,
            other => {
                let mut output = Input::new();
                output.insert("response".to_string(), other);
                output
            }
        })
    }
}

/// Substitute `{field}` placeholders with URL-encoded input values.
///
/// Placeholders in the path are percent-encoded as a single segment.
/// Placeholders after `?` are form-encoded.
pub fn render_url(template: &str, input: &Input) -> Result<String> {
    let mut url = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        url.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| anyhow!("unclosed `{{` in url template `{template}`"))?;
        let field = &after[..close];

        let value = field_value(input, field).ok_or_else(|| {
            anyhow!("url template `{template}` references missing field `{field}`")
        })?;
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        if url.contains('?') {
            url.extend(form_urlencoded::byte_serialize(text.as_bytes()));
        } else {
            url.push_str(&encode_segment(&text)?);
        }

        rest = &after[close + 1..];
    }
    url.push_str(rest);
    Ok(url)
}

fn encode_segment(text: &str) -> Result<String> {
    let mut scratch = Url::parse("http://segment.invalid/")?;
    scratch
        .path_segments_mut()
        .map_err(|()| anyhow!("scratch url cannot carry path segments"))?
        .pop_if_empty()
        .push(text);
    Ok(scratch.path()[1..].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use switchyard_store::{MemoryStore, StoreView};

    fn obj(value: Value) -> Input {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn renders_fields_into_url() {
        let input = obj(json!({"id": 7, "user": {"slug": "ann lee"}}));
        let url = render_url("https://api.test/users/{id}/{user.slug}?x=1", &input).unwrap();
        assert_eq!(url, "https://api.test/users/7/ann%20lee?x=1");
    }

    #[test]
    fn path_and_query_placeholders_encode_differently() {
        let input = obj(json!({"slug": "a/b+c d", "q": "a/b+c d"}));
        let url = render_url("https://api.test/posts/{slug}?q={q}", &input).unwrap();
        assert_eq!(url, "https://api.test/posts/a%2Fb+c%20d?q=a%2Fb%2Bc+d");

        let parsed = Url::parse(&url).unwrap();
        assert_eq!(parsed.path_segments().unwrap().last(), Some("a%2Fb+c%20d"));
        let (_, q) = parsed.query_pairs().next().unwrap();
        assert_eq!(q, "a/b+c d");
    }

    #[test]
    fn missing_field_or_brace_is_an_error() {
        let input = obj(json!({"id": 7}));
        assert!(render_url("/users/{name}", &input).is_err());
        assert!(render_url("/users/{id", &input).is_err());
    }

    #[test]
    fn local_spec_assigns_then_merges() {
        let spec = LocalSpec {
            assign: [("user.name".to_string(), "profile.name".to_string())].into(),
            merge: obj(json!({"saved": true})),
        };
        let mut store = MemoryStore::new();

        let out = spec.apply(&mut store, &obj(json!({"profile": {"name": "Ann"}}))).unwrap();

        assert_eq!(out, obj(json!({"saved": true})));
        assert_eq!(store.get(&["user", "name"]), Some(json!("Ann")));
    }

    #[test]
    fn local_spec_fails_on_missing_field() {
        let spec = LocalSpec {
            assign: [("user.name".to_string(), "name".to_string())].into(),
            merge: Map::new(),
        };
        let mut store = MemoryStore::new();
        assert!(spec.apply(&mut store, &Input::new()).is_err());
        assert_eq!(store.get(&["user"]), None);
    }

    #[test]
    fn remote_spec_defaults() {
        let spec: RemoteSpec = toml::from_str(r#"url = "http://x/{id}""#).unwrap();
        assert_eq!(spec.method, HttpMethod::Get);
        assert_eq!(spec.timeout_ms, 10_000);
    }
}
