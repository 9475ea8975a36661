//! JSON-lines commands read from stdin.

use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use switchyard_engine::{Dispatcher, Input};
use switchyard_store::Store;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Command {
    Dispatch {
        key: String,
        #[serde(default)]
        payload: Input,
    },
    Navigate(String),
    TimeTravel(usize),
    /// Recorded history length and the debug dispatch log.
    History,
}

pub fn parse_command(line: &str) -> Result<Command> {
    Ok(serde_json::from_str(line)?)
}

/// Run one command. Dispatch failures are reported in the response, not
/// returned as errors.
pub async fn run_command<S: Store>(dispatcher: &Dispatcher<S>, command: Command) -> Result<Value> {
    let response = match command {
        Command::Dispatch { key, payload } => match dispatcher.dispatch(&key, payload).await {
            Ok(input) => json!({ "ok": input }),
            Err(e) => json!({ "error": e.to_string() }),
        },
        Command::Navigate(url) => match dispatcher.navigate(&url).await {
            Ok(input) => json!({ "ok": input }),
            Err(e) => json!({ "error": e.to_string() }),
        },
        Command::TimeTravel(index) => match dispatcher.time_travel(index).await {
            Some(state) => json!({ "ok": state.to_json()? }),
            None => json!({ "ok": false }),
        },
        Command::History => json!({
            "ok": {
                "len": dispatcher.history_len(),
                "logs": dispatcher.logs(),
            }
        }),
    };
    Ok(response)
}
