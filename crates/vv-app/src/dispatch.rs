//! Command dispatch
//!
//! Commands arrive one JSON object per line:
//!
//! ```text
//! {"id": 1, "method": "videoPlayer:seek", "params": {"playerId": 1, "time": 500}}
//! ```
//!
//! and are answered with `{"id": 1, "result": ...}` or
//! `{"id": 1, "error": {"code": ..., "message": ...}}`.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use vv_core::CoreError;
use vv_query::QueryError;

/// Errors returned to the client of a command
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Unknown command '{0}'")]
    UnknownCommand(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid parameters for '{command}': {reason}")]
    InvalidParams {
        command: &'static str,
        reason: String,
    },

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("{0}")]
    Failed(String),
}

impl CommandError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        CommandError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Stable error code sent to clients
    pub fn code(&self) -> &'static str {
        match self {
            CommandError::UnknownCommand(_) | CommandError::NotFound { .. } => "notFound",
            CommandError::InvalidParams { .. } => "invalidParams",
            CommandError::Query(QueryError::NotFound(_)) => "notFound",
            CommandError::Query(QueryError::MalformedPlan { .. }) => "malformedPlan",
            CommandError::Query(QueryError::InvalidState { .. }) => "invalidState",
            CommandError::Query(QueryError::SessionClosed) => "sessionClosed",
            CommandError::Query(QueryError::SessionUnavailable(_)) => "sessionUnavailable",
            CommandError::Query(QueryError::MissingField(_)) => "missingField",
            CommandError::Query(QueryError::Core(err)) | CommandError::Core(err) => core_code(err),
            CommandError::Query(QueryError::NoFeedback) => "noFeedback",
            CommandError::Failed(_) => "failed",
        }
    }
}

fn core_code(err: &CoreError) -> &'static str {
    match err {
        CoreError::DuplicateId(_) => "duplicateId",
        CoreError::NotFound(_) => "notFound",
        CoreError::OutOfOrder { .. } | CoreError::InvalidTimeStamp(_) => "outOfOrder",
        CoreError::SourceUnavailable { .. } => "sourceUnavailable",
        CoreError::FrameUnavailable { .. } => "frameUnavailable",
        CoreError::UnboundTrack(_) | CoreError::NotInitialized => "invalidState",
    }
}

#[derive(Debug, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    fn from_result(id: Value, result: Result<Value, CommandError>) -> Self {
        match result {
            Ok(value) => Self {
                id,
                result: Some(value),
                error: None,
            },
            Err(err) => Self {
                id,
                result: None,
                error: Some(ErrorBody {
                    code: err.code(),
                    message: err.to_string(),
                }),
            },
        }
    }
}

type Handler<S> = Box<dyn Fn(&mut S, Value) -> Result<Value, CommandError> + Send + Sync>;

/// Map from command name to typed handler
pub struct CommandTable<S> {
    handlers: BTreeMap<&'static str, Handler<S>>,
}

impl<S> Default for CommandTable<S> {
    fn default() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }
}

impl<S> CommandTable<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler taking deserialized params and returning a serializable result
    pub fn register<P, R, F>(&mut self, name: &'static str, handler: F) -> &mut Self
    where
        S: 'static,
        P: DeserializeOwned + 'static,
        R: Serialize + 'static,
        F: Fn(&mut S, P) -> Result<R, CommandError> + Send + Sync + 'static,
    {
        let wrapped = move |state: &mut S, params: Value| {
            let params = serde_json::from_value::<P>(params).map_err(|e| {
                CommandError::InvalidParams {
                    command: name,
                    reason: e.to_string(),
                }
            })?;
            let result = handler(state, params)?;
            serde_json::to_value(result).map_err(|e| CommandError::Failed(e.to_string()))
        };
        self.handlers.insert(name, Box::new(wrapped));
        self
    }

    pub fn commands(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }

    pub fn dispatch(&self, state: &mut S, name: &str, params: Value) -> Result<Value, CommandError> {
        let handler = self
            .handlers
            .get(name)
            .ok_or_else(|| CommandError::UnknownCommand(name.to_string()))?;
        handler(state, params)
    }

    /// Handle one protocol line; blank lines produce no response
    pub fn handle_line(&self, state: &mut S, line: &str) -> Option<Response> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let request: Request = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(err) => {
                warn!("Unreadable command: {}", err);
                return Some(Response {
                    id: Value::Null,
                    result: None,
                    error: Some(ErrorBody {
                        code: "parseError",
                        message: err.to_string(),
                    }),
                });
            }
        };

        debug!(method = %request.method, "Dispatching command");
        let result = self.dispatch(state, &request.method, request.params);
        if let Err(err) = &result {
            debug!(method = %request.method, error = %err, "Command failed");
        }
        Some(Response::from_result(request.id, result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct Counter {
        value: i64,
    }

    #[derive(Deserialize)]
    struct AddParams {
        amount: i64,
    }

    fn table() -> CommandTable<Counter> {
        let mut table = CommandTable::new();
        table
            .register("counter:add", |state: &mut Counter, p: AddParams| {
                state.value += p.amount;
                Ok(state.value)
            })
            .register("counter:get", |state: &mut Counter, (): ()| Ok(state.value))
            .register("counter:find", |_: &mut Counter, id: u32| -> Result<(), _> {
                Err(CommandError::not_found("Counter", id))
            });
        table
    }

    #[test]
    fn test_dispatch_typed_params() {
        let table = table();
        let mut state = Counter::default();
        assert_eq!(
            table.dispatch(&mut state, "counter:add", json!({ "amount": 3 })).unwrap(),
            json!(3)
        );
        assert_eq!(table.dispatch(&mut state, "counter:get", Value::Null).unwrap(), json!(3));
        assert!(matches!(
            table.dispatch(&mut state, "counter:add", json!({ "amount": "x" })),
            Err(CommandError::InvalidParams { command: "counter:add", .. })
        ));
        assert_eq!(state.value, 3);
    }

    #[test]
    fn test_unknown_command_and_target() {
        let table = table();
        let mut state = Counter::default();

        let response = table
            .handle_line(&mut state, r#"{"id": 7, "method": "counter:reset"}"#)
            .unwrap();
        assert_eq!(response.id, json!(7));
        assert_eq!(response.error.unwrap().code, "notFound");

        let response = table
            .handle_line(&mut state, r#"{"id": 8, "method": "counter:find", "params": 4}"#)
            .unwrap();
        let error = response.error.unwrap();
        assert_eq!(error.code, "notFound");
        assert_eq!(error.message, "Counter 4 not found");
    }

    #[test]
    fn test_protocol_lines() {
        let table = table();
        let mut state = Counter::default();
        assert!(table.handle_line(&mut state, "   ").is_none());

        let response = table.handle_line(&mut state, "{not json").unwrap();
        assert_eq!(response.error.unwrap().code, "parseError");

        let response = table
            .handle_line(&mut state, r#"{"id": "a", "method": "counter:add", "params": {"amount": 2}}"#)
            .unwrap();
        let text = serde_json::to_string(&response).unwrap();
        assert_eq!(text, r#"{"id":"a","result":2}"#);
        assert_eq!(table.commands().count(), 3);
    }
}
