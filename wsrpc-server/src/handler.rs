//! Command dispatch.

use serde_json::Value;
use std::sync::Arc;
use wsrpc_protocol::{ErrorKind, Request, RequestId, Response, ResponseError};

/// Outcome reported by a command handler: a kind plus a result (on
/// `NoError`) or an error message payload.
pub type CommandOutcome = (ErrorKind, Option<Value>);

/// Application side that executes commands.
///
/// Implementations own all method-specific behavior and parameter shapes.
/// Must return promptly; dispatch is synchronous.
pub trait CommandHandler: Send + Sync {
    fn execute_command(&self, method: &str, params: Option<&Value>) -> CommandOutcome;
}

impl<F> CommandHandler for F
where
    F: Fn(&str, Option<&Value>) -> CommandOutcome + Send + Sync,
{
    fn execute_command(&self, method: &str, params: Option<&Value>) -> CommandOutcome {
        self(method, params)
    }
}

/// Maps decoded requests onto the command handler and back to responses.
#[derive(Clone)]
pub struct Dispatcher {
    handler: Arc<dyn CommandHandler>,
}

impl Dispatcher {
    pub fn new(handler: Arc<dyn CommandHandler>) -> Self {
        Self { handler }
    }

    /// Invokes the command handler.
    pub fn dispatch(&self, method: &str, params: Option<&Value>) -> CommandOutcome {
        self.handler.execute_command(method, params)
    }

    /// Executes a request and builds its response.
    ///
    /// Returns `None` when no response is owed: the request had no id, or the
    /// handler reported success without a result.
    pub fn handle(&self, request: &Request) -> Option<Response> {
        let outcome = self.dispatch(&request.method, request.params.as_ref());
        match request.id {
            Some(ref id) => Self::respond(id.clone(), outcome),
            None => None,
        }
    }

    /// Builds the response for a handler outcome.
    pub fn respond(id: RequestId, outcome: CommandOutcome) -> Option<Response> {
        match outcome {
            (ErrorKind::NoError, Some(result)) => Some(Response::ok(Some(id), result)),
            (ErrorKind::NoError, None) => {
                tracing::warn!("Handler returned no result for request {}, dropping", id);
                None
            }
            (kind, payload) => {
                let message = match payload {
                    Some(Value::String(s)) => s,
                    Some(Value::Null) | None => kind.default_message().to_string(),
                    Some(other) => other.to_string(),
                };
                Some(Response::error(Some(id), ResponseError::new(kind, message)))
            }
        }
    }
}
