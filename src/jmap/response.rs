//! JMAP response envelope and `clientId` correlation.

use std::collections::HashMap;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::request::{CallHandle, DeclaredCall, Invocation};
use crate::error::{Error, Result};

/// Prefix of request-level problem types (RFC 8620 §3.6.1).
pub const PROBLEM_TYPE_PREFIX: &str = "urn:ietf:params:jmap:error:";

/// The response object returned by the API endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    #[serde(rename = "methodResponses")]
    pub method_responses: Vec<Invocation>,

    #[serde(rename = "sessionState")]
    #[serde(default)]
    pub session_state: Option<String>,

    #[serde(rename = "createdIds")]
    #[serde(default)]
    pub created_ids: Option<HashMap<String, String>>,
}

/// Request-level error document (RFC 7807 problem details).
#[derive(Debug, Clone, Deserialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub problem_type: String,

    #[serde(default)]
    pub status: Option<u16>,

    #[serde(default)]
    pub detail: Option<String>,

    /// Set for `urn:ietf:params:jmap:error:limit`.
    #[serde(default)]
    pub limit: Option<String>,
}

impl ProblemDetails {
    /// Parse a body as JMAP problem details, if it is one.
    pub fn parse(body: &[u8]) -> Option<Self> {
        serde_json::from_slice::<Self>(body)
            .ok()
            .filter(|p| p.problem_type.starts_with(PROBLEM_TYPE_PREFIX))
    }
}

impl From<ProblemDetails> for Error {
    fn from(problem: ProblemDetails) -> Self {
        let description = match (problem.detail, problem.limit) {
            (Some(detail), Some(limit)) => Some(format!("{detail} (limit: {limit})")),
            (Some(detail), None) => Some(detail),
            (None, Some(limit)) => Some(format!("limit: {limit}")),
            (None, None) => None,
        };
        Error::Protocol {
            error_type: problem.problem_type,
            description,
        }
    }
}

/// Method-level error: a `["error", {type, description}, clientId]` response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MethodError {
    #[serde(rename = "type")]
    pub error_type: String,

    #[serde(default)]
    pub description: Option<String>,
}

impl From<MethodError> for Error {
    fn from(err: MethodError) -> Self {
        Error::Protocol {
            error_type: err.error_type,
            description: err.description,
        }
    }
}

#[derive(Debug, Clone)]
enum MethodOutput {
    Ok { method_name: String, arguments: Value },
    Err(MethodError),
}

/// Results of a batch, keyed by the names the caller gave each call.
///
/// Correlation is by `clientId` only; the order of `methodResponses` is
/// irrelevant.
#[derive(Debug, Clone)]
pub struct BatchResponse {
    results: HashMap<String, MethodOutput>,
    /// Additional responses sharing a call's `clientId` (e.g. the implicit
    /// `Email/set` after `Email/copy` with `onSuccessDestroyOriginal`).
    implicit: HashMap<String, Vec<Invocation>>,
    session_state: Option<String>,
}

impl BatchResponse {
    pub(crate) fn correlate(declared: &[DeclaredCall], response: Response) -> Result<Self> {
        let mut by_client_id: HashMap<String, Vec<Invocation>> = HashMap::new();
        for invocation in response.method_responses {
            by_client_id
                .entry(invocation.client_id().to_string())
                .or_default()
                .push(invocation);
        }

        let mut results = HashMap::with_capacity(declared.len());
        let mut implicit = HashMap::new();

        for call in declared {
            let mut entries = by_client_id.remove(&call.client_id).ok_or_else(|| {
                Error::malformed(format!(
                    "no response for call '{}' (clientId {})",
                    call.name, call.client_id
                ))
            })?;

            let primary = entries
                .iter()
                .position(|inv| inv.name() == call.method_name || inv.name() == "error")
                .ok_or_else(|| {
                    Error::malformed(format!(
                        "response for call '{}' does not answer {}",
                        call.name, call.method_name
                    ))
                })?;
            let Invocation(method_name, arguments, _) = entries.remove(primary);

            let output = if method_name == "error" {
                let err: MethodError = serde_json::from_value(arguments)
                    .map_err(|e| Error::malformed(format!("bad method error for '{}': {e}", call.name)))?;
                debug!(call = %call.name, error_type = %err.error_type, "Method returned an error");
                MethodOutput::Err(err)
            } else {
                MethodOutput::Ok {
                    method_name,
                    arguments,
                }
            };

            results.insert(call.name.clone(), output);
            if !entries.is_empty() {
                implicit.insert(call.name.clone(), entries);
            }
        }

        for client_id in by_client_id.keys() {
            debug!(%client_id, "Ignoring response for an undeclared clientId");
        }

        Ok(Self {
            results,
            implicit,
            session_state: response.session_state,
        })
    }

    /// Typed result of the call behind `handle`.
    pub fn get<R: DeserializeOwned>(&self, handle: &CallHandle<R>) -> Result<R> {
        self.get_named(handle.name())
    }

    /// Typed result of the call declared as `name`.
    pub fn get_named<R: DeserializeOwned>(&self, name: &str) -> Result<R> {
        let arguments = self.raw(name)?;
        R::deserialize(arguments)
            .map_err(|e| Error::malformed(format!("cannot decode result of '{name}': {e}")))
    }

    /// Raw arguments of the call declared as `name`. A method-level error
    /// surfaces as [`Error::Protocol`].
    pub fn raw(&self, name: &str) -> Result<&Value> {
        match self.results.get(name) {
            Some(MethodOutput::Ok { arguments, .. }) => Ok(arguments),
            Some(MethodOutput::Err(err)) => Err(err.clone().into()),
            None => Err(Error::InvalidBatch(format!("no call named '{name}' in this batch"))),
        }
    }

    /// Method name the server answered with for `name`.
    pub fn method_name(&self, name: &str) -> Option<&str> {
        match self.results.get(name)? {
            MethodOutput::Ok { method_name, .. } => Some(method_name),
            MethodOutput::Err(_) => Some("error"),
        }
    }

    /// Method-level error for `name`, if the call failed.
    pub fn error(&self, name: &str) -> Option<&MethodError> {
        match self.results.get(name)? {
            MethodOutput::Err(err) => Some(err),
            MethodOutput::Ok { .. } => None,
        }
    }

    /// Extra responses the server produced under the same `clientId`.
    pub fn implicit(&self, name: &str) -> &[Invocation] {
        self.implicit.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.results.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn session_state(&self) -> Option<&str> {
        self.session_state.as_deref()
    }

    /// Every result keyed by call name.
    pub fn into_results(self) -> HashMap<String, Result<Value>> {
        self.results
            .into_iter()
            .map(|(name, output)| {
                let result = match output {
                    MethodOutput::Ok { arguments, .. } => Ok(arguments),
                    MethodOutput::Err(err) => Err(err.into()),
                };
                (name, result)
            })
            .collect()
    }
}
