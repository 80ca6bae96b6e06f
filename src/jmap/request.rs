//! JMAP request envelope and batch construction.

use std::collections::{BTreeSet, HashMap};
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::capability;
use super::method::{Method, ObjectType};
use crate::error::{Error, Result};

/// A back-reference to a path inside an earlier call's result (RFC 8620 §3.7).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultReference {
    #[serde(rename = "resultOf")]
    pub result_of: String,
    /// Method name of the referenced call.
    pub name: String,
    /// JSON Pointer into the referenced result, e.g. `/ids` or `/list/*/id`.
    pub path: String,
}

/// `[name, arguments, clientId]` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation(pub String, pub Value, pub String);

impl Invocation {
    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn arguments(&self) -> &Value {
        &self.1
    }

    pub fn client_id(&self) -> &str {
        &self.2
    }
}

/// The request object POSTed to the API endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    pub using: Vec<String>,
    #[serde(rename = "methodCalls")]
    pub method_calls: Vec<Invocation>,
}

/// Typed handle to a declared call; use it to build references and to read
/// the call's result from the [`BatchResponse`](super::BatchResponse).
#[derive(Debug)]
pub struct CallHandle<R> {
    name: String,
    client_id: String,
    method_name: String,
    _response: PhantomData<fn() -> R>,
}

impl<R> Clone for CallHandle<R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            client_id: self.client_id.clone(),
            method_name: self.method_name.clone(),
            _response: PhantomData,
        }
    }
}

impl<R> CallHandle<R> {
    /// Caller-given name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    /// Reference `path` in this call's result.
    pub fn reference(&self, path: impl Into<String>) -> ResultReference {
        ResultReference {
            result_of: self.client_id.clone(),
            name: self.method_name.clone(),
            path: path.into(),
        }
    }
}

/// A call as declared, kept for correlating the response.
#[derive(Debug, Clone)]
pub(crate) struct DeclaredCall {
    pub name: String,
    pub client_id: String,
    pub method_name: String,
}

/// An ordered set of named method calls sent in one request.
///
/// Each call gets a unique `clientId` (`c0`, `c1`, ...). Wire order equals
/// declaration order. Back-references may only point at calls declared
/// earlier; anything else is rejected before the request is built.
#[derive(Debug, Default)]
pub struct Batch {
    calls: Vec<DeclaredCall>,
    invocations: Vec<Invocation>,
    by_name: HashMap<String, usize>,
    capabilities: BTreeSet<&'static str>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Declare a typed call under `name`.
    pub fn call<M: Method>(&mut self, name: impl Into<String>, method: M) -> Result<CallHandle<M::Response>> {
        let arguments = serde_json::to_value(&method)
            .map_err(|e| Error::InvalidBatch(format!("failed to serialize arguments: {e}")))?;
        let capability = method.object_type().capability();
        self.push(name.into(), method.name(), arguments, capability)
    }

    /// Declare an untyped call. The capability is derived from the object type
    /// in the method name; unknown types only get the core capability.
    pub fn call_raw(
        &mut self,
        name: impl Into<String>,
        method_name: impl Into<String>,
        arguments: Value,
    ) -> Result<CallHandle<Value>> {
        let method_name = method_name.into();
        let capability = ObjectType::of_method(&method_name)
            .map_or(capability::CORE, |ty| ty.capability());
        self.push(name.into(), method_name, arguments, capability)
    }

    fn push<R>(
        &mut self,
        name: String,
        method_name: String,
        arguments: Value,
        capability: &'static str,
    ) -> Result<CallHandle<R>> {
        if self.by_name.contains_key(&name) {
            return Err(Error::InvalidBatch(format!("duplicate call name '{name}'")));
        }
        let Value::Object(ref args) = arguments else {
            return Err(Error::InvalidBatch(format!(
                "arguments of '{name}' must be a JSON object"
            )));
        };
        self.check_references(&name, args)?;

        let client_id = format!("c{}", self.calls.len());
        self.by_name.insert(name.clone(), self.calls.len());
        self.capabilities.insert(capability);
        self.invocations
            .push(Invocation(method_name.clone(), arguments, client_id.clone()));
        self.calls.push(DeclaredCall {
            name: name.clone(),
            client_id: client_id.clone(),
            method_name: method_name.clone(),
        });

        Ok(CallHandle {
            name,
            client_id,
            method_name,
            _response: PhantomData,
        })
    }

    /// Every `#`-prefixed argument must be a well-formed reference to an
    /// already-declared call, and must not coexist with its plain twin.
    fn check_references(&self, name: &str, args: &serde_json::Map<String, Value>) -> Result<()> {
        for (key, value) in args {
            let Some(plain) = key.strip_prefix('#') else {
                continue;
            };
            if args.contains_key(plain) {
                return Err(Error::InvalidBatch(format!(
                    "call '{name}' sets both '{plain}' and '{key}'"
                )));
            }
            let reference: ResultReference = serde_json::from_value(value.clone()).map_err(|e| {
                Error::InvalidBatch(format!("call '{name}' has a malformed reference '{key}': {e}"))
            })?;
            let Some(target) = self.calls.iter().find(|c| c.client_id == reference.result_of) else {
                return Err(Error::InvalidBatch(format!(
                    "call '{name}' references '{}', which is not an earlier call in this batch",
                    reference.result_of
                )));
            };
            if target.method_name != reference.name {
                return Err(Error::InvalidBatch(format!(
                    "call '{name}' references '{}' as {}, but it is {}",
                    target.name, reference.name, target.method_name
                )));
            }
            if !reference.path.is_empty() && !reference.path.starts_with('/') {
                return Err(Error::InvalidBatch(format!(
                    "call '{name}' has an invalid JSON pointer '{}'",
                    reference.path
                )));
            }
        }
        Ok(())
    }

    /// The `using` list: core plus every capability the calls need, sorted.
    pub fn using(&self) -> Vec<String> {
        let mut using: BTreeSet<&str> = self.capabilities.clone();
        using.insert(capability::CORE);
        using.into_iter().map(str::to_string).collect()
    }

    pub(crate) fn into_parts(self) -> Result<(Request, Vec<DeclaredCall>)> {
        if self.calls.is_empty() {
            return Err(Error::InvalidBatch("batch has no calls".to_string()));
        }
        let request = Request {
            using: self.using(),
            method_calls: self.invocations,
        };
        Ok((request, self.calls))
    }

    /// Build the request object without sending it.
    pub fn build(self) -> Result<Request> {
        self.into_parts().map(|(request, _)| request)
    }
}
