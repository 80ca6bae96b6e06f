//! `Foo/set` requests and per-key result decoding.
//!
//! A set response spreads outcomes over six maps (`created`/`notCreated`,
//! `updated`/`notUpdated`, `destroyed`/`notDestroyed`). [`SetResponse::report`]
//! folds them into one [`SetOutcome`] per attempted key so callers never pick
//! the map themselves. Partial failure is not an error; see
//! [`SetReport::has_failures`].

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::method::{Method, ObjectType, nullable};
use super::request::ResultReference;
use crate::error::{Error, Result};

/// Set error types from RFC 8620 §5.3 and RFC 8621.
pub mod error_type {
    pub const FORBIDDEN: &str = "forbidden";
    pub const OVER_QUOTA: &str = "overQuota";
    pub const TOO_LARGE: &str = "tooLarge";
    pub const RATE_LIMIT: &str = "rateLimit";
    pub const NOT_FOUND: &str = "notFound";
    pub const INVALID_PATCH: &str = "invalidPatch";
    pub const WILL_DESTROY: &str = "willDestroy";
    pub const INVALID_PROPERTIES: &str = "invalidProperties";
    pub const SINGLETON: &str = "singleton";
    pub const ALREADY_EXISTS: &str = "alreadyExists";
    pub const MAILBOX_HAS_CHILD: &str = "mailboxHasChild";
    pub const MAILBOX_HAS_EMAIL: &str = "mailboxHasEmail";
    /// Synthesized when the server reports nothing for an attempted key.
    pub const SERVER_FAIL: &str = "serverFail";
}

/// Per-key failure in a set response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetError {
    #[serde(rename = "type")]
    pub error_type: String,

    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<Vec<String>>,
}

impl SetError {
    pub fn new(error_type: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            description: None,
            properties: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    fn unreported() -> Self {
        Self::new(error_type::SERVER_FAIL).with_description("server reported no result for this key")
    }
}

impl std::fmt::Display for SetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.description {
            Some(ref desc) => write!(f, "{}: {}", self.error_type, desc),
            None => f.write_str(&self.error_type),
        }
    }
}

/// Outcome for one key: the success value or the structured error.
pub type SetOutcome<T> = std::result::Result<T, SetError>;

#[derive(Debug, Clone, Serialize)]
pub struct SetRequest<O = Value> {
    #[serde(skip)]
    object_type: ObjectType,

    #[serde(rename = "accountId")]
    pub account_id: String,

    #[serde(rename = "ifInState")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub if_in_state: Option<String>,

    /// Creation key → object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create: Option<BTreeMap<String, O>>,

    /// Id → patch object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update: Option<BTreeMap<String, Value>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub destroy: Option<Vec<String>>,

    #[serde(rename = "#destroy")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destroy_ref: Option<ResultReference>,
}

impl<O> SetRequest<O> {
    pub fn new(object_type: ObjectType, account_id: impl Into<String>) -> Self {
        Self {
            object_type,
            account_id: account_id.into(),
            if_in_state: None,
            create: None,
            update: None,
            destroy: None,
            destroy_ref: None,
        }
    }

    pub fn if_in_state(mut self, state: impl Into<String>) -> Self {
        self.if_in_state = Some(state.into());
        self
    }

    pub fn create(mut self, key: impl Into<String>, object: O) -> Self {
        self.create.get_or_insert_with(BTreeMap::new).insert(key.into(), object);
        self
    }

    pub fn update(mut self, id: impl Into<String>, patch: Value) -> Self {
        self.update.get_or_insert_with(BTreeMap::new).insert(id.into(), patch);
        self
    }

    pub fn destroy<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.destroy
            .get_or_insert_with(Vec::new)
            .extend(ids.into_iter().map(Into::into));
        self.destroy_ref = None;
        self
    }

    pub fn destroy_ref(mut self, reference: ResultReference) -> Self {
        self.destroy_ref = Some(reference);
        self.destroy = None;
        self
    }
}

impl<O: Serialize + DeserializeOwned> Method for SetRequest<O> {
    type Response = SetResponse<O>;

    fn object_type(&self) -> ObjectType {
        self.object_type
    }

    fn suffix(&self) -> &'static str {
        "set"
    }
}

/// Raw set response. Servers may send `null` for any empty map.
#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "O: Deserialize<'de>"))]
pub struct SetResponse<O = Value> {
    #[serde(rename = "accountId")]
    pub account_id: String,

    #[serde(rename = "oldState")]
    #[serde(default)]
    pub old_state: Option<String>,

    #[serde(rename = "newState")]
    #[serde(default)]
    pub new_state: Option<String>,

    #[serde(default, deserialize_with = "nullable")]
    pub created: HashMap<String, O>,

    #[serde(default, deserialize_with = "nullable")]
    pub updated: HashMap<String, Option<Value>>,

    #[serde(default, deserialize_with = "nullable")]
    pub destroyed: Vec<String>,

    #[serde(rename = "notCreated")]
    #[serde(default, deserialize_with = "nullable")]
    pub not_created: HashMap<String, SetError>,

    #[serde(rename = "notUpdated")]
    #[serde(default, deserialize_with = "nullable")]
    pub not_updated: HashMap<String, SetError>,

    #[serde(rename = "notDestroyed")]
    #[serde(default, deserialize_with = "nullable")]
    pub not_destroyed: HashMap<String, SetError>,
}

/// One outcome per attempted key, grouped by operation.
#[derive(Debug, Clone)]
pub struct SetReport<O = Value> {
    pub new_state: Option<String>,
    /// Creation key → created object (with server-set properties such as `id`).
    pub created: BTreeMap<String, SetOutcome<O>>,
    /// Id → server-changed properties, if any.
    pub updated: BTreeMap<String, SetOutcome<Option<Value>>>,
    pub destroyed: BTreeMap<String, SetOutcome<()>>,
}

impl<O> SetReport<O> {
    pub fn has_failures(&self) -> bool {
        self.created.values().any(|o| o.is_err())
            || self.updated.values().any(|o| o.is_err())
            || self.destroyed.values().any(|o| o.is_err())
    }

    /// Every failure as `(operation, key, error)`.
    pub fn failures(&self) -> impl Iterator<Item = (&'static str, &str, &SetError)> {
        fn failed<'a, T>(
            op: &'static str,
            map: &'a BTreeMap<String, SetOutcome<T>>,
        ) -> impl Iterator<Item = (&'static str, &'a str, &'a SetError)> {
            map.iter()
                .filter_map(move |(key, outcome)| outcome.as_ref().err().map(|e| (op, key.as_str(), e)))
        }
        failed("create", &self.created)
            .chain(failed("update", &self.updated))
            .chain(failed("destroy", &self.destroyed))
    }
}

impl SetReport<Value> {
    /// Server-assigned id of a successfully created object.
    pub fn created_id(&self, key: &str) -> Option<&str> {
        self.created.get(key)?.as_ref().ok()?.get("id")?.as_str()
    }
}

impl<O> SetResponse<O> {
    /// Fold the six result maps into one outcome per attempted key.
    ///
    /// Attempted keys are those in `request` plus any the server reported
    /// (a referenced `#destroy` is only known from the response). A key
    /// present in both a success and a failure map is a malformed response.
    pub fn report<P>(mut self, request: &SetRequest<P>) -> Result<SetReport<O>> {
        reject_overlap("created", self.created.keys(), &self.not_created)?;
        reject_overlap("updated", self.updated.keys(), &self.not_updated)?;
        reject_overlap("destroyed", self.destroyed.iter(), &self.not_destroyed)?;

        let create_keys: BTreeSet<String> = request
            .create
            .iter()
            .flat_map(|m| m.keys().cloned())
            .chain(self.created.keys().cloned())
            .chain(self.not_created.keys().cloned())
            .collect();
        let mut created = BTreeMap::new();
        for key in create_keys {
            let outcome = match (self.created.remove(&key), self.not_created.remove(&key)) {
                (Some(object), _) => Ok(object),
                (None, Some(err)) => Err(err),
                (None, None) => Err(unreported("create", &key)),
            };
            created.insert(key, outcome);
        }

        let update_keys: BTreeSet<String> = request
            .update
            .iter()
            .flat_map(|m| m.keys().cloned())
            .chain(self.updated.keys().cloned())
            .chain(self.not_updated.keys().cloned())
            .collect();
        let mut updated = BTreeMap::new();
        for key in update_keys {
            let outcome = match (self.updated.remove(&key), self.not_updated.remove(&key)) {
                (Some(changes), _) => Ok(changes),
                (None, Some(err)) => Err(err),
                (None, None) => Err(unreported("update", &key)),
            };
            updated.insert(key, outcome);
        }

        let destroyed_ok: BTreeSet<String> = self.destroyed.drain(..).collect();
        let destroy_keys: BTreeSet<String> = request
            .destroy
            .iter()
            .flatten()
            .cloned()
            .chain(destroyed_ok.iter().cloned())
            .chain(self.not_destroyed.keys().cloned())
            .collect();
        let mut destroyed = BTreeMap::new();
        for key in destroy_keys {
            let outcome = if destroyed_ok.contains(&key) {
                Ok(())
            } else if let Some(err) = self.not_destroyed.remove(&key) {
                Err(err)
            } else {
                Err(unreported("destroy", &key))
            };
            destroyed.insert(key, outcome);
        }

        Ok(SetReport {
            new_state: self.new_state,
            created,
            updated,
            destroyed,
        })
    }
}

fn reject_overlap<'a>(
    what: &str,
    succeeded: impl Iterator<Item = &'a String>,
    failed: &HashMap<String, SetError>,
) -> Result<()> {
    for key in succeeded {
        if failed.contains_key(key) {
            return Err(Error::malformed(format!(
                "set response lists '{key}' as both {what} and not{}",
                capitalize(what)
            )));
        }
    }
    Ok(())
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn unreported(op: &str, key: &str) -> SetError {
    warn!(op, key, "Set response has no result for attempted key");
    SetError::unreported()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(value: Value) -> SetResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_request_wire_shape() {
        let req: SetRequest = SetRequest::new(ObjectType::ContactCard, "A1")
            .if_in_state("s1")
            .create("k1", json!({"name": {"full": "Ada"}}))
            .update("card1", json!({"name/full": "Grace"}))
            .destroy(["card2"]);
        assert_eq!(req.name(), "ContactCard/set");
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({
                "accountId": "A1",
                "ifInState": "s1",
                "create": {"k1": {"name": {"full": "Ada"}}},
                "update": {"card1": {"name/full": "Grace"}},
                "destroy": ["card2"]
            })
        );
    }

    #[test]
    fn test_partial_create_one_outcome_per_key() {
        let req: SetRequest = SetRequest::new(ObjectType::ContactCard, "A1")
            .create("k1", json!({"uid": "u1"}))
            .create("k2", json!({"uid": "u1"}));
        let resp = response(json!({
            "accountId": "A1",
            "oldState": "s1",
            "newState": "s2",
            "created": {"k1": {"id": "card9"}},
            "notCreated": {"k2": {"type": "alreadyExists", "description": "uid taken"}},
            "updated": null,
            "destroyed": null,
            "notUpdated": null,
            "notDestroyed": null
        }));

        let report = resp.report(&req).unwrap();
        assert_eq!(report.created.len(), 2);
        assert_eq!(report.created_id("k1"), Some("card9"));
        let err = report.created["k2"].as_ref().unwrap_err();
        assert_eq!(err.error_type, error_type::ALREADY_EXISTS);
        assert_eq!(err.description.as_deref(), Some("uid taken"));
        assert!(report.has_failures());
        assert_eq!(report.failures().count(), 1);
        assert_eq!(report.new_state.as_deref(), Some("s2"));
    }

    #[test]
    fn test_update_and_destroy_outcomes() {
        let req: SetRequest = SetRequest::new(ObjectType::Mailbox, "A1")
            .update("m1", json!({"name": "Archive"}))
            .update("m2", json!({"name": "Old"}))
            .destroy(["m3", "m4"]);
        let resp = response(json!({
            "accountId": "A1",
            "newState": "s2",
            "updated": {"m1": null},
            "notUpdated": {"m2": {"type": "notFound"}},
            "destroyed": ["m3"],
            "notDestroyed": {"m4": {"type": "mailboxHasEmail"}}
        }));

        let report = resp.report(&req).unwrap();
        assert_eq!(report.updated["m1"], Ok(None));
        assert_eq!(report.updated["m2"].as_ref().unwrap_err().error_type, "notFound");
        assert_eq!(report.destroyed["m3"], Ok(()));
        assert_eq!(report.destroyed["m4"].as_ref().unwrap_err().error_type, "mailboxHasEmail");
        let ops: Vec<_> = report.failures().map(|(op, key, _)| (op, key)).collect();
        assert_eq!(ops, vec![("update", "m2"), ("destroy", "m4")]);
    }

    #[test]
    fn test_unreported_key_becomes_failure() {
        let req: SetRequest = SetRequest::new(ObjectType::Email, "A1").destroy(["e1"]);
        let report = response(json!({"accountId": "A1"})).report(&req).unwrap();
        assert_eq!(
            report.destroyed["e1"].as_ref().unwrap_err().error_type,
            error_type::SERVER_FAIL
        );
    }

    #[test]
    fn test_referenced_destroy_uses_server_keys() {
        let reference = ResultReference {
            result_of: "c0".into(),
            name: "Email/query".into(),
            path: "/ids".into(),
        };
        let req: SetRequest = SetRequest::new(ObjectType::Email, "A1").destroy_ref(reference);
        let report = response(json!({"accountId": "A1", "destroyed": ["e1", "e2"]}))
            .report(&req)
            .unwrap();
        assert_eq!(report.destroyed.len(), 2);
        assert!(!report.has_failures());
    }

    #[test]
    fn test_overlapping_maps_are_malformed() {
        let req: SetRequest = SetRequest::new(ObjectType::Email, "A1").create("k1", json!({}));
        let err = response(json!({
            "accountId": "A1",
            "created": {"k1": {"id": "e1"}},
            "notCreated": {"k1": {"type": "forbidden"}}
        }))
        .report(&req)
        .unwrap_err();
        assert!(matches!(err, Error::Transport { ref message, .. } if message.contains("notCreated")));
    }

    #[test]
    fn test_set_error_display() {
        assert_eq!(SetError::new("forbidden").to_string(), "forbidden");
        assert_eq!(
            SetError::new("overQuota").with_description("full").to_string(),
            "overQuota: full"
        );
    }
}
