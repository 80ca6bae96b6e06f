//! Typed JMAP method families.
//!
//! Each request type knows its object type and method suffix; the method
//! name on the wire is `{ObjectType}/{suffix}`. Object payloads default to
//! `serde_json::Value` so callers map entities themselves.
//!
//! Arguments that may be back-referenced are modelled as a value field plus a
//! `#`-prefixed reference field; setting one clears the other.

use std::marker::PhantomData;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::capability;
use super::request::ResultReference;

/// Object types the client knows how to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Core,
    Mailbox,
    Email,
    Thread,
    SearchSnippet,
    Identity,
    EmailSubmission,
    VacationResponse,
    AddressBook,
    ContactCard,
    Calendar,
    CalendarEvent,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Core => "Core",
            Self::Mailbox => "Mailbox",
            Self::Email => "Email",
            Self::Thread => "Thread",
            Self::SearchSnippet => "SearchSnippet",
            Self::Identity => "Identity",
            Self::EmailSubmission => "EmailSubmission",
            Self::VacationResponse => "VacationResponse",
            Self::AddressBook => "AddressBook",
            Self::ContactCard => "ContactCard",
            Self::Calendar => "Calendar",
            Self::CalendarEvent => "CalendarEvent",
        }
    }

    /// Capability that must appear in `using` to call methods on this type.
    pub fn capability(&self) -> &'static str {
        match self {
            Self::Core => capability::CORE,
            Self::Mailbox | Self::Email | Self::Thread | Self::SearchSnippet => capability::MAIL,
            Self::Identity | Self::EmailSubmission => capability::SUBMISSION,
            Self::VacationResponse => capability::VACATION_RESPONSE,
            Self::AddressBook | Self::ContactCard => capability::CONTACTS,
            Self::Calendar | Self::CalendarEvent => capability::CALENDARS,
        }
    }

    /// Object type of a full method name such as `Email/get`.
    pub fn of_method(method_name: &str) -> Option<Self> {
        method_name.split_once('/').and_then(|(ty, _)| ty.parse().ok())
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Core" => Ok(Self::Core),
            "Mailbox" => Ok(Self::Mailbox),
            "Email" => Ok(Self::Email),
            "Thread" => Ok(Self::Thread),
            "SearchSnippet" => Ok(Self::SearchSnippet),
            "Identity" => Ok(Self::Identity),
            "EmailSubmission" => Ok(Self::EmailSubmission),
            "VacationResponse" => Ok(Self::VacationResponse),
            "AddressBook" => Ok(Self::AddressBook),
            "ContactCard" => Ok(Self::ContactCard),
            "Calendar" => Ok(Self::Calendar),
            "CalendarEvent" => Ok(Self::CalendarEvent),
            _ => Err(format!("Unknown object type: {s}")),
        }
    }
}

/// A JMAP method call with a typed response.
pub trait Method: Serialize {
    type Response: DeserializeOwned;

    fn object_type(&self) -> ObjectType;

    /// Method suffix: `get`, `query`, `set`, ...
    fn suffix(&self) -> &'static str;

    fn name(&self) -> String {
        format!("{}/{}", self.object_type(), self.suffix())
    }
}

/// Deserialize `null` as the type's default.
pub(crate) fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ---------------------------------------------------------------------------
// Foo/get
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct GetRequest<O = Value> {
    #[serde(skip)]
    object_type: ObjectType,

    #[serde(rename = "accountId")]
    pub account_id: String,

    /// `None` with no reference fetches every object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,

    #[serde(rename = "#ids")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids_ref: Option<ResultReference>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<Vec<String>>,

    #[serde(skip)]
    _object: PhantomData<fn() -> O>,
}

impl<O> GetRequest<O> {
    pub fn new(object_type: ObjectType, account_id: impl Into<String>) -> Self {
        Self {
            object_type,
            account_id: account_id.into(),
            ids: None,
            ids_ref: None,
            properties: None,
            _object: PhantomData,
        }
    }

    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self.ids_ref = None;
        self
    }

    pub fn ids_ref(mut self, reference: ResultReference) -> Self {
        self.ids_ref = Some(reference);
        self.ids = None;
        self
    }

    pub fn properties<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.properties = Some(properties.into_iter().map(Into::into).collect());
        self
    }
}

impl<O: DeserializeOwned> Method for GetRequest<O> {
    type Response = GetResponse<O>;

    fn object_type(&self) -> ObjectType {
        self.object_type
    }

    fn suffix(&self) -> &'static str {
        "get"
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "O: Deserialize<'de>"))]
pub struct GetResponse<O = Value> {
    #[serde(rename = "accountId")]
    pub account_id: String,

    pub state: String,

    #[serde(default, deserialize_with = "nullable")]
    pub list: Vec<O>,

    #[serde(rename = "notFound")]
    #[serde(default, deserialize_with = "nullable")]
    pub not_found: Vec<String>,
}

// ---------------------------------------------------------------------------
// Foo/query
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparator {
    pub property: String,

    #[serde(rename = "isAscending")]
    pub is_ascending: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub collation: Option<String>,
}

impl Comparator {
    pub fn ascending(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            is_ascending: true,
            collation: None,
        }
    }

    pub fn descending(property: impl Into<String>) -> Self {
        Self {
            is_ascending: false,
            ..Self::ascending(property)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryRequest {
    #[serde(skip)]
    object_type: ObjectType,

    #[serde(rename = "accountId")]
    pub account_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<Vec<Comparator>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,

    #[serde(rename = "calculateTotal")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calculate_total: Option<bool>,
}

impl QueryRequest {
    pub fn new(object_type: ObjectType, account_id: impl Into<String>) -> Self {
        Self {
            object_type,
            account_id: account_id.into(),
            filter: None,
            sort: None,
            position: None,
            anchor: None,
            limit: None,
            calculate_total: None,
        }
    }

    pub fn filter(mut self, filter: Value) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn sort(mut self, sort: Vec<Comparator>) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn position(mut self, position: i64) -> Self {
        self.position = Some(position);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn calculate_total(mut self, calculate: bool) -> Self {
        self.calculate_total = Some(calculate);
        self
    }
}

impl Method for QueryRequest {
    type Response = QueryResponse;

    fn object_type(&self) -> ObjectType {
        self.object_type
    }

    fn suffix(&self) -> &'static str {
        "query"
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryResponse {
    #[serde(rename = "accountId")]
    pub account_id: String,

    #[serde(rename = "queryState")]
    pub query_state: String,

    #[serde(rename = "canCalculateChanges", default)]
    pub can_calculate_changes: bool,

    #[serde(default)]
    pub position: i64,

    #[serde(default, deserialize_with = "nullable")]
    pub ids: Vec<String>,

    #[serde(default)]
    pub total: Option<u64>,

    #[serde(default)]
    pub limit: Option<u64>,
}

// ---------------------------------------------------------------------------
// Foo/changes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ChangesRequest {
    #[serde(skip)]
    object_type: ObjectType,

    #[serde(rename = "accountId")]
    pub account_id: String,

    #[serde(rename = "sinceState")]
    pub since_state: String,

    #[serde(rename = "maxChanges")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_changes: Option<u64>,
}

impl ChangesRequest {
    pub fn new(object_type: ObjectType, account_id: impl Into<String>, since_state: impl Into<String>) -> Self {
        Self {
            object_type,
            account_id: account_id.into(),
            since_state: since_state.into(),
            max_changes: None,
        }
    }

    pub fn max_changes(mut self, max: u64) -> Self {
        self.max_changes = Some(max);
        self
    }
}

impl Method for ChangesRequest {
    type Response = ChangesResponse;

    fn object_type(&self) -> ObjectType {
        self.object_type
    }

    fn suffix(&self) -> &'static str {
        "changes"
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangesResponse {
    #[serde(rename = "accountId")]
    pub account_id: String,

    #[serde(rename = "oldState")]
    pub old_state: String,

    #[serde(rename = "newState")]
    pub new_state: String,

    #[serde(rename = "hasMoreChanges", default)]
    pub has_more_changes: bool,

    #[serde(default, deserialize_with = "nullable")]
    pub created: Vec<String>,

    #[serde(default, deserialize_with = "nullable")]
    pub updated: Vec<String>,

    #[serde(default, deserialize_with = "nullable")]
    pub destroyed: Vec<String>,
}

// ---------------------------------------------------------------------------
// Core/echo
// ---------------------------------------------------------------------------

/// `Core/echo`: the server returns the arguments unchanged.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct EchoRequest(pub Map<String, Value>);

impl Method for EchoRequest {
    type Response = Map<String, Value>;

    fn object_type(&self) -> ObjectType {
        ObjectType::Core
    }

    fn suffix(&self) -> &'static str {
        "echo"
    }
}
