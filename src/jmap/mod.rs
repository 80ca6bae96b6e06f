//! JMAP protocol client (RFC 8620, with the mail/contacts/calendars
//! object types layered on top).
//!
//! - [`ProtocolClient`] - Sends batches to the API endpoint with a bearer token
//! - [`Batch`] - Declares named calls, assigns `clientId`s, validates back-references
//! - [`BatchResponse`] - Re-associates responses with call names via `clientId`
//! - [`method`] - Typed `get`/`query`/`changes`/`set`/`echo` method families
//! - [`SetReport`] - Exactly one outcome per attempted create/update/destroy key

pub mod client;
pub mod method;
pub mod request;
pub mod response;
pub mod session;
pub mod set;

pub use client::{ProtocolClient, TokenSource};
pub use method::{
    ChangesRequest, ChangesResponse, EchoRequest, GetRequest, GetResponse, Method, ObjectType,
    QueryRequest, QueryResponse,
};
pub use request::{Batch, CallHandle, Invocation, Request, ResultReference};
pub use response::{BatchResponse, MethodError, ProblemDetails, Response};
pub use session::{Account, JmapSession};
pub use set::{SetError, SetOutcome, SetReport, SetRequest, SetResponse};

/// Capability URIs.
pub mod capability {
    pub const CORE: &str = "urn:ietf:params:jmap:core";
    pub const MAIL: &str = "urn:ietf:params:jmap:mail";
    pub const SUBMISSION: &str = "urn:ietf:params:jmap:submission";
    pub const VACATION_RESPONSE: &str = "urn:ietf:params:jmap:vacationresponse";
    pub const CONTACTS: &str = "urn:ietf:params:jmap:contacts";
    pub const CALENDARS: &str = "urn:ietf:params:jmap:calendars";
}
