//! Wire protocol: request encodings, response texts, record validation
//!
//! One request per connection, UTF-8 text. A request is either a bare
//! control token or a JSON object tagged by its `command` field. The
//! server answers with a fixed text or, for queries, a JSON object.

use std::sync::OnceLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::Record;

/// Client-initiated graceful stop.
pub const SHUTDOWN_TOKEN: &str = "shutdown";

/// Internal stop-now sentinel, sent by the server to itself to unblock
/// a blocked accept call. Never answered.
pub const STOP_NOW_TOKEN: &str = "_shutdown";

/// Upper bound on a single request; one read of this size per connection.
pub const REQUEST_BUFFER_SIZE: usize = 1024;

pub const MSG_OK: &str = "Ok";
pub const MSG_INVALID_DATA: &str = "Error: Invalid data format";
pub const MSG_INVALID_CALL: &str = "Error: invalid call";
pub const MSG_SHUTTING_DOWN: &str = "Shutting down server";

/// A structured command, tagged by its `command` field.
#[derive(Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum Command {
    /// Insert-or-update one record, given as `name,email,phone,age`.
    Post { data: String },
    /// Fetch every record whose phone is in the given set.
    Get { phone: Vec<String> },
}

/// Why a request failed to parse. The two cases answer with different
/// error texts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// Not JSON, not an object, or a known command with bad fields.
    Malformed,
    /// An object whose `command` is missing or names no known command.
    UnknownCommand,
}

/// Parse a request body into a [`Command`].
///
/// The happy path is a single typed deserialization. On failure the text
/// is re-examined once to classify the error: anything that is not a
/// JSON object is malformed; an object with an unrecognized `command`
/// is an invalid call; an object with a recognized `command` but
/// missing or ill-typed fields is malformed.
pub fn parse_command(text: &str) -> Result<Command, ParseError> {
    match serde_json::from_str::<Command>(text) {
        Ok(command) => Ok(command),
        Err(_) => {
            let value: Value = serde_json::from_str(text).map_err(|_| ParseError::Malformed)?;
            let object = value.as_object().ok_or(ParseError::Malformed)?;
            match object.get("command").and_then(Value::as_str) {
                Some("post") | Some("get") => Err(ParseError::Malformed),
                _ => Err(ParseError::UnknownCommand),
            }
        }
    }
}

/// `name,email,phone,age` with numeric phone and age. Deliberately
/// lenient: names may contain internal spaces, and the email domain
/// needs no dot.
fn data_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[\w\s]+,[\w.-]+@[\w.-]+,\d+,\d+$").unwrap())
}

/// Validate a `post` payload and build the record. Returns None when the
/// payload does not match the record format.
pub fn parse_record(data: &str) -> Option<Record> {
    if !data_pattern().is_match(data) {
        return None;
    }
    Record::from_row(data)
}

/// One outbound response.
#[derive(Debug, PartialEq, Eq)]
pub enum Reply {
    Ok,
    InvalidData,
    InvalidCall,
    ShuttingDown,
    Records(Vec<Record>),
}

#[derive(Serialize)]
struct SearchPayload<'a> {
    data: &'a [Record],
}

impl Reply {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Reply::Ok => MSG_OK.into(),
            Reply::InvalidData => MSG_INVALID_DATA.into(),
            Reply::InvalidCall => MSG_INVALID_CALL.into(),
            Reply::ShuttingDown => MSG_SHUTTING_DOWN.into(),
            Reply::Records(records) => serde_json::to_vec(&SearchPayload { data: records })
                .unwrap_or_else(|_| MSG_INVALID_CALL.into()),
        }
    }
}
