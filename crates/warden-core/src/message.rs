//! Message adapter.
//!
//! Decodes the loosely-typed [`Args`] of one proxy message into a typed
//! [`InspectionRequest`] or [`InspectionResponse`]. Presence and type policy
//! lives in one place, the field tables [`REQUEST_FIELDS`] and
//! [`RESPONSE_FIELDS`]:
//!
//! - a mandatory field that is missing or has the wrong type fails the whole
//!   message;
//! - an optional field with the wrong type is reported as a warning and
//!   replaced by its default;
//! - `Null` is treated as absent.
//!
//! Decoding is pure. Warnings are returned in [`Decoded::warnings`] and left
//! to the caller to log.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::args::{ArgValue, Args, ValueKind};
use crate::error::{CoreError, CoreResult};

/// Default request path.
pub const DEFAULT_PATH: &str = "/";
/// Default HTTP protocol version.
pub const DEFAULT_VERSION: &str = "1.1";
/// Length of agent-generated transaction ids.
pub const GENERATED_ID_LEN: usize = 16;

/// Which message the proxy sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Inspect a request.
    Request,
    /// Inspect the paired response.
    Response,
}

impl MessageKind {
    /// Lowercase name, used in spans and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a field must be present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Missing or mistyped values fail the message.
    Required,
    /// Missing or mistyped values fall back to a default.
    Optional,
}

/// One row of a field table.
#[derive(Debug, Clone, Copy)]
pub struct Field {
    /// Argument name on the wire.
    pub name: &'static str,
    /// Accepted value kinds; the first one is reported on mismatch.
    pub accepts: &'static [ValueKind],
    /// Presence policy.
    pub presence: Presence,
}

impl Field {
    const fn required(name: &'static str, accepts: &'static [ValueKind]) -> Self {
        Self {
            name,
            accepts,
            presence: Presence::Required,
        }
    }

    const fn optional(name: &'static str, accepts: &'static [ValueKind]) -> Self {
        Self {
            name,
            accepts,
            presence: Presence::Optional,
        }
    }

    /// Look the field up, returning `None` for absent or `Null` values.
    fn lookup<'a>(&self, args: &'a Args) -> CoreResult<Option<&'a ArgValue>> {
        match args.get(self.name) {
            None | Some(ArgValue::Null) => Ok(None),
            Some(value) if self.accepts.contains(&value.kind()) => Ok(Some(value)),
            Some(value) => Err(CoreError::type_mismatch(
                self.name,
                self.accepts[0],
                value.kind(),
            )),
        }
    }
}

const STR: &[ValueKind] = &[ValueKind::Str];
const INT: &[ValueKind] = &[ValueKind::Int];
const IP: &[ValueKind] = &[ValueKind::Ip];
const BIN: &[ValueKind] = &[ValueKind::Bin];
const TEXT: &[ValueKind] = &[ValueKind::Str, ValueKind::Bin];

// `id` is required on requests too: a mistyped id fails the message, an
// absent one is generated.
const F_APP: Field = Field::required("app", STR);
const F_REQ_ID: Field = Field::required("id", STR);
const F_SRC_IP: Field = Field::optional("src-ip", IP);
const F_SRC_PORT: Field = Field::optional("src-port", INT);
const F_DST_IP: Field = Field::optional("dst-ip", IP);
const F_DST_PORT: Field = Field::optional("dst-port", INT);
const F_METHOD: Field = Field::optional("method", STR);
const F_PATH: Field = Field::optional("path", STR);
const F_QUERY: Field = Field::optional("query", STR);
const F_VERSION: Field = Field::optional("version", STR);
const F_HEADERS: Field = Field::optional("headers", TEXT);
const F_BODY: Field = Field::optional("body", BIN);
const F_RESP_ID: Field = Field::required("id", STR);
const F_STATUS: Field = Field::required("status", INT);

/// Fields of a request message.
pub const REQUEST_FIELDS: &[Field] = &[
    F_APP, F_REQ_ID, F_SRC_IP, F_SRC_PORT, F_DST_IP, F_DST_PORT, F_METHOD, F_PATH, F_QUERY,
    F_VERSION, F_HEADERS, F_BODY,
];

/// Fields of a response message.
pub const RESPONSE_FIELDS: &[Field] = &[F_APP, F_RESP_ID, F_VERSION, F_STATUS, F_HEADERS, F_BODY];

/// A non-fatal problem with an optional field.
#[derive(Debug)]
pub struct FieldError {
    /// Argument name.
    pub field: &'static str,
    /// What was wrong with it.
    pub error: CoreError,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (default used)", self.error)
    }
}

/// A decoded record plus the warnings raised while decoding it.
#[derive(Debug)]
pub struct Decoded<T> {
    /// The typed record.
    pub value: T,
    /// Optional fields that fell back to their default.
    pub warnings: Vec<FieldError>,
}

/// A request to inspect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectionRequest {
    /// Transaction id, supplied by the proxy or generated.
    pub id: String,
    /// Whether `id` was generated by the agent.
    pub id_generated: bool,
    /// Target application; `None` selects the default.
    pub app: Option<String>,
    /// Client address.
    pub src_ip: IpAddr,
    /// Client port.
    pub src_port: u16,
    /// Server address.
    pub dst_ip: IpAddr,
    /// Server port.
    pub dst_port: u16,
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Query string without the leading `?`.
    pub query: String,
    /// HTTP version, e.g. `1.1`.
    pub version: String,
    /// Raw header blob.
    pub headers: Bytes,
    /// Raw body.
    pub body: Bytes,
}

impl InspectionRequest {
    /// Path plus `?query` when the query is non-empty.
    pub fn uri(&self) -> String {
        if self.query.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.query)
        }
    }

    /// Protocol string, e.g. `HTTP/1.1`.
    pub fn protocol(&self) -> String {
        format!("HTTP/{}", self.version)
    }
}

/// A response to inspect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectionResponse {
    /// Id of the request transaction this response belongs to.
    pub id: String,
    /// Target application; `None` selects the default.
    pub app: Option<String>,
    /// HTTP version.
    pub version: String,
    /// Response status code.
    pub status: u16,
    /// Raw header blob.
    pub headers: Bytes,
    /// Raw body.
    pub body: Bytes,
}

impl InspectionResponse {
    /// Protocol string, e.g. `HTTP/1.1`.
    pub fn protocol(&self) -> String {
        format!("HTTP/{}", self.version)
    }
}

/// Collects warnings for optional fields while decoding.
struct Reader<'a> {
    args: &'a Args,
    warnings: Vec<FieldError>,
}

impl<'a> Reader<'a> {
    fn new(args: &'a Args) -> Self {
        Self {
            args,
            warnings: Vec::new(),
        }
    }

    fn warn(&mut self, field: &'static str, error: CoreError) {
        self.warnings.push(FieldError { field, error });
    }

    fn optional(&mut self, field: Field) -> Option<&'a ArgValue> {
        match field.lookup(self.args) {
            Ok(value) => value,
            Err(error) => {
                self.warn(field.name, error);
                None
            }
        }
    }

    fn string(&mut self, field: Field) -> CoreResult<Option<String>> {
        let value = match field.presence {
            Presence::Required => field.lookup(self.args)?,
            Presence::Optional => self.optional(field),
        };
        Ok(match value {
            Some(ArgValue::Str(s)) if !s.is_empty() => Some(s.clone()),
            _ => None,
        })
    }

    fn ip(&mut self, field: Field) -> IpAddr {
        match self.optional(field) {
            Some(ArgValue::Ip(ip)) => *ip,
            _ => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }

    fn port(&mut self, field: Field) -> u16 {
        match self.optional(field) {
            Some(ArgValue::Int(n)) => match u16::try_from(*n) {
                Ok(port) => port,
                Err(_) => {
                    self.warn(
                        field.name,
                        CoreError::invalid_value(field.name, format!("port {n} out of range")),
                    );
                    0
                }
            },
            _ => 0,
        }
    }

    fn bytes(&mut self, field: Field) -> Bytes {
        match self.optional(field) {
            Some(ArgValue::Bin(b)) => b.clone(),
            Some(ArgValue::Str(s)) => Bytes::copy_from_slice(s.as_bytes()),
            _ => Bytes::new(),
        }
    }
}

/// Decode a request message.
///
/// # Errors
///
/// Fails when `app` or `id` carry a value of the wrong type.
pub fn decode_request(args: &Args) -> CoreResult<Decoded<InspectionRequest>> {
    let mut r = Reader::new(args);

    let app = r.string(F_APP)?;
    let (id, id_generated) = match r.string(F_REQ_ID)? {
        Some(id) => (id, false),
        None => (generate_transaction_id(), true),
    };

    let value = InspectionRequest {
        id,
        id_generated,
        app,
        src_ip: r.ip(F_SRC_IP),
        src_port: r.port(F_SRC_PORT),
        dst_ip: r.ip(F_DST_IP),
        dst_port: r.port(F_DST_PORT),
        method: r.string(F_METHOD)?.unwrap_or_default(),
        path: r.string(F_PATH)?.unwrap_or_else(|| DEFAULT_PATH.to_string()),
        query: r.string(F_QUERY)?.unwrap_or_default(),
        version: r.string(F_VERSION)?.unwrap_or_else(|| DEFAULT_VERSION.to_string()),
        headers: r.bytes(F_HEADERS),
        body: r.bytes(F_BODY),
    };

    Ok(Decoded {
        value,
        warnings: r.warnings,
    })
}

/// Decode a response message.
///
/// # Errors
///
/// Fails when `id` or `status` are missing or mistyped, when `status` is not
/// a valid status code, or when `app` is mistyped.
pub fn decode_response(args: &Args) -> CoreResult<Decoded<InspectionResponse>> {
    let mut r = Reader::new(args);

    let app = r.string(F_APP)?;
    let id = r
        .string(F_RESP_ID)?
        .ok_or_else(|| CoreError::missing_field(F_RESP_ID.name))?;

    let status = match F_STATUS.lookup(args)? {
        Some(ArgValue::Int(n)) => u16::try_from(*n).map_err(|_| {
            CoreError::invalid_value(F_STATUS.name, format!("status {n} out of range"))
        })?,
        _ => return Err(CoreError::missing_field(F_STATUS.name)),
    };

    let value = InspectionResponse {
        id,
        app,
        version: r.string(F_VERSION)?.unwrap_or_else(|| DEFAULT_VERSION.to_string()),
        status,
        headers: r.bytes(F_HEADERS),
        body: r.bytes(F_BODY),
    };

    Ok(Decoded {
        value,
        warnings: r.warnings,
    })
}

/// Generate a transaction id of uppercase ASCII letters.
pub fn generate_transaction_id() -> String {
    uuid::Uuid::new_v4()
        .as_bytes()
        .iter()
        .take(GENERATED_ID_LEN)
        .map(|b| char::from(b'A' + b % 26))
        .collect()
}
