//! Loosely-typed message arguments.
//!
//! The protocol layer delivers each message as an ordered map of argument
//! name to dynamically-typed value. Nothing here enforces which arguments a
//! message must carry; that is the job of [`crate::message`].

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::Bytes;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A single dynamically-typed argument value.
///
/// Serialized externally tagged, e.g. `{"str": "GET"}`, `{"int": 443}`,
/// `{"ip": "10.0.0.1"}`, `{"bin": "aGVsbG8="}` (base64) or `"null"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgValue {
    /// No value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer (all protocol integer widths fold into this).
    Int(i64),
    /// IPv4 or IPv6 address.
    Ip(IpAddr),
    /// UTF-8 string.
    Str(String),
    /// Raw bytes.
    Bin(#[serde(with = "base64_bytes")] Bytes),
}

impl ArgValue {
    /// The kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::Ip(_) => ValueKind::Ip,
            Self::Str(_) => ValueKind::Str,
            Self::Bin(_) => ValueKind::Bin,
        }
    }
}

/// The type tag of an [`ArgValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// No value.
    Null,
    /// Boolean.
    Bool,
    /// Integer.
    Int,
    /// IP address.
    Ip,
    /// String.
    Str,
    /// Raw bytes.
    Bin,
}

impl ValueKind {
    /// Lowercase name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Ip => "ip",
            Self::Str => "str",
            Self::Bin => "bin",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for ArgValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for ArgValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u16> for ArgValue {
    fn from(value: u16) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for ArgValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<bool> for ArgValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<IpAddr> for ArgValue {
    fn from(value: IpAddr) -> Self {
        Self::Ip(value)
    }
}

impl From<Ipv4Addr> for ArgValue {
    fn from(value: Ipv4Addr) -> Self {
        Self::Ip(IpAddr::V4(value))
    }
}

impl From<Ipv6Addr> for ArgValue {
    fn from(value: Ipv6Addr) -> Self {
        Self::Ip(IpAddr::V6(value))
    }
}

impl From<Bytes> for ArgValue {
    fn from(value: Bytes) -> Self {
        Self::Bin(value)
    }
}

impl From<Vec<u8>> for ArgValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bin(Bytes::from(value))
    }
}

impl From<&[u8]> for ArgValue {
    fn from(value: &[u8]) -> Self {
        Self::Bin(Bytes::copy_from_slice(value))
    }
}

/// Ordered name to value map for one message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Args(IndexMap<String, ArgValue>);

impl Args {
    /// Create an empty argument map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an argument, builder style.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert or replace an argument.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ArgValue>) {
        self.0.insert(name.into(), value.into());
    }

    /// Look up an argument by name.
    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.0.get(name)
    }

    /// Remove an argument by name.
    pub fn remove(&mut self, name: &str) -> Option<ArgValue> {
        self.0.shift_remove(name)
    }

    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over arguments in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, ArgValue)> for Args {
    fn from_iter<T: IntoIterator<Item = (String, ArgValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_preserves_order() {
        let args = Args::new()
            .with("app", "default")
            .with("id", "tx-1")
            .with("src-port", 4433_u16);

        let names: Vec<&str> = args.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["app", "id", "src-port"]);
        assert_eq!(args.get("src-port"), Some(&ArgValue::Int(4433)));
    }

    #[test]
    fn test_value_kind() {
        assert_eq!(ArgValue::from("x").kind(), ValueKind::Str);
        assert_eq!(ArgValue::from(1_i64).kind(), ValueKind::Int);
        assert_eq!(ArgValue::from(Ipv4Addr::LOCALHOST).kind(), ValueKind::Ip);
        assert_eq!(ArgValue::from(vec![1_u8, 2]).kind(), ValueKind::Bin);
        assert_eq!(ArgValue::Null.kind(), ValueKind::Null);
    }

    #[test]
    fn test_json_tagging() {
        let args = Args::new()
            .with("method", "POST")
            .with("src-ip", Ipv4Addr::new(10, 0, 0, 1))
            .with("body", b"hello".as_slice());

        let json = serde_json::to_value(&args).unwrap();
        assert_eq!(json["method"], serde_json::json!({"str": "POST"}));
        assert_eq!(json["src-ip"], serde_json::json!({"ip": "10.0.0.1"}));
        assert_eq!(json["body"], serde_json::json!({"bin": "aGVsbG8="}));
    }

    #[test]
    fn test_json_decode() {
        let json = r#"{"status": {"int": 200}, "body": {"bin": "aGk="}, "x": "null"}"#;
        let args: Args = serde_json::from_str(json).unwrap();

        assert_eq!(args.get("status"), Some(&ArgValue::Int(200)));
        assert_eq!(args.get("body"), Some(&ArgValue::Bin(Bytes::from_static(b"hi"))));
        assert_eq!(args.get("x"), Some(&ArgValue::Null));
    }

    #[test]
    fn test_invalid_base64_rejected() {
        let json = r#"{"body": {"bin": "***"}}"#;
        assert!(serde_json::from_str::<Args>(json).is_err());
    }
}
