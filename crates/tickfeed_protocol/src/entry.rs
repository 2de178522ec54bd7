//! Replication log entries and the entry parser.
//!
//! A follow response body is a sequence of newline-delimited JSON records:
//!
//! ```text
//! {"tick":"514132959101","type":2200,"tid":"514132959099","database":"1"}
//! {"tick":"514092205556","type":2300,"tid":"0","database":"1","cid":"513417247371","cname":"test","data":{"_key":"testkey",...}}
//! {"tick":"514092206277","type":2302,"tid":"0","database":"1","cid":"513417247371","cname":"test","data":{"_key":"abcdef","_rev":"514092206275"}}
//! ```
//!
//! The parser reads the envelope fields and the document key. The document
//! itself is kept as the raw JSON text of `data`; it is never rebuilt into a
//! value tree.

use crate::error::{ProtocolError, ProtocolResult};
use crate::operation::OperationType;
use crate::tick::Tick;
use serde::Deserialize;
use serde_json::value::RawValue;

/// Transaction id of entries that are not part of a multi-statement transaction.
pub const NO_TRANSACTION: &str = "0";

/// A decoded replication log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Position of the entry, when the record carries one.
    pub tick: Option<Tick>,
    /// Operation type.
    pub op_type: OperationType,
    /// Transaction id; [`NO_TRANSACTION`] for standalone writes.
    pub transaction_id: String,
    /// Collection name (document operations only).
    pub collection: Option<String>,
    /// Document key (document operations only).
    pub document_key: Option<String>,
    /// Raw JSON text of the document (document operations only).
    pub payload: Option<String>,
}

/// Ticks and transaction ids arrive as strings in current log versions and
/// as numbers in some older ones.
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Number(u64),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Scalar::Text(s) => s,
            Scalar::Number(n) => n.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct Envelope<'a> {
    #[serde(rename = "type")]
    code: i64,
    #[serde(default)]
    tick: Option<Scalar>,
    #[serde(default)]
    tid: Option<Scalar>,
    #[serde(default)]
    cname: Option<String>,
    /// Older log versions put the key beside the document.
    #[serde(default)]
    key: Option<String>,
    #[serde(default, borrow)]
    data: Option<&'a RawValue>,
}

#[derive(Deserialize)]
struct DocumentHead {
    #[serde(rename = "_key", default)]
    key: Option<String>,
}

impl LogEntry {
    /// Parses one wire record.
    ///
    /// Unrecognized operation codes parse successfully with only the
    /// envelope populated so the caller can skip them.
    pub fn parse(record: &[u8]) -> ProtocolResult<Self> {
        let envelope: Envelope<'_> = serde_json::from_slice(record)
            .map_err(|e| ProtocolError::MalformedEntry(e.to_string()))?;

        let op_type = OperationType::from_code(envelope.code);
        let tick = match envelope.tick {
            Some(raw) => Some(Tick::parse(&raw.into_string()).map_err(|_| {
                ProtocolError::MalformedEntry(format!("bad tick in entry of type {}", envelope.code))
            })?),
            None => None,
        };

        match op_type {
            OperationType::Unrecognized(_) => Ok(Self {
                tick,
                op_type,
                transaction_id: envelope
                    .tid
                    .map(Scalar::into_string)
                    .unwrap_or_else(|| NO_TRANSACTION.to_string()),
                collection: envelope.cname,
                document_key: None,
                payload: None,
            }),
            OperationType::TxnStart | OperationType::TxnCommit | OperationType::TxnAbort => {
                let transaction_id = envelope
                    .tid
                    .map(Scalar::into_string)
                    .ok_or(ProtocolError::MissingField {
                        code: envelope.code,
                        field: "tid",
                    })?;
                Ok(Self {
                    tick,
                    op_type,
                    transaction_id,
                    collection: None,
                    document_key: None,
                    payload: None,
                })
            }
            OperationType::InsertOrUpdate | OperationType::Delete => {
                let collection = envelope.cname.ok_or(ProtocolError::MissingField {
                    code: envelope.code,
                    field: "cname",
                })?;
                let data = envelope.data.ok_or(ProtocolError::MissingField {
                    code: envelope.code,
                    field: "data",
                })?;
                let head: DocumentHead = serde_json::from_str(data.get())
                    .map_err(|e| ProtocolError::MalformedEntry(format!("data: {e}")))?;
                let document_key = head.key.or(envelope.key).ok_or(ProtocolError::MissingField {
                    code: envelope.code,
                    field: "_key",
                })?;
                Ok(Self {
                    tick,
                    op_type,
                    transaction_id: envelope
                        .tid
                        .map(Scalar::into_string)
                        .unwrap_or_else(|| NO_TRANSACTION.to_string()),
                    collection: Some(collection),
                    document_key: Some(document_key),
                    payload: Some(data.get().to_string()),
                })
            }
        }
    }

    /// Returns true if the entry belongs to a multi-statement transaction.
    pub fn is_transactional(&self) -> bool {
        self.transaction_id != NO_TRANSACTION
    }
}

/// Splits a follow response body into records.
///
/// Blank lines and trailing carriage returns are dropped.
pub fn split_records(body: &[u8]) -> impl Iterator<Item = &[u8]> {
    body.split(|b| *b == b'\n')
        .map(|line| line.trim_ascii())
        .filter(|line| !line.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const INSERT: &str = r#"{"tick":"514092205556","type":2300,"tid":"0","database":"1","cid":"513417247371","cname":"test","data":{"_id":"test/testkey","_key":"testkey","_rev":"514092205554","name":"a \"quoted\" value","nested":{"_key":"inner"}}}"#;

    #[test]
    fn parse_insert() {
        let entry = LogEntry::parse(INSERT.as_bytes()).unwrap();
        assert_eq!(entry.op_type, OperationType::InsertOrUpdate);
        assert_eq!(entry.tick, Some(Tick::parse("514092205556").unwrap()));
        assert_eq!(entry.transaction_id, "0");
        assert!(!entry.is_transactional());
        assert_eq!(entry.collection.as_deref(), Some("test"));
        assert_eq!(entry.document_key.as_deref(), Some("testkey"));

        let payload = entry.payload.unwrap();
        assert!(payload.starts_with(r#"{"_id":"test/testkey""#));
        assert!(payload.ends_with(r#""nested":{"_key":"inner"}}"#));
    }

    #[test]
    fn parse_delete() {
        let record = r#"{"tick":"514092206277","type":2302,"tid":"0","database":"1","cid":"513417247371","cname":"test","data":{"_key":"abcdef","_rev":"514092206275"}}"#;
        let entry = LogEntry::parse(record.as_bytes()).unwrap();
        assert_eq!(entry.op_type, OperationType::Delete);
        assert_eq!(entry.document_key.as_deref(), Some("abcdef"));
        assert_eq!(
            entry.payload.as_deref(),
            Some(r#"{"_key":"abcdef","_rev":"514092206275"}"#)
        );
    }

    #[test]
    fn parse_transaction_control() {
        let record = r#"{"tick":"514132959101","type":2200,"tid":"514132959099","database":"1"}"#;
        let entry = LogEntry::parse(record.as_bytes()).unwrap();
        assert_eq!(entry.op_type, OperationType::TxnStart);
        assert_eq!(entry.transaction_id, "514132959099");
        assert!(entry.is_transactional());
        assert!(entry.collection.is_none());
        assert!(entry.payload.is_none());
    }

    #[test]
    fn control_without_tid_is_rejected() {
        let err = LogEntry::parse(br#"{"tick":"1","type":2201}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField { field: "tid", .. }));
    }

    #[test]
    fn numeric_tick_and_tid() {
        let record = r#"{"tick":17,"type":2300,"tid":42,"cname":"c","data":{"_key":"k"}}"#;
        let entry = LogEntry::parse(record.as_bytes()).unwrap();
        assert_eq!(entry.tick, Some(Tick::from(17)));
        assert_eq!(entry.transaction_id, "42");
    }

    #[test]
    fn legacy_top_level_key() {
        let record = r#"{"type":2302,"cname":"c","key":"old","data":{"_rev":"9"}}"#;
        let entry = LogEntry::parse(record.as_bytes()).unwrap();
        assert_eq!(entry.document_key.as_deref(), Some("old"));
        assert_eq!(entry.transaction_id, NO_TRANSACTION);
    }

    #[test]
    fn field_order_does_not_matter() {
        let record = r#"{"data":{"x":1,"_key":"k"},"extra":[1,2,{"a":"}"}],"cname":"c","tid":"0","type":2300}"#;
        let entry = LogEntry::parse(record.as_bytes()).unwrap();
        assert_eq!(entry.document_key.as_deref(), Some("k"));
        assert_eq!(entry.payload.as_deref(), Some(r#"{"x":1,"_key":"k"}"#));
    }

    #[test]
    fn unrecognized_code_parses_envelope_only() {
        let record = r#"{"tick":"5","type":2000,"database":"1","cid":"9","cname":"c","data":{"name":"c"}}"#;
        let entry = LogEntry::parse(record.as_bytes()).unwrap();
        assert_eq!(entry.op_type, OperationType::Unrecognized(2000));
        assert!(entry.payload.is_none());
    }

    #[test]
    fn document_ops_require_collection_and_data() {
        let err = LogEntry::parse(br#"{"type":2300,"tid":"0","data":{"_key":"k"}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField { field: "cname", .. }));

        let err = LogEntry::parse(br#"{"type":2302,"tid":"0","cname":"c"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField { field: "data", .. }));

        let err = LogEntry::parse(br#"{"type":2302,"tid":"0","cname":"c","data":{}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField { field: "_key", .. }));
    }

    #[test]
    fn malformed_records() {
        for record in [
            &b"{\"type\":2300,\"cname\":\"c\""[..],
            b"not json",
            b"\"text\"",
            b"{\"tick\":\"1\"}",
            br#"{"type":2300,"cname":"c","data":"scalar"}"#,
        ] {
            let err = LogEntry::parse(record).unwrap_err();
            assert!(
                matches!(
                    err,
                    ProtocolError::MalformedEntry(_) | ProtocolError::MissingField { .. }
                ),
                "{err}"
            );
        }
    }

    #[test]
    fn split_skips_blank_lines() {
        let body = b"{\"a\":1}\r\n\n  \n{\"b\":2}\n";
        let records: Vec<&[u8]> = split_records(body).collect();
        assert_eq!(records, vec![&b"{\"a\":1}"[..], &b"{\"b\":2}"[..]]);
        assert_eq!(split_records(b"").count(), 0);
    }
}
