use bson::{Bson, Document};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::metrics::OperationLabels;

/// Errors raised while validating a single `currentOp` entry.
///
/// These are always local to one entry: the tracker logs and skips the entry
/// and carries on with the rest of the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("missing {field} field")]
    Missing { field: &'static str },

    #[error("field {field} is not of type {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
}

/// One running (or just completed) operation as reported by `currentOp`.
#[derive(Debug, Clone, Serialize)]
pub struct OperationRecord {
    pub opid: i32,
    pub effective_user: String,
    pub running_micros: i64,
    pub delta_micros: i64,
    #[serde(rename = "op")]
    pub operation: String,
    #[serde(rename = "ns")]
    pub namespace: String,
    /// Relaxed extended JSON of the command payload; empty when unavailable.
    pub command: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub observed_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub completed_at: Option<DateTime<Utc>>,
    pub raw: serde_json::Value,
}

impl OperationRecord {
    /// Validate a raw `inprog` entry into a typed record.
    ///
    /// Required: `opid` (int32), `microsecs_running` (int64), `op`, `ns` and
    /// `effectiveUsers[0].user` (strings). `command` is best-effort and never
    /// fails the parse.
    pub fn parse(raw: &Document, observed_at: DateTime<Utc>) -> Result<Self, ParseError> {
        let opid = match field(raw, "opid")? {
            Bson::Int32(value) => *value,
            _ => return Err(wrong_type("opid", "int32")),
        };

        let running_micros = match field(raw, "microsecs_running")? {
            Bson::Int64(value) => *value,
            _ => return Err(wrong_type("microsecs_running", "int64")),
        };

        let operation = string_field(raw, "op")?;
        let namespace = string_field(raw, "ns")?;
        let effective_user = normalize_user(effective_user(raw)?);

        let command = raw
            .get("command")
            .and_then(|command| serde_json::to_string(&command.clone().into_relaxed_extjson()).ok())
            .unwrap_or_default();

        Ok(Self {
            opid,
            effective_user,
            running_micros,
            delta_micros: 0,
            operation: operation.to_string(),
            namespace: namespace.to_string(),
            command,
            observed_at,
            completed_at: None,
            raw: Bson::Document(raw.clone()).into_relaxed_extjson(),
        })
    }

    pub fn labels(&self) -> OperationLabels<'_> {
        OperationLabels {
            user: &self.effective_user,
            operation: &self.operation,
            namespace: &self.namespace,
        }
    }
}

/// Strip the randomized per-connection suffix from an account name.
///
/// `auto-default-abc123` becomes `auto-default`; names without a hyphen are
/// returned unchanged.
pub fn normalize_user(user: &str) -> String {
    match user.rfind('-') {
        Some(idx) => user[..idx].to_string(),
        None => user.to_string(),
    }
}

fn field<'a>(raw: &'a Document, name: &'static str) -> Result<&'a Bson, ParseError> {
    raw.get(name).ok_or(ParseError::Missing { field: name })
}

fn string_field<'a>(raw: &'a Document, name: &'static str) -> Result<&'a str, ParseError> {
    match field(raw, name)? {
        Bson::String(value) => Ok(value),
        _ => Err(wrong_type(name, "string")),
    }
}

fn effective_user(raw: &Document) -> Result<&str, ParseError> {
    let users = match field(raw, "effectiveUsers")? {
        Bson::Array(users) => users,
        _ => return Err(wrong_type("effectiveUsers", "array")),
    };

    match users.first() {
        Some(Bson::Document(user)) => match user.get("user") {
            Some(Bson::String(name)) => Ok(name),
            Some(_) => Err(wrong_type("effectiveUsers.user", "string")),
            None => Err(ParseError::Missing {
                field: "effectiveUsers.user",
            }),
        },
        Some(_) => Err(wrong_type("effectiveUsers", "array of documents")),
        None => Err(ParseError::Missing {
            field: "effectiveUsers",
        }),
    }
}

fn wrong_type(field: &'static str, expected: &'static str) -> ParseError {
    ParseError::WrongType { field, expected }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn entry() -> Document {
        doc! {
            "opid": 42_i32,
            "microsecs_running": 1_250_000_i64,
            "op": "query",
            "ns": "app.users",
            "effectiveUsers": [{ "user": "auto-default-92c989781b97", "db": "admin" }],
            "command": { "find": "users", "filter": { "age": { "$gt": 30_i32 } } },
        }
    }

    #[test]
    fn parses_required_fields() {
        let now = Utc::now();
        let record = OperationRecord::parse(&entry(), now).expect("parse");

        assert_eq!(record.opid, 42);
        assert_eq!(record.running_micros, 1_250_000);
        assert_eq!(record.delta_micros, 0);
        assert_eq!(record.operation, "query");
        assert_eq!(record.namespace, "app.users");
        assert_eq!(record.effective_user, "auto-default");
        assert_eq!(record.observed_at, now);
        assert!(record.completed_at.is_none());
        assert!(record.command.contains("\"find\":\"users\""));
        assert_eq!(record.raw["opid"], serde_json::json!(42));
    }

    #[test]
    fn missing_command_leaves_it_empty() {
        let mut raw = entry();
        raw.remove("command");
        let record = OperationRecord::parse(&raw, Utc::now()).expect("parse");
        assert!(record.command.is_empty());
    }

    #[test]
    fn each_required_field_is_reported_when_missing() {
        for name in ["opid", "microsecs_running", "op", "ns", "effectiveUsers"] {
            let mut raw = entry();
            raw.remove(name);
            let err = OperationRecord::parse(&raw, Utc::now()).expect_err(name);
            assert_eq!(err, ParseError::Missing { field: name });
        }
    }

    #[test]
    fn wrong_types_are_rejected() {
        let mut raw = entry();
        raw.insert("opid", "42");
        assert_eq!(
            OperationRecord::parse(&raw, Utc::now()).unwrap_err(),
            ParseError::WrongType {
                field: "opid",
                expected: "int32"
            }
        );

        let mut raw = entry();
        raw.insert("microsecs_running", 10_i32);
        assert!(matches!(
            OperationRecord::parse(&raw, Utc::now()),
            Err(ParseError::WrongType {
                field: "microsecs_running",
                ..
            })
        ));
    }

    #[test]
    fn empty_effective_users_is_missing() {
        let mut raw = entry();
        raw.insert("effectiveUsers", Bson::Array(Vec::new()));
        assert_eq!(
            OperationRecord::parse(&raw, Utc::now()).unwrap_err(),
            ParseError::Missing {
                field: "effectiveUsers"
            }
        );

        let mut raw = entry();
        raw.insert("effectiveUsers", vec![doc! { "db": "admin" }]);
        assert_eq!(
            OperationRecord::parse(&raw, Utc::now()).unwrap_err(),
            ParseError::Missing {
                field: "effectiveUsers.user"
            }
        );
    }

    #[test]
    fn normalize_user_trims_last_suffix() {
        assert_eq!(normalize_user("auto-default-abc123"), "auto-default");
        assert_eq!(normalize_user("bob-xyz"), "bob");
        assert_eq!(normalize_user("reporting"), "reporting");
        assert_eq!(normalize_user("trailing-"), "trailing");
    }
}
