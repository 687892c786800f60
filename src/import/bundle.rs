use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// One row of an operation: column name to JSON value.
pub type RowMap = Map<String, Value>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed bundle: {0}")]
    Malformed(String),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("unknown bundle type '{0}'")]
    UnknownKind(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleKind {
    Data,
    Patch,
}

impl BundleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BundleKind::Data => "data",
            BundleKind::Patch => "patch",
        }
    }
}

impl fmt::Display for BundleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BundleKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "data" => Ok(BundleKind::Data),
            "patch" => Ok(BundleKind::Patch),
            other => Err(ParseError::UnknownKind(other.to_string())),
        }
    }
}

/// A single table step. `action` stays as written in the file; it is
/// resolved against the dispatcher so an unknown verb fails the bundle at
/// apply time rather than at parse time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Operation {
    pub action: String,
    pub table: String,
    pub values: Vec<RowMap>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleDescriptor {
    pub name: String,
    pub kind: BundleKind,
    pub depends_on: Vec<String>,
    pub operations: Vec<Operation>,
}

#[derive(Deserialize)]
struct RawBundle {
    name: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    depends: Option<Vec<String>>,
    payload: Option<RawPayload>,
}

#[derive(Deserialize)]
struct RawPayload {
    operations: Option<Vec<RawOperation>>,
}

#[derive(Deserialize)]
struct RawOperation {
    #[serde(default)]
    action: String,
    #[serde(default)]
    table: String,
    #[serde(default)]
    values: Vec<RowMap>,
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ParseError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ParseError::MissingField(field)),
    }
}

pub fn parse_bundle(bytes: &[u8]) -> Result<BundleDescriptor, ParseError> {
    let raw: RawBundle =
        serde_json::from_slice(bytes).map_err(|err| ParseError::Malformed(err.to_string()))?;

    let name = required(raw.name, "name")?;
    let kind = required(raw.kind, "type")?.parse::<BundleKind>()?;
    let payload = raw.payload.ok_or(ParseError::MissingField("payload"))?;
    let operations = payload
        .operations
        .ok_or(ParseError::MissingField("payload.operations"))?
        .into_iter()
        .map(|op| Operation {
            action: op.action,
            table: op.table,
            values: op.values,
        })
        .collect();

    Ok(BundleDescriptor {
        name,
        kind,
        depends_on: raw.depends.unwrap_or_default(),
        operations,
    })
}
