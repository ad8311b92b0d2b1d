//! # Core Type Definitions
//!
//! All core types for the tessera statement store:
//! - String-keyed identifiers (`RowId`, `TableId`, `BucketId`, `TeamId`,
//!   `UserId`, `TransactionId`)
//! - The datatype tag and value envelope (`Datatype`, `ValueEnvelope`,
//!   `FilePointer`)
//! - Graph records and their drafts (`Entity`, `Claim`, `Qualifier`,
//!   `Reference`)
//! - Mutation bookkeeping (`ChangeRecord`, `ChangeAction`)
//! - Configuration (`GraphTables`, `AuditConfig`, `CoreConfig`)
//!
//! Records map to and from gateway rows as JSON documents with camelCase
//! field names; row-transport data (id, timestamps, permission descriptors)
//! never lives inside the document payload.

use crate::error::StoreError;
use crate::gateway::Row;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Unique identifier of a row in the backing row store.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct RowId(pub String);

/// Identifier of a logical table in the row store.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct TableId(pub String);

/// Identifier of an object-storage bucket.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct BucketId(pub String);

/// Identifier of a team in the identity service.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct TeamId(pub String);

/// Identifier of a user in the identity service.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct UserId(pub String);

/// Ephemeral handle scoping a set of row operations to one atomic
/// commit/rollback in the row store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub String);

macro_rules! string_id_impl {
    ($name:ident) => {
        impl $name {
            /// Create a new identifier from a string.
            #[must_use]
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Get the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id_impl!(RowId);
string_id_impl!(TableId);
string_id_impl!(BucketId);
string_id_impl!(TeamId);
string_id_impl!(UserId);
string_id_impl!(TransactionId);

// =============================================================================
// DATATYPE
// =============================================================================

/// The datatype tag of a stored value.
///
/// The tag is always defined on a value; it determines both how the value is
/// rendered (via the `registry`) and whether/where its bytes are offloaded to
/// object storage. Unrecognized tags survive round-trips via `Other`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Datatype {
    Text,
    Number,
    Boolean,
    Date,
    Url,
    Color,
    Coordinate,
    Polygon,
    Json,
    Image,
    Relation,
    Other(String),
}

impl Datatype {
    /// Get the wire tag for this datatype.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Url => "url",
            Self::Color => "color",
            Self::Coordinate => "coordinate",
            Self::Polygon => "polygon",
            Self::Json => "json",
            Self::Image => "image",
            Self::Relation => "relation",
            Self::Other(tag) => tag,
        }
    }

    /// Whether values of this datatype reference another entity instead of
    /// carrying a literal.
    #[must_use]
    pub fn is_relation(&self) -> bool {
        matches!(self, Self::Relation)
    }
}

impl From<&str> for Datatype {
    fn from(tag: &str) -> Self {
        match tag {
            "text" => Self::Text,
            "number" => Self::Number,
            "boolean" => Self::Boolean,
            "date" => Self::Date,
            "url" => Self::Url,
            "color" => Self::Color,
            "coordinate" => Self::Coordinate,
            "polygon" => Self::Polygon,
            "json" => Self::Json,
            "image" => Self::Image,
            "relation" => Self::Relation,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for Datatype {
    fn from(tag: String) -> Self {
        Self::from(tag.as_str())
    }
}

impl From<Datatype> for String {
    fn from(datatype: Datatype) -> Self {
        datatype.as_str().to_string()
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// VALUE ENVELOPE
// =============================================================================

/// Pointer to a detached large object in object storage.
///
/// Stored in place of an inline literal when the serialized payload exceeded
/// a plugin's inline-size threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePointer {
    pub file_id: String,
    pub bucket_id: BucketId,
    pub url: String,
}

/// The canonical shape for any stored literal value.
///
/// `data` is either the inline literal or a [`FilePointer`] object when the
/// payload was offloaded to a bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueEnvelope {
    pub datatype: Datatype,
    pub data: Value,
}

impl ValueEnvelope {
    /// Create an inline value envelope.
    #[must_use]
    pub fn new(datatype: Datatype, data: impl Into<Value>) -> Self {
        Self {
            datatype,
            data: data.into(),
        }
    }

    /// Create a pointer envelope for an offloaded payload.
    #[must_use]
    pub fn pointer(datatype: Datatype, pointer: FilePointer) -> Self {
        let data = serde_json::to_value(pointer).unwrap_or(Value::Null);
        Self { datatype, data }
    }

    /// Interpret the payload as a large-object pointer, if it is one.
    #[must_use]
    pub fn as_pointer(&self) -> Option<FilePointer> {
        serde_json::from_value(self.data.clone()).ok()
    }

    /// Whether the payload is a large-object pointer.
    #[must_use]
    pub fn is_pointer(&self) -> bool {
        self.as_pointer().is_some()
    }

    /// Length of the serialized payload in characters.
    ///
    /// This is the size compared against a storage policy's inline threshold.
    #[must_use]
    pub fn serialized_len(&self) -> usize {
        serialized_len(&self.data)
    }
}

/// Length of a serialized JSON payload in characters.
#[must_use]
pub fn serialized_len(data: &Value) -> usize {
    serde_json::to_string(data).map(|s| s.len()).unwrap_or(0)
}

// =============================================================================
// CHANGE RECORDS
// =============================================================================

/// The kind of row operation recorded in a change accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
}

/// One planned or performed row operation.
///
/// Accumulated by the cascade planner and the statement API, threaded
/// through to the audit engine and the local journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub action: ChangeAction,
    pub table: TableId,
    pub row_id: RowId,
}

impl ChangeRecord {
    /// Record a row creation.
    #[must_use]
    pub fn create(table: TableId, row_id: RowId) -> Self {
        Self {
            action: ChangeAction::Create,
            table,
            row_id,
        }
    }

    /// Record a row update.
    #[must_use]
    pub fn update(table: TableId, row_id: RowId) -> Self {
        Self {
            action: ChangeAction::Update,
            table,
            row_id,
        }
    }

    /// Record a row deletion.
    #[must_use]
    pub fn delete(table: TableId, row_id: RowId) -> Self {
        Self {
            action: ChangeAction::Delete,
            table,
            row_id,
        }
    }
}

// =============================================================================
// GRAPH RECORDS
// =============================================================================

/// A node in the knowledge graph (item or property; both share one table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    #[serde(skip)]
    pub id: RowId,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl Entity {
    /// Build an entity record from a gateway row.
    pub fn from_row(row: &Row) -> Result<Self, StoreError> {
        let mut entity: Self = from_object(&row.data)?;
        entity.id = row.id.clone();
        Ok(entity)
    }
}

/// Input for creating or replacing an entity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDraft {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl EntityDraft {
    /// Create a draft with just a label.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            description: None,
            aliases: Vec::new(),
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the aliases.
    #[must_use]
    pub fn with_aliases(mut self, aliases: Vec<String>) -> Self {
        self.aliases = aliases;
        self
    }

    /// Validate the draft.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.label.trim().is_empty() {
            return Err(StoreError::Validation("entity label must not be empty".into()));
        }
        Ok(())
    }

    /// Serialize the draft into a row document.
    pub fn to_data(&self) -> Result<Map<String, Value>, StoreError> {
        to_object(self)
    }
}

/// An assertion `subject–property–value` about an entity.
///
/// Exactly one of `value`/`value_relation` is meaningful depending on
/// `datatype`: `relation` claims point at another entity, everything else
/// carries a literal envelope. Qualifier and reference lists are filled by
/// expanded reads and are never stored on the claim row itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    #[serde(skip)]
    pub id: RowId,
    pub subject: RowId,
    pub property: RowId,
    pub datatype: Datatype,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ValueEnvelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_relation: Option<RowId>,
    #[serde(skip)]
    pub qualifiers: Vec<Qualifier>,
    #[serde(skip)]
    pub references: Vec<Reference>,
}

impl Claim {
    /// Build a claim record from a gateway row (dependent lists empty).
    pub fn from_row(row: &Row) -> Result<Self, StoreError> {
        let mut claim: Self = from_object(&row.data)?;
        claim.id = row.id.clone();
        Ok(claim)
    }
}

/// Input for creating or replacing a claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimDraft {
    pub subject: RowId,
    pub property: RowId,
    pub datatype: Datatype,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ValueEnvelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_relation: Option<RowId>,
}

impl ClaimDraft {
    /// Create a literal-valued claim draft.
    #[must_use]
    pub fn literal(subject: RowId, property: RowId, value: ValueEnvelope) -> Self {
        Self {
            subject,
            property,
            datatype: value.datatype.clone(),
            value: Some(value),
            value_relation: None,
        }
    }

    /// Create a relation claim draft pointing at another entity.
    #[must_use]
    pub fn relation(subject: RowId, property: RowId, target: RowId) -> Self {
        Self {
            subject,
            property,
            datatype: Datatype::Relation,
            value: None,
            value_relation: Some(target),
        }
    }

    /// Validate the value-shape rule for this draft's datatype.
    pub fn validate(&self) -> Result<(), StoreError> {
        validate_value_shape(&self.datatype, self.value.as_ref(), self.value_relation.as_ref())
    }

    /// Serialize the draft into a row document.
    pub fn to_data(&self) -> Result<Map<String, Value>, StoreError> {
        to_object(self)
    }
}

/// Contextual refinement attached to a claim (e.g. "as of date").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Qualifier {
    #[serde(skip)]
    pub id: RowId,
    pub claim: RowId,
    pub property: RowId,
    pub datatype: Datatype,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ValueEnvelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_relation: Option<RowId>,
}

impl Qualifier {
    /// Build a qualifier record from a gateway row.
    pub fn from_row(row: &Row) -> Result<Self, StoreError> {
        let mut qualifier: Self = from_object(&row.data)?;
        qualifier.id = row.id.clone();
        Ok(qualifier)
    }
}

/// Input for creating or replacing a qualifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualifierDraft {
    pub claim: RowId,
    pub property: RowId,
    pub datatype: Datatype,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ValueEnvelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_relation: Option<RowId>,
}

impl QualifierDraft {
    /// Create a literal-valued qualifier draft.
    #[must_use]
    pub fn literal(claim: RowId, property: RowId, value: ValueEnvelope) -> Self {
        Self {
            claim,
            property,
            datatype: value.datatype.clone(),
            value: Some(value),
            value_relation: None,
        }
    }

    /// Validate the value-shape rule for this draft's datatype.
    pub fn validate(&self) -> Result<(), StoreError> {
        validate_value_shape(&self.datatype, self.value.as_ref(), self.value_relation.as_ref())
    }

    /// Serialize the draft into a row document.
    pub fn to_data(&self) -> Result<Map<String, Value>, StoreError> {
        to_object(self)
    }
}

/// A citation supporting a claim: free text, a link to another entity, or
/// both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    #[serde(skip)]
    pub id: RowId,
    pub claim: RowId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<RowId>,
}

impl Reference {
    /// Build a reference record from a gateway row.
    pub fn from_row(row: &Row) -> Result<Self, StoreError> {
        let mut reference: Self = from_object(&row.data)?;
        reference.id = row.id.clone();
        Ok(reference)
    }
}

/// Input for creating or replacing a reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceDraft {
    pub claim: RowId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<RowId>,
}

impl ReferenceDraft {
    /// Create a free-text citation draft.
    #[must_use]
    pub fn text(claim: RowId, details: impl Into<String>) -> Self {
        Self {
            claim,
            details: Some(details.into()),
            reference: None,
        }
    }

    /// Create a citation draft linking another entity.
    #[must_use]
    pub fn entity(claim: RowId, reference: RowId) -> Self {
        Self {
            claim,
            details: None,
            reference: Some(reference),
        }
    }

    /// Validate the draft: a citation must carry text or a link.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.details.is_none() && self.reference.is_none() {
            return Err(StoreError::Validation(
                "reference must carry details or an entity link".into(),
            ));
        }
        Ok(())
    }

    /// Serialize the draft into a row document.
    pub fn to_data(&self) -> Result<Map<String, Value>, StoreError> {
        to_object(self)
    }
}

/// Shared value-shape rule for claims and qualifiers.
fn validate_value_shape(
    datatype: &Datatype,
    value: Option<&ValueEnvelope>,
    value_relation: Option<&RowId>,
) -> Result<(), StoreError> {
    if datatype.is_relation() {
        if value_relation.is_none() {
            return Err(StoreError::Validation(
                "relation values must set valueRelation".into(),
            ));
        }
        if value.is_some() {
            return Err(StoreError::Validation(
                "relation values must not carry a literal envelope".into(),
            ));
        }
    } else if value_relation.is_some() {
        return Err(StoreError::Validation(format!(
            "datatype \"{datatype}\" must not set valueRelation"
        )));
    }
    if let Some(envelope) = value {
        if &envelope.datatype != datatype {
            return Err(StoreError::Validation(format!(
                "envelope datatype \"{}\" does not match \"{datatype}\"",
                envelope.datatype
            )));
        }
    }
    Ok(())
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// The logical tables making up the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphTables {
    pub entities: TableId,
    pub claims: TableId,
    pub qualifiers: TableId,
    pub references: TableId,
}

impl Default for GraphTables {
    fn default() -> Self {
        Self {
            entities: TableId::new("entities"),
            claims: TableId::new("claims"),
            qualifiers: TableId::new("qualifiers"),
            references: TableId::new("references"),
        }
    }
}

impl GraphTables {
    /// Relation fields resolvable by one-hop expansion, mapped to the table
    /// their ids live in. Supplied to gateway backends for `field.*`
    /// selection terms.
    #[must_use]
    pub fn relation_map(&self) -> BTreeMap<String, TableId> {
        BTreeMap::from([
            ("subject".to_string(), self.entities.clone()),
            ("property".to_string(), self.entities.clone()),
            ("valueRelation".to_string(), self.entities.clone()),
            ("claim".to_string(), self.claims.clone()),
            ("reference".to_string(), self.entities.clone()),
        ])
    }
}

/// Audit configuration.
///
/// Auditing is best-effort observability, never a precondition for
/// mutation: with `table` unset, every mutation still runs and the audit
/// engine no-ops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditConfig {
    /// The audit log table; `None` disables auditing entirely.
    pub table: Option<TableId>,
    /// Team whose members may read and review audit rows.
    pub review_team: Option<TeamId>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            table: Some(TableId::new("audit")),
            review_team: None,
        }
    }
}

impl AuditConfig {
    /// Configuration with auditing switched off.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            table: None,
            review_team: None,
        }
    }

    /// Set the reviewing team.
    #[must_use]
    pub fn with_review_team(mut self, team: TeamId) -> Self {
        self.review_team = Some(team);
        self
    }
}

/// Top-level configuration for a statement store.
#[derive(Debug, Clone, Default)]
pub struct CoreConfig {
    pub tables: GraphTables,
    pub audit: AuditConfig,
    /// Capacity of the bounded local journal.
    pub journal_capacity: Option<usize>,
}

// =============================================================================
// ROW DOCUMENT HELPERS
// =============================================================================

/// Serialize a record into a row document map.
pub(crate) fn to_object(record: impl Serialize) -> Result<Map<String, Value>, StoreError> {
    match serde_json::to_value(record).map_err(StoreError::serialization)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Serialization(format!(
            "record did not serialize to an object: {other}"
        ))),
    }
}

/// Deserialize a record from a row document map.
pub(crate) fn from_object<T: serde::de::DeserializeOwned>(
    data: &Map<String, Value>,
) -> Result<T, StoreError> {
    serde_json::from_value(Value::Object(data.clone())).map_err(StoreError::serialization)
}

// =============================================================================
// TESTS
// =============================================================================
