use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Entity type discriminators used as the first component of the store key.
pub mod entity {
    pub const CONVERSION: &str = "conversion";
    pub const DOCUMENT: &str = "document";
    pub const EXTRACTION: &str = "extraction";
    pub const SCHEMA: &str = "schema";
    pub const SCHEMA_REVISION: &str = "schema_revision";
    pub const FINAL_SCHEMA: &str = "final_schema";
    pub const EXPORT: &str = "export";
    pub const QUOTA_COUNTER: &str = "quota_counter";
    pub const OWNERSHIP: &str = "ownership";
    pub const FEEDBACK: &str = "feedback";
}

/// Resource type names recorded in the ownership registry.
pub mod resource {
    pub const CONVERSION: &str = "conversion";
    pub const DOCUMENT: &str = "document";
    pub const EXPORT: &str = "export";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionStatus {
    InProgress,
    Completed,
    Failed,
    Archived,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversion {
    pub id: Uuid,
    pub owner_email: String,
    pub tenant_id: String,
    pub status: ConversionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub document_ids: Vec<Uuid>,
    pub metadata: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Uploaded,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub conversion_id: Uuid,
    pub owner_email: String,
    pub filename: String,
    pub content_type: String,
    pub size: i64,
    pub checksum: String,
    pub blob_ref: String,
    pub status: DocumentStatus,
    pub error: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSource {
    DirectParse,
    Ocr,
    ExternalDi,
}

impl ExtractionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionSource::DirectParse => "direct_parse",
            ExtractionSource::Ocr => "ocr",
            ExtractionSource::ExternalDi => "external_di",
        }
    }
}

/// A user edit to an extracted value. Entries are append-only; history is
/// never rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserModification {
    pub field: String,
    pub original_value: Value,
    pub new_value: Value,
    pub author: String,
    pub timestamp: DateTime<Utc>,
}

/// One extraction per (document, source) pair, keyed `document_id:source`
/// and partitioned by owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRecord {
    pub id: String,
    pub document_id: Uuid,
    pub conversion_id: Uuid,
    pub owner_email: String,
    pub source: ExtractionSource,
    pub payload: ExtractionPayload,
    #[serde(default)]
    pub summary: Option<Value>,
    #[serde(default)]
    pub modifications: Vec<UserModification>,
    #[serde(default)]
    pub preferences: Value,
    pub extracted_at: DateTime<Utc>,
}

impl ExtractionRecord {
    pub fn record_id(document_id: Uuid, source: ExtractionSource) -> String {
        format!("{document_id}:{}", source.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionPayload {
    pub text: String,
    #[serde(default)]
    pub tables: Value,
    #[serde(default)]
    pub key_value_pairs: Value,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaKind {
    Schema,
    SchemaRevision,
    FinalSchema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaRecord {
    pub id: String,
    pub conversion_id: Uuid,
    pub owner_email: String,
    pub kind: SchemaKind,
    pub version: i64,
    pub content: Value,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl SchemaRecord {
    pub fn initial_id(conversion_id: Uuid) -> String {
        conversion_id.to_string()
    }

    pub fn revision_id(conversion_id: Uuid, version: i64) -> String {
        format!("{conversion_id}:rev:{version}")
    }

    pub fn final_id(conversion_id: Uuid) -> String {
        conversion_id.to_string()
    }
}

/// The initial schema, its revision history and the optional terminal
/// finalized version, assembled for responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaLineage {
    pub schema: Option<SchemaRecord>,
    pub revisions: Vec<SchemaRecord>,
    pub final_schema: Option<SchemaRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRecord {
    pub id: Uuid,
    pub conversion_id: Uuid,
    pub owner_email: String,
    pub format: String,
    pub content_type: String,
    pub output_ref: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnershipRecord {
    pub tenant_id: String,
    pub resource_type: String,
    pub resource_id: String,
    pub owner_email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaCounter {
    pub owner_email: String,
    pub conversions_used: i64,
    pub api_calls_used: i64,
    pub exports_used: i64,
}

impl QuotaCounter {
    pub fn zeroed(owner_email: &str) -> Self {
        Self {
            owner_email: owner_email.to_string(),
            conversions_used: 0,
            api_calls_used: 0,
            exports_used: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: Uuid,
    pub resource_id: String,
    pub quality_rating: Option<i32>,
    pub accuracy_rating: Option<i32>,
    pub completeness_rating: Option<i32>,
    pub comments: Option<String>,
    pub submitted_by: String,
    pub submitted_at: DateTime<Utc>,
}
