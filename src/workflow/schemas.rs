use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    entity, ExtractionRecord, SchemaKind, SchemaLineage, SchemaRecord,
};
use crate::quota::Counter;
use crate::store::{Filter, StoreError};
use crate::tenant::TenantContext;

use super::ConversionWorkflow;

const REVISION_ATTEMPTS: u32 = 3;

impl ConversionWorkflow {
    /// Create the one-time initial schema for a conversion, derived from
    /// whatever extractions exist so far. Billable (`api_calls_used`),
    /// but a conversion that already has its initial schema gets it back
    /// unbilled; further edits go through `revise_schema`.
    pub async fn generate_schema(
        &self,
        ctx: &TenantContext,
        conversion_id: &str,
    ) -> AppResult<SchemaRecord> {
        let (conversion, _) = self.load_conversion(ctx, conversion_id).await?;
        Self::ensure_in_progress(&conversion, "generate a schema")?;

        let initial_id = SchemaRecord::initial_id(conversion.id);
        let partition = conversion.id.to_string();
        if let Some(existing) = self
            .store
            .read(entity::SCHEMA, &initial_id, &partition)
            .await?
        {
            return Self::decode(&existing);
        }

        let content = self.derive_schema_content(&conversion.id).await?;
        let record = SchemaRecord {
            id: initial_id.clone(),
            conversion_id: conversion.id,
            owner_email: conversion.owner_email.clone(),
            kind: SchemaKind::Schema,
            version: 1,
            content,
            created_by: ctx.user_email.clone(),
            created_at: Utc::now(),
        };
        match self
            .store
            .create(entity::SCHEMA, &initial_id, &partition, json!(record))
            .await
        {
            // Billing is tied to winning the insert; exactly one of any
            // set of concurrent generators pays. A refused increment
            // backs the row out so nothing is created past the limit.
            Ok(_) => {
                if let Err(err) = self
                    .quota
                    .check_and_increment(&ctx.user_email, ctx.tier, Counter::ApiCalls)
                    .await
                {
                    self.store
                        .delete(entity::SCHEMA, &initial_id, &partition)
                        .await?;
                    return Err(err);
                }
                info!(conversion_id = %conversion.id, "initial schema generated");
                Ok(record)
            }
            // Lost the race to a concurrent generate; the stored record
            // wins and the loser is not billed.
            Err(StoreError::AlreadyExists) => {
                let existing = self
                    .store
                    .read(entity::SCHEMA, &initial_id, &partition)
                    .await?
                    .ok_or_else(AppError::not_found)?;
                Self::decode(&existing)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Append one revision to the lineage. Never billable. Versions are
    /// strictly monotonic; the create-once insert of `conversion:rev:N`
    /// resolves concurrent revisers to distinct versions.
    pub async fn revise_schema(
        &self,
        ctx: &TenantContext,
        conversion_id: &str,
        content: Value,
    ) -> AppResult<SchemaRecord> {
        let (conversion, _) = self.load_conversion(ctx, conversion_id).await?;
        Self::ensure_in_progress(&conversion, "revise the schema")?;
        let partition = conversion.id.to_string();

        if self
            .store
            .exists(
                entity::FINAL_SCHEMA,
                &SchemaRecord::final_id(conversion.id),
                &partition,
            )
            .await?
        {
            return Err(AppError::resource_locked("schema lineage is finalized"));
        }
        if !self
            .store
            .exists(
                entity::SCHEMA,
                &SchemaRecord::initial_id(conversion.id),
                &partition,
            )
            .await?
        {
            return Err(AppError::invalid_state(
                "no schema has been generated for this conversion",
            ));
        }

        let mut next_version = self.latest_lineage_version(&conversion.id).await? + 1;
        for _ in 0..REVISION_ATTEMPTS {
            let record = SchemaRecord {
                id: SchemaRecord::revision_id(conversion.id, next_version),
                conversion_id: conversion.id,
                owner_email: conversion.owner_email.clone(),
                kind: SchemaKind::SchemaRevision,
                version: next_version,
                content: content.clone(),
                created_by: ctx.user_email.clone(),
                created_at: Utc::now(),
            };
            match self
                .store
                .create(entity::SCHEMA_REVISION, &record.id, &partition, json!(record))
                .await
            {
                Ok(_) => {
                    // A finalizer may have landed between the lock check
                    // above and this insert. Finalization is terminal, so
                    // back the revision out rather than let it attach.
                    if self
                        .store
                        .exists(
                            entity::FINAL_SCHEMA,
                            &SchemaRecord::final_id(conversion.id),
                            &partition,
                        )
                        .await?
                    {
                        self.store
                            .delete(entity::SCHEMA_REVISION, &record.id, &partition)
                            .await?;
                        return Err(AppError::resource_locked("schema lineage is finalized"));
                    }
                    info!(
                        conversion_id = %conversion.id,
                        version = next_version,
                        "schema revised"
                    );
                    return Ok(record);
                }
                Err(StoreError::AlreadyExists) => {
                    next_version += 1;
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(AppError::resource_locked(
            "schema lineage is under concurrent revision",
        ))
    }

    /// Terminal step of the lineage. The `final_schema` row is
    /// create-once per conversion, so two racing finalizers get exactly
    /// one success; the loser sees the lineage as already finalized.
    pub async fn finalize_schema(
        &self,
        ctx: &TenantContext,
        conversion_id: &str,
    ) -> AppResult<SchemaRecord> {
        let (conversion, _) = self.load_conversion(ctx, conversion_id).await?;
        Self::ensure_in_progress(&conversion, "finalize the schema")?;
        let partition = conversion.id.to_string();

        let initial = self
            .store
            .read(
                entity::SCHEMA,
                &SchemaRecord::initial_id(conversion.id),
                &partition,
            )
            .await?
            .ok_or_else(|| {
                AppError::invalid_state("no schema has been generated for this conversion")
            })?;
        let initial: SchemaRecord = Self::decode(&initial)?;

        let revisions = self.lineage_revisions(&conversion.id).await?;
        let (content, latest_version) = revisions
            .last()
            .map(|revision| (revision.content.clone(), revision.version))
            .unwrap_or((initial.content.clone(), initial.version));

        let record = SchemaRecord {
            id: SchemaRecord::final_id(conversion.id),
            conversion_id: conversion.id,
            owner_email: conversion.owner_email.clone(),
            kind: SchemaKind::FinalSchema,
            version: latest_version + 1,
            content,
            created_by: ctx.user_email.clone(),
            created_at: Utc::now(),
        };
        match self
            .store
            .create(entity::FINAL_SCHEMA, &record.id, &partition, json!(record))
            .await
        {
            Ok(_) => {
                info!(conversion_id = %conversion.id, "schema finalized");
                Ok(record)
            }
            Err(StoreError::AlreadyExists) => {
                Err(AppError::resource_locked("schema is already finalized"))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// The whole lineage: initial schema, ordered revisions, optional
    /// finalized version.
    pub async fn schema_lineage(
        &self,
        ctx: &TenantContext,
        conversion_id: &str,
    ) -> AppResult<SchemaLineage> {
        let (conversion, _) = self.load_conversion(ctx, conversion_id).await?;
        let partition = conversion.id.to_string();

        let schema = match self
            .store
            .read(
                entity::SCHEMA,
                &SchemaRecord::initial_id(conversion.id),
                &partition,
            )
            .await?
        {
            Some(item) => Some(Self::decode(&item)?),
            None => None,
        };
        let revisions = self.lineage_revisions(&conversion.id).await?;
        let final_schema = match self
            .store
            .read(
                entity::FINAL_SCHEMA,
                &SchemaRecord::final_id(conversion.id),
                &partition,
            )
            .await?
        {
            Some(item) => Some(Self::decode(&item)?),
            None => None,
        };

        Ok(SchemaLineage {
            schema,
            revisions,
            final_schema,
        })
    }

    pub(crate) async fn lineage_revisions(
        &self,
        conversion_id: &Uuid,
    ) -> AppResult<Vec<SchemaRecord>> {
        let items = self
            .store
            .query(
                entity::SCHEMA_REVISION,
                &Filter::new(),
                Some(&conversion_id.to_string()),
            )
            .await?;
        let mut revisions: Vec<SchemaRecord> = items
            .iter()
            .map(Self::decode)
            .collect::<AppResult<_>>()?;
        revisions.sort_by_key(|record| record.version);
        Ok(revisions)
    }

    async fn latest_lineage_version(&self, conversion_id: &Uuid) -> AppResult<i64> {
        Ok(self
            .lineage_revisions(conversion_id)
            .await?
            .last()
            .map(|record| record.version)
            .unwrap_or(1))
    }

    /// Field candidates from every extraction recorded for the
    /// conversion's documents, deduplicated by name.
    async fn derive_schema_content(&self, conversion_id: &Uuid) -> AppResult<Value> {
        let filter = Filter::new().eq("conversion_id", conversion_id.to_string());
        let items = self.store.query(entity::EXTRACTION, &filter, None).await?;

        let mut fields = Map::new();
        let mut sources = Vec::new();
        for item in &items {
            let record: ExtractionRecord = Self::decode(item)?;
            sources.push(record.id.clone());
            if let Value::Object(pairs) = &record.payload.key_value_pairs {
                for (name, sample) in pairs {
                    fields.entry(name.clone()).or_insert_with(|| {
                        json!({
                            "name": name,
                            "type": json_type_name(sample),
                            "sample": sample,
                            "source": record.source.as_str(),
                        })
                    });
                }
            }
        }

        Ok(json!({
            "fields": fields.values().collect::<Vec<_>>(),
            "derived_from": sources,
        }))
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
