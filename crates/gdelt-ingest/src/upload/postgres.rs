//! PostgreSQL table used as a document collection
//!
//! Each record is stored whole in a JSONB column; the identity fields are
//! copied into plain columns so they can be indexed.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};

use super::{validate_collection, UploadReport, Uploader};
use crate::models::EventRecord;

/// Rows per INSERT; 3 binds per row keeps well under the 65,535 parameter limit
const CHUNK_SIZE: usize = 1000;

pub struct PostgresUploader {
    db: PgPool,
    table: String,
}

impl PostgresUploader {
    /// Connect and make sure the collection table exists
    pub async fn connect(url: &str, collection: &str) -> Result<Self> {
        validate_collection(collection)?;

        let db = PgPoolOptions::new()
            .max_connections(2)
            .connect(url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        let uploader = Self {
            db,
            table: collection.to_string(),
        };
        uploader.ensure_table().await?;
        Ok(uploader)
    }

    async fn ensure_table(&self) -> Result<()> {
        // Table name is validated as a plain identifier in connect()
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id BIGSERIAL PRIMARY KEY,
                global_event_id BIGINT,
                event_date TIMESTAMPTZ,
                document JSONB NOT NULL,
                loaded_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            table = self.table
        );
        sqlx::query(&ddl)
            .execute(&self.db)
            .await
            .with_context(|| format!("Failed to create table {}", self.table))?;

        let index = format!(
            "CREATE INDEX IF NOT EXISTS {table}_global_event_id_idx ON {table} (global_event_id)",
            table = self.table
        );
        sqlx::query(&index)
            .execute(&self.db)
            .await
            .with_context(|| format!("Failed to create index on {}", self.table))?;

        info!("Using table {} as document collection", self.table);
        Ok(())
    }
}

#[async_trait]
impl Uploader for PostgresUploader {
    async fn upload(&self, records: &[EventRecord]) -> Result<UploadReport> {
        let documents = records
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to serialize records")?;

        let mut tx = self.db.begin().await.context("Failed to begin transaction")?;

        let total_chunks = records.len().div_ceil(CHUNK_SIZE);
        for (chunk_idx, (chunk, docs)) in records
            .chunks(CHUNK_SIZE)
            .zip(documents.chunks(CHUNK_SIZE))
            .enumerate()
        {
            debug!("Inserting chunk {}/{} ({} rows)", chunk_idx + 1, total_chunks, chunk.len());

            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {} (global_event_id, event_date, document) ",
                self.table
            ));
            query_builder.push_values(chunk.iter().zip(docs), |mut b, (record, doc)| {
                b.push_bind(record.global_event_id)
                    .push_bind(record.date)
                    .push_bind(doc);
            });

            query_builder
                .build()
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to insert into {}", self.table))?;
        }

        tx.commit().await.context("Failed to commit transaction")?;

        Ok(UploadReport {
            inserted: records.len(),
        })
    }

    fn describe(&self) -> String {
        format!("postgres table {}", self.table)
    }
}
