//! Postgres-backed store (runtime queries, no compile-time DB requirement)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use super::{EventStore, NewsStore};
use crate::error::{NewsroomError, Result};
use crate::schemas::{CalendarEvent, Impact, NewsRecord};

const NEWS_COLUMNS: &str = "hash, url, title, description, composed_text, meta, is_suspicious, \
    is_filtered, provider, original_date, publication_id, published_at, created_at";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS news (
        hash            TEXT PRIMARY KEY,
        url             TEXT NOT NULL UNIQUE,
        title           TEXT NOT NULL,
        description     TEXT NOT NULL,
        composed_text   TEXT,
        meta            TEXT,
        is_suspicious   BOOLEAN NOT NULL DEFAULT FALSE,
        is_filtered     BOOLEAN NOT NULL DEFAULT FALSE,
        provider        TEXT NOT NULL,
        original_date   TIMESTAMPTZ NOT NULL,
        publication_id  TEXT,
        published_at    TIMESTAMPTZ,
        created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS news_published_at_idx ON news (published_at)",
    r#"
    CREATE TABLE IF NOT EXISTS calendar_events (
        id          TEXT PRIMARY KEY,
        title       TEXT NOT NULL,
        country     TEXT NOT NULL,
        currency    TEXT NOT NULL,
        date_time   TIMESTAMPTZ NOT NULL,
        impact      TEXT NOT NULL,
        actual      TEXT,
        forecast    TEXT,
        previous    TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS calendar_events_date_time_idx ON calendar_events (date_time)",
];

/// Postgres implementation of [`NewsStore`] and [`EventStore`]
#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    /// Connects to the database
    pub async fn connect(database_url: &str) -> Result<Self> {
        info!("Connecting to database...");
        let db = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        info!("Storage initialized");
        Ok(Self { db })
    }

    pub fn from_pool(db: PgPool) -> Self {
        Self { db }
    }

    /// Creates tables and indexes if they do not exist
    pub async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.db).await?;
        }
        info!("Database schema ready");
        Ok(())
    }
}

fn event_from_row(row: &sqlx::postgres::PgRow) -> std::result::Result<CalendarEvent, sqlx::Error> {
    let impact: String = row.try_get("impact")?;
    Ok(CalendarEvent {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        country: row.try_get("country")?,
        currency: row.try_get("currency")?,
        date_time: row.try_get("date_time")?,
        impact: Impact::parse(&impact),
        actual: row.try_get("actual")?,
        forecast: row.try_get("forecast")?,
        previous: row.try_get("previous")?,
    })
}

#[async_trait]
impl NewsStore for PgStore {
    async fn find_all_by_hashes(&self, hashes: &[String]) -> Result<Vec<NewsRecord>> {
        let query = format!("SELECT {NEWS_COLUMNS} FROM news WHERE hash = ANY($1)");
        let rows = sqlx::query_as::<_, NewsRecord>(&query)
            .bind(hashes)
            .fetch_all(&self.db)
            .await?;
        Ok(rows)
    }

    async fn find_all_by_urls(&self, urls: &[String]) -> Result<Vec<NewsRecord>> {
        let query = format!("SELECT {NEWS_COLUMNS} FROM news WHERE url = ANY($1)");
        let rows = sqlx::query_as::<_, NewsRecord>(&query)
            .bind(urls)
            .fetch_all(&self.db)
            .await?;
        Ok(rows)
    }

    async fn create(&self, records: &[NewsRecord]) -> Result<()> {
        debug!(count = records.len(), "Storing news records");
        let mut tx = self.db.begin().await?;

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO news (hash, url, title, description, composed_text, meta, is_suspicious,
                                  is_filtered, provider, original_date, publication_id, published_at, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                "#,
            )
            .bind(&record.hash)
            .bind(&record.url)
            .bind(&record.title)
            .bind(&record.description)
            .bind(&record.composed_text)
            .bind(&record.meta)
            .bind(record.is_suspicious)
            .bind(record.is_filtered)
            .bind(&record.provider)
            .bind(record.original_date)
            .bind(&record.publication_id)
            .bind(record.published_at)
            .bind(record.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update(&self, record: &NewsRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE news SET
                composed_text = $2,
                meta = $3,
                is_suspicious = $4,
                is_filtered = $5,
                publication_id = $6,
                published_at = $7
            WHERE hash = $1
            "#,
        )
        .bind(&record.hash)
        .bind(&record.composed_text)
        .bind(&record.meta)
        .bind(record.is_suspicious)
        .bind(record.is_filtered)
        .bind(&record.publication_id)
        .bind(record.published_at)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(NewsroomError::StorageError(format!("no record with hash {}", record.hash)));
        }
        Ok(())
    }

    async fn find_all_until_date(&self, cutoff: DateTime<Utc>) -> Result<Vec<NewsRecord>> {
        let query = format!(
            "SELECT {NEWS_COLUMNS} FROM news WHERE published_at >= $1 ORDER BY published_at ASC"
        );
        let rows = sqlx::query_as::<_, NewsRecord>(&query)
            .bind(cutoff)
            .fetch_all(&self.db)
            .await?;
        Ok(rows)
    }
}

#[async_trait]
impl EventStore for PgStore {
    async fn find_events(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<CalendarEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, country, currency, date_time, impact, actual, forecast, previous
            FROM calendar_events
            WHERE date_time >= $1 AND date_time < $2
            ORDER BY date_time ASC, id ASC
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| event_from_row(row).map_err(NewsroomError::from))
            .collect()
    }

    async fn upsert_events(&self, events: &[CalendarEvent]) -> Result<()> {
        let mut tx = self.db.begin().await?;

        for event in events {
            sqlx::query(
                r#"
                INSERT INTO calendar_events (id, title, country, currency, date_time, impact, actual, forecast, previous)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (id) DO UPDATE SET
                    title = EXCLUDED.title,
                    country = EXCLUDED.country,
                    currency = EXCLUDED.currency,
                    date_time = EXCLUDED.date_time,
                    impact = EXCLUDED.impact,
                    actual = EXCLUDED.actual,
                    forecast = EXCLUDED.forecast,
                    previous = EXCLUDED.previous
                "#,
            )
            .bind(&event.id)
            .bind(&event.title)
            .bind(&event.country)
            .bind(&event.currency)
            .bind(event.date_time)
            .bind(event.impact.as_str())
            .bind(&event.actual)
            .bind(&event.forecast)
            .bind(&event.previous)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
