use async_trait::async_trait;
use awsync_core::config::PostgresConfig;
use awsync_core::{ActivitySink, Bucket, Error, Event, Result};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Rows per INSERT statement. Every array is bound as one parameter, so this bounds
/// statement size rather than parameter count.
const DEFAULT_CHUNK_SIZE: usize = 1_000;

const INSERT_BUCKETS: &str = "\
INSERT INTO buckets (id, name, type, client, hostname, created, data_deprecated, data)
SELECT * FROM UNNEST(
    $1::bigint[], $2::text[], $3::text[], $4::text[],
    $5::text[], $6::text[], $7::text[], $8::text[]
)
ON CONFLICT (id) DO NOTHING";

const INSERT_EVENTS: &str = "\
INSERT INTO events (id, bucketrow, starttime, endtime, app, title, status)
SELECT * FROM UNNEST(
    $1::bigint[], $2::bigint[], $3::bigint[], $4::bigint[],
    $5::text[], $6::text[], $7::text[]
)
ON CONFLICT (id) DO NOTHING";

/// `ActivitySink` backed by Postgres (`buckets` and `events` tables, see `sql/schema.sql`).
///
/// Each load runs in one transaction: either every chunk lands or none does.
#[derive(Clone)]
pub struct PostgresSink {
    pool: PgPool,
    chunk_size: usize,
}

impl PostgresSink {
    #[tracing::instrument(level = "debug", skip(cfg))]
    pub async fn connect(cfg: &PostgresConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .acquire_timeout(cfg.acquire_timeout)
            .connect(&cfg.url)
            .await
            .map_err(|e| Error::backend("connect postgres", e))?;
        Ok(Self::new(pool))
    }

    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| Error::backend("ping postgres", e))?;
        Ok(())
    }

    /// Drain the pool. Call once at process end.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl ActivitySink for PostgresSink {
    fn id(&self) -> &'static str {
        "postgres"
    }

    #[tracing::instrument(level = "debug", skip(self, buckets), fields(rows = buckets.len()))]
    async fn load_buckets(&self, buckets: &[Bucket]) -> Result<u64> {
        if buckets.is_empty() {
            return Ok(0);
        }
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::backend("begin bucket load", e))?;

        let mut inserted = 0u64;
        for chunk in buckets.chunks(self.chunk_size) {
            let ids: Vec<i64> = chunk.iter().map(|b| b.id).collect();
            let names: Vec<&str> = chunk.iter().map(|b| b.name.as_str()).collect();
            let kinds: Vec<&str> = chunk.iter().map(|b| b.kind.as_str()).collect();
            let clients: Vec<&str> = chunk.iter().map(|b| b.client.as_str()).collect();
            let hostnames: Vec<&str> = chunk.iter().map(|b| b.hostname.as_str()).collect();
            let created: Vec<&str> = chunk.iter().map(|b| b.created.as_str()).collect();
            let deprecated: Vec<&str> = chunk.iter().map(|b| b.data_deprecated.as_str()).collect();
            let data: Vec<&str> = chunk.iter().map(|b| b.data.as_str()).collect();

            let res = sqlx::query(INSERT_BUCKETS)
                .bind(&ids)
                .bind(&names)
                .bind(&kinds)
                .bind(&clients)
                .bind(&hostnames)
                .bind(&created)
                .bind(&deprecated)
                .bind(&data)
                .execute(&mut *tx)
                .await
                .map_err(|e| Error::backend("insert buckets", e))?;
            inserted += res.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| Error::backend("commit bucket load", e))?;
        Ok(inserted)
    }

    #[tracing::instrument(level = "debug", skip(self, events), fields(rows = events.len()))]
    async fn load_events(&self, events: &[Event]) -> Result<u64> {
        if events.is_empty() {
            return Ok(0);
        }
        // Project every row before touching the database so bad data rejects the whole load.
        let activities = events
            .iter()
            .map(Event::activity)
            .collect::<Result<Vec<_>>>()?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::backend("begin event load", e))?;

        let mut inserted = 0u64;
        let size = self.chunk_size;
        for (rows, acts) in events.chunks(size).zip(activities.chunks(size)) {
            let ids: Vec<i64> = rows.iter().map(|e| e.id).collect();
            let bucketrows: Vec<i64> = rows.iter().map(|e| e.bucketrow).collect();
            let starts: Vec<i64> = rows.iter().map(|e| e.starttime).collect();
            let ends: Vec<i64> = rows.iter().map(|e| e.endtime).collect();
            let apps: Vec<&str> = acts.iter().map(|a| a.app.as_str()).collect();
            let titles: Vec<&str> = acts.iter().map(|a| a.title.as_str()).collect();
            let statuses: Vec<&str> = acts.iter().map(|a| a.status.as_str()).collect();

            let res = sqlx::query(INSERT_EVENTS)
                .bind(&ids)
                .bind(&bucketrows)
                .bind(&starts)
                .bind(&ends)
                .bind(&apps)
                .bind(&titles)
                .bind(&statuses)
                .execute(&mut *tx)
                .await
                .map_err(|e| Error::backend("insert events", e))?;
            inserted += res.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| Error::backend("commit event load", e))?;
        Ok(inserted)
    }
}
