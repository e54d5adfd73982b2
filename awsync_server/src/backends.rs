//! Wiring of the real transport and sink from environment configuration.

use awsync_core::{Pipeline, PostgresConfig, RemoteConfig, Result, RunConfig};
use awsync_integrations::{PostgresSink, RusshConnector};
use std::sync::Arc;

/// A ready pipeline plus the handles the process must release at exit.
pub struct Backends {
    pub pipeline: Pipeline,
    pub sink: PostgresSink,
    pub connector: Arc<RusshConnector>,
}

impl Backends {
    #[tracing::instrument(level = "info", skip_all, fields(target = %remote.target()))]
    pub async fn connect(
        remote: RemoteConfig,
        postgres: &PostgresConfig,
        run: RunConfig,
    ) -> Result<Self> {
        let database = remote.database.clone();
        let connector = Arc::new(RusshConnector::new(remote)?);
        let sink = PostgresSink::connect(postgres).await?;

        let pipeline = Pipeline::new(connector.clone(), Arc::new(sink.clone()), database)
            .with_bucket_limit(run.bucket_limit)
            .with_test_limit(run.test_limit);

        Ok(Self {
            pipeline,
            sink,
            connector,
        })
    }

    pub async fn shutdown(&self) {
        self.sink.close().await;
        tracing::info!("postgres pool closed");
    }
}
