//! Scrape orchestration
//!
//! One call to [`Exporter::run`] fetches the caller's identity and the server
//! list, narrows the list down to the configured servers, and runs the
//! latency, download and upload stages against every selected server, one
//! after the other. Stages never run concurrently: they share the link and
//! would skew each other's throughput.

use crate::error::{ExporterError, Result};
use crate::metrics::{self, MetricDesc, Observation};
use crate::selector::{self, ServerSelection};
use crate::traits::{DirectoryClient, MeasurementRunner};
use crate::types::{RunReport, Server, ServerReport, Stage, StageResults, UserInfo};
use crate::utils::until_cancelled;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct Exporter {
    selection: ServerSelection,
    directory: Arc<dyn DirectoryClient>,
    runner: Arc<dyn MeasurementRunner>,
}

impl Exporter {
    pub fn new(
        selection: ServerSelection,
        directory: Arc<dyn DirectoryClient>,
        runner: Arc<dyn MeasurementRunner>,
    ) -> Self {
        Self {
            selection,
            directory,
            runner,
        }
    }

    pub fn selection(&self) -> &ServerSelection {
        &self.selection
    }

    /// The five gauges this exporter can emit.
    pub fn describe(&self) -> [&'static MetricDesc; 5] {
        metrics::DESCRIPTORS
    }

    /// Run one scrape and return its observations. `up` and the scrape
    /// duration are always present.
    pub async fn collect(&self, cancel: &CancellationToken) -> Vec<Observation> {
        self.run(cancel).await.observations()
    }

    /// Run one complete scrape. Failures never escape: they are logged and
    /// reflected in [`RunReport::healthy`].
    pub async fn run(&self, cancel: &CancellationToken) -> RunReport {
        let start = Instant::now();

        let (user, servers, mut healthy) = match self.prepare(cancel).await {
            Ok((user, servers)) => (Some(user), servers, true),
            Err(e) => {
                error!(error = %e, "speedtest aborted before any server was tested");
                (None, Vec::new(), false)
            }
        };

        let mut reports = Vec::with_capacity(servers.len());
        for server in servers {
            let report = self.test_server(cancel, server).await;
            healthy = report.healthy() && healthy;
            reports.push(report);
        }

        let elapsed = start.elapsed();
        info!(
            healthy,
            servers = reports.len(),
            elapsed_secs = elapsed.as_secs_f64(),
            "speedtest finished"
        );

        RunReport {
            user,
            servers: reports,
            healthy,
            elapsed,
        }
    }

    /// Identity, server list and selection. Any failure here degrades the whole run.
    async fn prepare(&self, cancel: &CancellationToken) -> Result<(UserInfo, Vec<Server>)> {
        let user = until_cancelled(cancel, self.directory.fetch_user_info(cancel))
            .await
            .map_err(|e| ExporterError::UserInfo(Box::new(e)))?;

        let servers = until_cancelled(cancel, self.directory.fetch_servers(cancel))
            .await
            .map_err(|e| ExporterError::ServerList(Box::new(e)))?;
        debug!(candidates = servers.len(), "fetched server list");

        let selected = selector::select_servers(&servers, &self.selection, self.directory.as_ref())?;
        Ok((user, selected))
    }

    /// Latency, download and upload in that order. A failed stage does not
    /// stop the ones after it.
    async fn test_server(&self, cancel: &CancellationToken, server: Server) -> ServerReport {
        let mut results = StageResults::default();

        for stage in Stage::ALL {
            let outcome = match stage {
                Stage::Latency => self
                    .stage(cancel, stage, self.runner.latency(cancel, &server))
                    .await
                    .map(|latency| results.latency = Some(latency)),
                Stage::Download => self
                    .stage(cancel, stage, self.runner.download(cancel, &server))
                    .await
                    .map(|rate| results.download = Some(rate)),
                Stage::Upload => self
                    .stage(cancel, stage, self.runner.upload(cancel, &server))
                    .await
                    .map(|rate| results.upload = Some(rate)),
            };

            match outcome {
                Err(e) if e.is_cancelled() => {
                    warn!(server_id = %server.id, stage = %stage, "{} test cancelled", stage);
                }
                Err(e) => error!(
                    server_id = %server.id,
                    stage = %stage,
                    error = %e,
                    "failed to carry out {} test",
                    stage
                ),
                Ok(()) => {}
            }
        }

        ServerReport { server, results }
    }

    async fn stage<T>(
        &self,
        cancel: &CancellationToken,
        stage: Stage,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        until_cancelled(cancel, fut)
            .await
            .map_err(|e| ExporterError::stage(stage, e))
    }
}

impl RunReport {
    /// Per-server observations (latency, download, upload for each server,
    /// skipping failed stages), followed by `up` and the scrape duration.
    pub fn observations(&self) -> Vec<Observation> {
        let mut observations = Vec::new();

        if let Some(user) = &self.user {
            for report in &self.servers {
                let labels = metrics::label_values(user, &report.server);
                let r = &report.results;

                if let Some(latency) = r.latency {
                    observations.push(Observation::with_labels(
                        &metrics::LATENCY,
                        labels.clone(),
                        latency.as_secs_f64(),
                    ));
                }
                if let Some(rate) = r.download {
                    observations.push(Observation::with_labels(
                        &metrics::DOWNLOAD,
                        labels.clone(),
                        rate,
                    ));
                }
                if let Some(rate) = r.upload {
                    observations.push(Observation::with_labels(&metrics::UPLOAD, labels, rate));
                }
            }
        }

        observations.push(Observation::new(
            &metrics::UP,
            if self.healthy { 1.0 } else { 0.0 },
        ));
        observations.push(Observation::new(
            &metrics::SCRAPE_DURATION,
            self.elapsed.as_secs_f64(),
        ));
        observations
    }
}
