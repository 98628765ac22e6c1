use crate::config::TransferSettings;
use crate::error::{ExporterError, Result};
use crate::types::Server;
use futures::future::try_join_all;
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::debug;

/// 延迟: 多次请求 latency.txt, 取平均
pub async fn latency(client: &Client, settings: &TransferSettings, server: &Server) -> Result<Duration> {
    let url = format!("{}/latency.txt", server.base_url());
    let mut samples = Vec::with_capacity(settings.ping_samples);

    for _ in 0..settings.ping_samples {
        let start = Instant::now();
        client.get(&url).send().await?.error_for_status()?.bytes().await?;
        samples.push(start.elapsed());
    }

    let mean = mean(&samples)
        .ok_or_else(|| ExporterError::Custom("no latency samples taken".to_string()))?;
    debug!(
        server_id = %server.id,
        host = %server.host,
        samples = samples.len(),
        latency_ms = mean.as_secs_f64() * 1000.0,
        "latency measured"
    );
    Ok(mean)
}

/// 下载: 多个连接并发拉取 randomNxN.jpg
pub async fn download(client: &Client, settings: &TransferSettings, server: &Server) -> Result<f64> {
    let size = settings.download_size;
    let url = format!("{}/random{}x{}.jpg", server.base_url(), size, size);

    let start = Instant::now();
    let tasks = (0..settings.download_connections).map(|_| {
        let client = client.clone();
        let url = url.clone();
        async move {
            let body = client.get(&url).send().await?.error_for_status()?.bytes().await?;
            Ok::<usize, ExporterError>(body.len())
        }
    });
    let received: usize = try_join_all(tasks).await?.into_iter().sum();

    let rate = bytes_per_second(received, start.elapsed());
    debug!(server_id = %server.id, bytes = received, rate, "download measured");
    Ok(rate)
}

/// 上传: 多个连接并发 POST 到 upload.php
pub async fn upload(client: &Client, settings: &TransferSettings, server: &Server) -> Result<f64> {
    let payload = vec![b'0'; settings.upload_bytes];

    let start = Instant::now();
    let tasks = (0..settings.upload_connections).map(|_| {
        let client = client.clone();
        let body = payload.clone();
        let url = server.url.clone();
        async move {
            let len = body.len();
            client
                .post(&url)
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(body)
                .send()
                .await?
                .error_for_status()?;
            Ok::<usize, ExporterError>(len)
        }
    });
    let sent: usize = try_join_all(tasks).await?.into_iter().sum();

    let rate = bytes_per_second(sent, start.elapsed());
    debug!(server_id = %server.id, bytes = sent, rate, "upload measured");
    Ok(rate)
}

fn mean(samples: &[Duration]) -> Option<Duration> {
    if samples.is_empty() {
        return None;
    }
    let total: Duration = samples.iter().sum();
    Some(total.div_f64(samples.len() as f64))
}

fn bytes_per_second(bytes: usize, elapsed: Duration) -> f64 {
    // a zero elapsed time would turn the rate into infinity
    let secs = elapsed.as_secs_f64().max(1e-6);
    bytes as f64 / secs
}
