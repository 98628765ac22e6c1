pub mod directory;
pub mod transfer;

use crate::config::TransferSettings;
use crate::error::{ExporterError, Result};
use crate::traits::{DirectoryClient, MeasurementRunner};
use crate::types::{Server, UserInfo};
use crate::utils::until_cancelled;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const CONFIG_URL: &str = "https://www.speedtest.net/speedtest-config.php";
pub const SERVERS_URL: &str = "https://www.speedtest.net/api/js/servers?engine=js&limit=10";

const USER_AGENT: &str = concat!("speedtest-exporter/", env!("CARGO_PKG_VERSION"));

/// speedtest.net 客户端, 同时实现 DirectoryClient 和 MeasurementRunner
pub struct SpeedtestNet {
    client: Client,
    config_url: String,
    servers_url: String,
    transfer: TransferSettings,
}

impl SpeedtestNet {
    pub fn new(transfer: TransferSettings) -> Result<Self> {
        Self::with_endpoints(transfer, CONFIG_URL, SERVERS_URL)
    }

    pub fn with_endpoints(transfer: TransferSettings, config_url: &str, servers_url: &str) -> Result<Self> {
        // 强制设置超时, 防止单个请求卡住整个测速
        let client = Client::builder()
            .timeout(transfer.request_timeout())
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            config_url: config_url.to_string(),
            servers_url: servers_url.to_string(),
            transfer,
        })
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        Ok(self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?)
    }
}

#[async_trait]
impl DirectoryClient for SpeedtestNet {
    async fn fetch_user_info(&self, cancel: &CancellationToken) -> Result<UserInfo> {
        let body = until_cancelled(cancel, self.get_text(&self.config_url)).await?;
        directory::parse_user_info(&body)
    }

    async fn fetch_servers(&self, cancel: &CancellationToken) -> Result<Vec<Server>> {
        let body = until_cancelled(cancel, self.get_text(&self.servers_url)).await?;
        let servers = directory::parse_servers(&body)?;
        if servers.is_empty() {
            tracing::warn!(url = %self.servers_url, "server list is empty");
        }
        Ok(servers)
    }
}

#[async_trait]
impl MeasurementRunner for SpeedtestNet {
    async fn latency(&self, cancel: &CancellationToken, server: &Server) -> Result<Duration> {
        until_cancelled(cancel, transfer::latency(&self.client, &self.transfer, server)).await
    }

    async fn download(&self, cancel: &CancellationToken, server: &Server) -> Result<f64> {
        until_cancelled(cancel, transfer::download(&self.client, &self.transfer, server)).await
    }

    async fn upload(&self, cancel: &CancellationToken, server: &Server) -> Result<f64> {
        if server.url.is_empty() {
            return Err(ExporterError::Custom(format!(
                "server {} has no upload url",
                server.id
            )));
        }
        until_cancelled(cancel, transfer::upload(&self.client, &self.transfer, server)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings() -> TransferSettings {
        TransferSettings {
            request_timeout_secs: 5,
            ping_samples: 3,
            download_size: 350,
            download_connections: 2,
            upload_bytes: 1024,
            upload_connections: 2,
        }
    }

    fn server_at(mock: &MockServer) -> Server {
        Server {
            url: format!("{}/speedtest/upload.php", mock.uri()),
            ..Server::new("100", "Mock", "US")
        }
    }

    #[tokio::test]
    async fn test_fetch_user_info_and_servers() -> Result<()> {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/speedtest-config.php"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<settings><client ip="5.6.7.8" lat="1.5" lon="2.5" isp="MockNet" /></settings>"#,
            ))
            .mount(&mock)
            .await;
        Mock::given(method("GET"))
            .and(path("/servers"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[{"id":"7","name":"Seven","country":"NL","lat":"52","lon":"4","distance":12,"url":"http://x/speedtest/upload.php"}]"#,
            ))
            .mount(&mock)
            .await;

        let client = SpeedtestNet::with_endpoints(
            settings(),
            &format!("{}/speedtest-config.php", mock.uri()),
            &format!("{}/servers", mock.uri()),
        )?;
        let cancel = CancellationToken::new();

        let user = client.fetch_user_info(&cancel).await?;
        assert_eq!(user.ip, "5.6.7.8");
        assert_eq!(user.isp, "MockNet");

        let servers = client.fetch_servers(&cancel).await?;
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].id, "7");
        assert_eq!(servers[0].distance, 12.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_server_error_is_reported() -> Result<()> {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock)
            .await;

        let client = SpeedtestNet::with_endpoints(settings(), &mock.uri(), &mock.uri())?;
        let err = client
            .fetch_user_info(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExporterError::Http(_)));
        Ok(())
    }

    #[tokio::test]
    async fn test_stages_against_mock_server() -> Result<()> {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/speedtest/latency.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("test=test\n"))
            .expect(3)
            .mount(&mock)
            .await;
        Mock::given(method("GET"))
            .and(path("/speedtest/random350x350.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 4096]))
            .expect(2)
            .mount(&mock)
            .await;
        Mock::given(method("POST"))
            .and(path("/speedtest/upload.php"))
            .respond_with(ResponseTemplate::new(200).set_body_string("size=1024"))
            .expect(2)
            .mount(&mock)
            .await;

        let client = SpeedtestNet::with_endpoints(settings(), CONFIG_URL, SERVERS_URL)?;
        let server = server_at(&mock);
        let cancel = CancellationToken::new();

        let latency = client.latency(&cancel, &server).await?;
        assert!(latency > Duration::ZERO);
        assert!(client.download(&cancel, &server).await? > 0.0);
        assert!(client.upload(&cancel, &server).await? > 0.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancelled_token_skips_network() -> Result<()> {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock)
            .await;

        let client = SpeedtestNet::with_endpoints(settings(), &mock.uri(), &mock.uri())?;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = client.latency(&cancel, &server_at(&mock)).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(client.fetch_user_info(&cancel).await.unwrap_err().is_cancelled());
        Ok(())
    }

    #[tokio::test]
    async fn test_upload_requires_url() -> Result<()> {
        let client = SpeedtestNet::new(settings())?;
        let err = client
            .upload(&CancellationToken::new(), &Server::new("1", "NoUrl", "US"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExporterError::Custom(_)));
        Ok(())
    }
}
