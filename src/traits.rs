use async_trait::async_trait;
use crate::error::Result;
use crate::selector;
use crate::types::{Server, UserInfo};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// DirectoryClient: 获取客户端信息与可用测速服务器列表
///
/// Implementations are expected to return promptly once `cancel` fires.
#[async_trait]
pub trait DirectoryClient: Sync + Send {
    /// 获取当前客户端的 IP / 经纬度 / ISP
    async fn fetch_user_info(&self, cancel: &CancellationToken) -> Result<UserInfo>;

    /// 获取测速服务器列表, 按距离由近到远排序
    async fn fetch_servers(&self, cancel: &CancellationToken) -> Result<Vec<Server>>;

    /// 按 ID 查找服务器
    /// 找不到精确匹配时, 可以用最近的服务器代替 (由调用方决定是否接受)
    fn find_servers(&self, servers: &[Server], ids: &[i64]) -> Result<Vec<Server>> {
        selector::find_by_ids(servers, ids)
    }
}

/// MeasurementRunner: 对单台服务器执行三个测速阶段
#[async_trait]
pub trait MeasurementRunner: Sync + Send {
    /// 延迟测试
    async fn latency(&self, cancel: &CancellationToken, server: &Server) -> Result<Duration>;

    /// 下载测试, 返回 bytes/s
    async fn download(&self, cancel: &CancellationToken, server: &Server) -> Result<f64>;

    /// 上传测试, 返回 bytes/s
    async fn upload(&self, cancel: &CancellationToken, server: &Server) -> Result<f64>;
}
