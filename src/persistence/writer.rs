//! 后台快照写入任务
//!
//! 交互路径只调用 `submit`，不等待写入完成。待写请求只保留最新一个，
//! 慢磁盘只会让快照变旧，不会阻塞输入输出。

use crate::persistence::snapshot::{SnapshotDocument, SnapshotOptions, SnapshotRequest};
use crate::persistence::store::TranscriptStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// 等待后台写入结束的上限
pub const WRITER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

pub struct SnapshotWriter {
    tx: watch::Sender<Option<SnapshotRequest>>,
    handle: JoinHandle<usize>,
}

impl SnapshotWriter {
    /// 启动写入任务（需要在 tokio runtime 中调用）
    pub fn spawn(store: Arc<TranscriptStore>, options: SnapshotOptions) -> Self {
        let (tx, rx) = watch::channel(None);
        let handle = tokio::spawn(Self::run(rx, store, Arc::new(options)));
        Self { tx, handle }
    }

    /// 提交刷新请求，立即返回
    pub fn submit(&self, request: SnapshotRequest) {
        self.tx.send_replace(Some(request));
    }

    /// 关闭通道并等待最后一次写入结束，返回成功写入次数
    pub async fn shutdown(self) -> usize {
        let Self { tx, handle } = self;
        drop(tx);
        match tokio::time::timeout(WRITER_SHUTDOWN_TIMEOUT, handle).await {
            Ok(Ok(written)) => written,
            Ok(Err(e)) => {
                warn!(error = %e, "Snapshot writer task failed");
                0
            }
            Err(_) => {
                warn!("Snapshot writer did not finish in time");
                0
            }
        }
    }

    async fn run(
        mut rx: watch::Receiver<Option<SnapshotRequest>>,
        store: Arc<TranscriptStore>,
        options: Arc<SnapshotOptions>,
    ) -> usize {
        let mut written = 0;
        while rx.changed().await.is_ok() {
            let Some(request) = rx.borrow_and_update().clone() else {
                continue;
            };

            let store = Arc::clone(&store);
            let options = Arc::clone(&options);
            let version = request.version;
            let result = tokio::task::spawn_blocking(move || {
                let document = SnapshotDocument::build(&request, &options);
                store.write_snapshot_versioned(version, &document.render())
            })
            .await;

            match result {
                Ok(Ok(true)) => {
                    written += 1;
                    debug!(version, "Snapshot saved");
                }
                Ok(Ok(false)) => {}
                // 失败只记录，等下一次刷新
                Ok(Err(e)) => warn!(error = %e, "Snapshot write failed"),
                Err(e) => warn!(error = %e, "Snapshot render task panicked"),
            }
        }
        written
    }
}
