use tokio::signal;
use tokio::sync::{broadcast, watch};
use tracing::info;

/// 关闭信号类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGTERM
    Term,
    /// SIGINT / Ctrl+C
    Interrupt,
    Manual,
}

/// 信号处理器
pub struct SignalHandler {
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
}

impl SignalHandler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self { shutdown_tx }
    }

    /// 等待系统信号并广播
    #[cfg(unix)]
    pub async fn wait_for_system_signal(&self) -> std::io::Result<ShutdownSignal> {
        use signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        let received = tokio::select! {
            _ = sigterm.recv() => ShutdownSignal::Term,
            _ = sigint.recv() => ShutdownSignal::Interrupt,
        };
        info!(signal = ?received, "Received shutdown signal");
        let _ = self.shutdown_tx.send(received);
        Ok(received)
    }

    #[cfg(not(unix))]
    pub async fn wait_for_system_signal(&self) -> std::io::Result<ShutdownSignal> {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C");
        let _ = self.shutdown_tx.send(ShutdownSignal::Interrupt);
        Ok(ShutdownSignal::Interrupt)
    }

    pub fn trigger_shutdown(&self) {
        info!("Manual shutdown triggered");
        let _ = self.shutdown_tx.send(ShutdownSignal::Manual);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.shutdown_tx.subscribe()
    }

    /// 以 watch 通道形式订阅，收到任意信号后值变为 true
    pub fn watch(&self) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        let mut signals = self.subscribe();
        tokio::spawn(async move {
            if signals.recv().await.is_ok() {
                let _ = tx.send(true);
            }
        });
        rx
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}
