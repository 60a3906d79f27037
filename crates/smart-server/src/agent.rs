use anyhow::Result;
use smart_agent::{ActionRegistry, AgentRuntime, TcpConnector};
use smart_config::SmartConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// 运行 agent 直到收到停止信号或注册超时
pub async fn run_agent(config: &SmartConfig, shutdown: watch::Receiver<bool>) -> Result<()> {
    config.validate_agent()?;
    let runtime = AgentRuntime::new(
        config.agent.agent_config(),
        ActionRegistry::with_builtin(),
        Arc::new(TcpConnector::new(CONNECT_TIMEOUT)),
    );
    runtime.run(shutdown).await?;
    Ok(())
}
