//! 消息传输
//!
//! 每个连接表示为一对有界通道：`tx` 发送出站消息，`rx` 接收入站消息。
//! `rx` 返回 `None` 即表示连接断开。TCP 上使用按行分隔的 JSON。

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// 连接的一端
pub struct Endpoint<Out, In> {
    pub tx: mpsc::Sender<Out>,
    pub rx: mpsc::Receiver<In>,
}

impl<Out, In> Endpoint<Out, In> {
    pub fn split(self) -> (mpsc::Sender<Out>, mpsc::Receiver<In>) {
        (self.tx, self.rx)
    }
}

/// 进程内连接，测试与单进程部署使用
pub fn memory_pair<A, B>(capacity: usize) -> (Endpoint<A, B>, Endpoint<B, A>) {
    let (a_tx, a_rx) = mpsc::channel(capacity);
    let (b_tx, b_rx) = mpsc::channel(capacity);
    (
        Endpoint { tx: a_tx, rx: b_rx },
        Endpoint { tx: b_tx, rx: a_rx },
    )
}

/// 在字节流上建立 JSON 行协议连接
///
/// 读写各一个后台任务。对端关闭或读出错时入站通道关闭；本端丢弃 `tx` 后写任务退出。
pub fn json_lines<S, Out, In>(stream: S, capacity: usize) -> Endpoint<Out, In>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    Out: Serialize + Send + 'static,
    In: DeserializeOwned + Send + 'static,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let (out_tx, mut out_rx) = mpsc::channel::<Out>(capacity);
    let (in_tx, in_rx) = mpsc::channel::<In>(capacity);

    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => match serde_json::from_str::<In>(&line) {
                    Ok(msg) => {
                        if in_tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "Dropping malformed message"),
                },
                Ok(None) => {
                    debug!("Peer closed connection");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Connection read failed");
                    break;
                }
            }
        }
    });

    tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let mut line = match serde_json::to_string(&msg) {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "Failed to encode message");
                    continue;
                }
            };
            line.push('\n');
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                warn!(error = %e, "Connection write failed");
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    Endpoint {
        tx: out_tx,
        rx: in_rx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smart_types::{AgentMessage, MasterMessage};

    #[tokio::test]
    async fn test_memory_pair() {
        let (master, mut agent) = memory_pair::<MasterMessage, AgentMessage>(4);
        agent
            .tx
            .send(AgentMessage::Heartbeat { agent_id: "agent-1".into() })
            .await
            .unwrap();

        let (master_tx, mut rx) = master.split();
        assert_eq!(
            rx.recv().await,
            Some(AgentMessage::Heartbeat { agent_id: "agent-1".into() })
        );

        drop(master_tx);
        assert_eq!(agent.rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_json_lines_over_duplex() {
        let (a, b) = tokio::io::duplex(1024);
        let mut master = json_lines::<_, MasterMessage, AgentMessage>(a, 4);
        let mut agent = json_lines::<_, AgentMessage, MasterMessage>(b, 4);

        agent
            .tx
            .send(AgentMessage::RegisterNewAgent { address: "h1:1".into() })
            .await
            .unwrap();
        assert_eq!(
            master.rx.recv().await,
            Some(AgentMessage::RegisterNewAgent { address: "h1:1".into() })
        );

        master
            .tx
            .send(MasterMessage::AgentRegistered { agent_id: "agent-1".into() })
            .await
            .unwrap();
        assert_eq!(
            agent.rx.recv().await,
            Some(MasterMessage::AgentRegistered { agent_id: "agent-1".into() })
        );

        drop(agent);
        assert_eq!(master.rx.recv().await, None);
    }
}
