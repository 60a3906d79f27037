//! 多个 agent 通过内存连接与 master 交互

use smart_core::transport::{memory_pair, Endpoint};
use smart_engine::{AgentMaster, CmdletScheduler, SchedulerConfig, SchedulerHandle};
use smart_types::{ActionStatusReport, AgentMessage, CmdletState, LaunchCmdlet, MasterMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

struct FakeAgent {
    endpoint: Endpoint<AgentMessage, MasterMessage>,
}

impl FakeAgent {
    async fn connect(master: &Arc<AgentMaster>, address: &str) -> Self {
        let (master_side, mut endpoint) = memory_pair::<MasterMessage, AgentMessage>(32);
        let master = master.clone();
        tokio::spawn(async move { master.serve(master_side).await });

        endpoint
            .tx
            .send(AgentMessage::RegisterNewAgent {
                address: address.to_string(),
            })
            .await
            .unwrap();
        match endpoint.rx.recv().await {
            Some(MasterMessage::AgentRegistered { .. }) => {}
            other => panic!("unexpected message: {:?}", other),
        }
        Self { endpoint }
    }

    async fn next_launch(&mut self) -> LaunchCmdlet {
        match timeout(Duration::from_secs(1), self.endpoint.rx.recv()).await {
            Ok(Some(MasterMessage::LaunchCmdlet(launch))) => launch,
            other => panic!("unexpected message: {:?}", other),
        }
    }

    /// 回执并按顺序完成全部 action
    async fn complete(&self, launch: &LaunchCmdlet) {
        self.endpoint
            .tx
            .send(AgentMessage::CmdletAck {
                cmdlet_id: launch.cmdlet_id,
            })
            .await
            .unwrap();
        for action in &launch.actions {
            self.endpoint
                .tx
                .send(AgentMessage::StatusReport(ActionStatusReport::done(
                    launch.cmdlet_id,
                    action.action_id,
                    None,
                )))
                .await
                .unwrap();
        }
    }
}

fn start(config: SchedulerConfig) -> (SchedulerHandle, Arc<AgentMaster>) {
    let (handle, _) = CmdletScheduler::new(config).spawn();
    let master = Arc::new(AgentMaster::new(handle.clone(), Duration::from_secs(1)));
    (handle, master)
}

async fn wait_for_state(handle: &SchedulerHandle, cmdlet_id: i64, state: CmdletState) {
    for _ in 0..100 {
        if handle.get_cmdlet(cmdlet_id).await.unwrap().state == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("cmdlet {} never reached {:?}", cmdlet_id, state);
}

#[tokio::test]
async fn test_cmdlets_spread_across_agents() {
    let (handle, master) = start(SchedulerConfig {
        max_cmdlets_per_agent: 1,
        ..Default::default()
    });
    let mut a = FakeAgent::connect(&master, "10.0.0.1:9000").await;
    let mut b = FakeAgent::connect(&master, "10.0.0.2:9000").await;

    let first = handle.submit_cmdlet("echo -msg 1", "admin").await.unwrap();
    let second = handle.submit_cmdlet("echo -msg 2", "admin").await.unwrap();
    let third = handle.submit_cmdlet("echo -msg 3", "admin").await.unwrap();

    let launch_a = a.next_launch().await;
    let launch_b = b.next_launch().await;
    assert_eq!(launch_a.cmdlet_id, first);
    assert_eq!(launch_b.cmdlet_id, second);
    assert_eq!(handle.get_cmdlet(third).await.unwrap().state, CmdletState::Pending);

    // 容量释放后第三个 cmdlet 才被下发
    a.complete(&launch_a).await;
    wait_for_state(&handle, first, CmdletState::Done).await;
    let launch = a.next_launch().await;
    assert_eq!(launch.cmdlet_id, third);

    a.complete(&launch).await;
    b.complete(&launch_b).await;
    wait_for_state(&handle, second, CmdletState::Done).await;
    wait_for_state(&handle, third, CmdletState::Done).await;
}

#[tokio::test]
async fn test_unacknowledged_dispatch_is_resent() {
    let (handle, master) = start(SchedulerConfig {
        dispatch_ack_timeout: Duration::from_millis(100),
        ..Default::default()
    });
    let mut agent = FakeAgent::connect(&master, "10.0.0.1:9000").await;
    let id = handle.submit_cmdlet("echo", "admin").await.unwrap();
    assert_eq!(agent.next_launch().await.cmdlet_id, id);

    // 不回执，超时后重新下发
    let launch = agent.next_launch().await;
    assert_eq!(launch.cmdlet_id, id);
    assert_eq!(handle.get_cmdlet(id).await.unwrap().redeliveries, 1);

    agent.complete(&launch).await;
    wait_for_state(&handle, id, CmdletState::Done).await;
}
