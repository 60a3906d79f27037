//! 规则管理
//!
//! 提交时同步翻译并校验，激活后为每条规则启动一个定时任务。暂停、删除或调度结束时
//! 任务退出并通知执行器插件。

use crate::executor::{CmdletSubmitter, RuleExecutor};
use crate::plugin::RuleExecutorPlugin;
use crate::translation::RuleTranslationResult;
use crate::translator::RuleTranslator;
use smart_core::audit::{audited, audited_create, AuditContext, AuditLog, AuditObject, AuditOperation};
use smart_core::bus::{LifecycleEvent, SharedEventBus};
use smart_core::metrics::RULES_ACTIVE;
use smart_core::{Result, SmartError};
use smart_metastore::MetaStore;
use smart_types::{now_millis, RuleInfo, RuleState};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

struct RuleEntry {
    info: RuleInfo,
    owner: String,
    translation: RuleTranslationResult,
    runner: Option<Runner>,
}

struct Runner {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

type RuleTable = Arc<RwLock<HashMap<i64, RuleEntry>>>;

pub struct RuleManager {
    translator: RuleTranslator,
    store: Arc<dyn MetaStore>,
    submitter: Arc<dyn CmdletSubmitter>,
    plugins: Vec<Arc<dyn RuleExecutorPlugin>>,
    /// 为空表示不检查
    supported_actions: Option<HashSet<String>>,
    rules: RuleTable,
    next_id: AtomicI64,
    /// 串行化生命周期操作
    lifecycle: Mutex<()>,
    bus: Option<SharedEventBus>,
    audit: AuditLog,
}

impl RuleManager {
    pub fn new(store: Arc<dyn MetaStore>, submitter: Arc<dyn CmdletSubmitter>) -> Self {
        Self {
            translator: RuleTranslator::new(),
            store,
            submitter,
            plugins: Vec::new(),
            supported_actions: None,
            rules: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicI64::new(1),
            lifecycle: Mutex::new(()),
            bus: None,
            audit: AuditLog::default(),
        }
    }

    pub fn with_translator(mut self, translator: RuleTranslator) -> Self {
        self.translator = translator;
        self
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn RuleExecutorPlugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn with_supported_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported_actions = Some(actions.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_event_bus(mut self, bus: SharedEventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_audit_log(mut self, audit: AuditLog) -> Self {
        self.audit = audit;
        self
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// 提交规则
    ///
    /// 文本无法解析或包含不支持的 action 时直接拒绝。`activate` 为 false 时规则停在 NEW。
    pub async fn submit_rule(&self, text: &str, owner: &str, activate: bool) -> Result<i64> {
        let ctx = AuditContext::new(owner, AuditObject::Rule, AuditOperation::Create);
        audited_create(&self.audit, ctx, self.do_submit(text, owner, activate)).await
    }

    async fn do_submit(&self, text: &str, owner: &str, activate: bool) -> Result<i64> {
        let translation = self.translator.translate(text)?;
        self.check_actions_supported(&translation)?;

        let _guard = self.lifecycle.lock().await;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let state = if activate { RuleState::Active } else { RuleState::New };
        let info = RuleInfo::new(id, text, state);

        self.rules.write().await.insert(
            id,
            RuleEntry {
                info: info.clone(),
                owner: owner.to_string(),
                translation: translation.clone(),
                runner: None,
            },
        );
        if activate {
            match self.start_runner(&info, owner, translation).await {
                Ok(runner) => self.install_runner(id, runner).await,
                Err(e) => {
                    self.rules.write().await.remove(&id);
                    return Err(e);
                }
            }
        }

        info!(rule_id = %id, owner = %owner, active = activate, "Rule added");
        self.publish(LifecycleEvent::RuleAdded { rule_id: id });
        Ok(id)
    }

    async fn install_runner(&self, rule_id: i64, runner: Runner) {
        if let Some(entry) = self.rules.write().await.get_mut(&rule_id) {
            entry.runner = Some(runner);
        }
    }

    fn check_actions_supported(&self, translation: &RuleTranslationResult) -> Result<()> {
        let Some(supported) = &self.supported_actions else {
            return Ok(());
        };
        for name in translation.cmd_descriptor.action_names() {
            if !supported.contains(name) {
                return Err(SmartError::InvalidArgument(format!(
                    "Action '{}' not supported.",
                    name
                )));
            }
        }
        Ok(())
    }

    /// 激活（或恢复）规则
    pub async fn activate_rule(&self, rule_id: i64) -> Result<()> {
        let ctx = self.audit_context(rule_id, AuditOperation::Start).await;
        audited(&self.audit, ctx, self.do_activate(rule_id)).await
    }

    async fn do_activate(&self, rule_id: i64) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        let (info, owner, translation, previous) = {
            let mut rules = self.rules.write().await;
            let entry = rules
                .get_mut(&rule_id)
                .ok_or_else(|| SmartError::not_found("rule", rule_id))?;
            let previous = entry.info.state;
            match previous {
                RuleState::Active => return Ok(()),
                state if state.is_terminal() => {
                    return Err(SmartError::InvalidArgument(format!(
                        "Rule {} is {:?} and cannot be activated",
                        rule_id, state
                    )))
                }
                _ => {}
            }
            entry.info.state = RuleState::Active;
            (entry.info.clone(), entry.owner.clone(), entry.translation.clone(), previous)
        };

        match self.start_runner(&info, &owner, translation).await {
            Ok(runner) => self.install_runner(rule_id, runner).await,
            Err(e) => {
                if let Some(entry) = self.rules.write().await.get_mut(&rule_id) {
                    entry.info.state = previous;
                }
                return Err(e);
            }
        }
        info!(rule_id = %rule_id, "Rule activated");
        self.publish(LifecycleEvent::RuleStateChanged {
            rule_id,
            state: RuleState::Active,
        });
        Ok(())
    }

    /// 暂停规则，已生成的 cmdlet 不受影响
    pub async fn pause_rule(&self, rule_id: i64) -> Result<()> {
        let ctx = self.audit_context(rule_id, AuditOperation::Stop).await;
        audited(&self.audit, ctx, self.transition(rule_id, RuleState::Paused)).await
    }

    /// 结束规则
    pub async fn finish_rule(&self, rule_id: i64) -> Result<()> {
        let ctx = self.audit_context(rule_id, AuditOperation::Stop).await;
        audited(&self.audit, ctx, self.transition(rule_id, RuleState::Finished)).await
    }

    /// 删除规则，`drop_pending_cmdlets` 时同时删除规则未结束的 cmdlet
    pub async fn delete_rule(&self, rule_id: i64, drop_pending_cmdlets: bool) -> Result<()> {
        let ctx = self.audit_context(rule_id, AuditOperation::Delete).await;
        audited(&self.audit, ctx, async {
            self.transition(rule_id, RuleState::Deleted).await?;
            if drop_pending_cmdlets {
                let dropped = self.submitter.delete_by_rule(rule_id).await?;
                debug!(rule_id = %rule_id, dropped = dropped, "Rule cmdlets dropped");
            }
            Ok::<(), SmartError>(())
        })
        .await
    }

    async fn transition(&self, rule_id: i64, target: RuleState) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        let runner = {
            let mut rules = self.rules.write().await;
            let entry = rules
                .get_mut(&rule_id)
                .ok_or_else(|| SmartError::not_found("rule", rule_id))?;
            if entry.info.state == target {
                return Ok(());
            }
            if entry.info.state.is_terminal() && target != RuleState::Deleted {
                return Err(SmartError::InvalidArgument(format!(
                    "Rule {} is already {:?}",
                    rule_id, entry.info.state
                )));
            }
            entry.info.state = target;
            entry.runner.take()
        };

        if let Some(runner) = runner {
            stop_runner(rule_id, runner).await;
        }
        info!(rule_id = %rule_id, state = ?target, "Rule state changed");
        self.publish(match target {
            RuleState::Deleted => LifecycleEvent::RuleDeleted { rule_id },
            state => LifecycleEvent::RuleStateChanged { rule_id, state },
        });
        Ok(())
    }

    pub async fn get_rule(&self, rule_id: i64) -> Result<RuleInfo> {
        self.rules
            .read()
            .await
            .get(&rule_id)
            .map(|entry| entry.info.clone())
            .ok_or_else(|| SmartError::not_found("rule", rule_id))
    }

    pub async fn list_rules(&self) -> Vec<RuleInfo> {
        let mut rules: Vec<RuleInfo> = self
            .rules
            .read()
            .await
            .values()
            .map(|entry| entry.info.clone())
            .collect();
        rules.sort_by_key(|r| r.id);
        rules
    }

    /// 停止所有规则任务，规则状态保持不变
    pub async fn shutdown(&self) {
        let _guard = self.lifecycle.lock().await;
        let runners: Vec<(i64, Runner)> = self
            .rules
            .write()
            .await
            .iter_mut()
            .filter_map(|(id, entry)| entry.runner.take().map(|r| (*id, r)))
            .collect();
        for (rule_id, runner) in runners {
            stop_runner(rule_id, runner).await;
        }
        info!("Rule manager stopped");
    }

    async fn audit_context(&self, rule_id: i64, operation: AuditOperation) -> AuditContext {
        let owner = self
            .rules
            .read()
            .await
            .get(&rule_id)
            .map(|entry| entry.owner.clone())
            .unwrap_or_default();
        AuditContext::new(owner, AuditObject::Rule, operation).with_object_id(rule_id)
    }

    async fn start_runner(
        &self,
        info: &RuleInfo,
        owner: &str,
        translation: RuleTranslationResult,
    ) -> Result<Runner> {
        let executor = RuleExecutor::create(
            info,
            owner,
            translation,
            self.store.clone(),
            self.submitter.clone(),
            self.plugins.clone(),
        )
        .await?;

        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_executor(
            executor,
            self.rules.clone(),
            self.bus.clone(),
            stop_rx,
        ));
        Ok(Runner { stop, handle })
    }

    fn publish(&self, event: LifecycleEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(event);
        }
    }
}

async fn stop_runner(rule_id: i64, runner: Runner) {
    let _ = runner.stop.send(true);
    if let Err(e) = runner.handle.await {
        error!(rule_id = %rule_id, error = %e, "Rule executor task failed");
    }
}

/// 规则定时任务
///
/// 第一次检查对齐到调度间隔的整数倍，之后按固定间隔执行。
async fn run_executor(
    mut executor: RuleExecutor,
    rules: RuleTable,
    bus: Option<SharedEventBus>,
    mut stop: watch::Receiver<bool>,
) {
    let rule_id = executor.rule_id();
    let schedule = executor.translation().schedule_info;
    metrics::increment_gauge!(RULES_ACTIVE, 1.0);
    debug!(rule_id = %rule_id, every = schedule.every, "Rule executor started");

    let first_delay = Duration::from_millis(schedule.first_delay(now_millis()).max(0) as u64);
    let stopped = tokio::select! {
        _ = tokio::time::sleep(first_delay) => false,
        _ = stop.changed() => true,
    };

    let mut last_info = None;
    if !stopped {
        let mut ticker = interval(Duration::from_millis(schedule.every.max(1) as u64));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop.changed() => break,
            }

            let Some(info) = rules.read().await.get(&rule_id).map(|e| e.info.clone()) else {
                break;
            };
            if info.state != RuleState::Active {
                last_info = Some(info);
                break;
            }

            let outcome = executor.tick(&info).await;
            let mut current = info;
            {
                let mut rules = rules.write().await;
                if let Some(entry) = rules.get_mut(&rule_id) {
                    if outcome.checked {
                        entry.info.record_check(now_millis(), outcome.generated);
                    }
                    if outcome.finished && entry.info.state == RuleState::Active {
                        entry.info.state = RuleState::Finished;
                        entry.runner = None;
                    }
                    current = entry.info.clone();
                }
            }
            last_info = Some(current);

            if outcome.finished {
                info!(rule_id = %rule_id, "Rule finished");
                if let Some(bus) = &bus {
                    bus.publish(LifecycleEvent::RuleStateChanged {
                        rule_id,
                        state: RuleState::Finished,
                    });
                }
                break;
            }
        }
    }

    let info = match last_info {
        Some(info) => Some(info),
        None => rules.read().await.get(&rule_id).map(|e| e.info.clone()),
    };
    match info {
        Some(info) => executor.exit(&info).await,
        None => warn!(rule_id = %rule_id, "Rule removed while executor was running"),
    }
    metrics::decrement_gauge!(RULES_ACTIVE, 1.0);
}
