//! 规则执行器
//!
//! 每次检查：展开动态语句与变量 -> 依次执行 SQL -> 返回语句得到文件路径 ->
//! 按模板为每个路径生成 cmdlet 并提交。临时表在检查结束时删除。

use crate::plugin::RuleExecutorPlugin;
use crate::translation::{DynamicParameter, RuleTranslationResult};
use crate::translator::{
    GEN_ACCESS_COUNT_BOTTOM_VALUE, GEN_ACCESS_COUNT_TABLE, GEN_ACCESS_COUNT_TOP_VALUE,
};
use async_trait::async_trait;
use smart_core::cmdlet::{CmdletDescriptor, FILE_PATH};
use smart_core::metrics::{CMDLETS_GENERATED_TOTAL, RULE_CHECKS_TOTAL, RULE_TICK_FAILURES_TOTAL};
use smart_core::{Result, SmartError};
use smart_metastore::MetaStore;
use smart_types::{now_millis, RuleInfo};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const SLOW_TICK_MS: i64 = 2000;

/// 规则 cmdlet 的提交入口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CmdletSubmitter: Send + Sync {
    /// 返回新 cmdlet 的 ID；与未结束的同一规则 cmdlet 重复时返回 `None`
    async fn submit_rule_cmdlet(&self, descriptor: CmdletDescriptor, owner: String) -> Result<Option<i64>>;

    /// 删除规则未结束的 cmdlet，返回删除数量
    async fn delete_by_rule(&self, rule_id: i64) -> Result<u64>;
}

/// 一次检查的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// 是否执行了检查
    pub checked: bool,
    pub generated: u64,
    /// 调度结束，规则应转为 FINISHED
    pub finished: bool,
}

pub struct RuleExecutor {
    rule_id: i64,
    owner: String,
    translation: RuleTranslationResult,
    store: Arc<dyn MetaStore>,
    submitter: Arc<dyn CmdletSubmitter>,
    plugins: Vec<Arc<dyn RuleExecutorPlugin>>,
    vars: HashMap<String, i64>,
    cleanups: Vec<String>,
}

impl RuleExecutor {
    /// 创建执行器，插件先改写翻译结果
    pub async fn create(
        rule: &RuleInfo,
        owner: impl Into<String>,
        mut translation: RuleTranslationResult,
        store: Arc<dyn MetaStore>,
        submitter: Arc<dyn CmdletSubmitter>,
        plugins: Vec<Arc<dyn RuleExecutorPlugin>>,
    ) -> Result<Self> {
        for plugin in &plugins {
            plugin.on_new_rule_executor(rule, &mut translation).await?;
        }
        Ok(Self {
            rule_id: rule.id,
            owner: owner.into(),
            translation,
            store,
            submitter,
            plugins,
            vars: HashMap::new(),
            cleanups: Vec::new(),
        })
    }

    pub fn rule_id(&self) -> i64 {
        self.rule_id
    }

    pub fn translation(&self) -> &RuleTranslationResult {
        &self.translation
    }

    /// 执行一次检查
    pub async fn tick(&mut self, rule: &RuleInfo) -> TickOutcome {
        let start = now_millis();
        let schedule = self.translation.schedule_info;
        if !schedule.is_executable(start) {
            return TickOutcome::default();
        }

        // 每次检查使用独立副本，插件与执行过程不会改动执行器持有的计划
        let plan = self.translation.clone();
        let proceed = self.plugins.iter().all(|p| p.pre_execution(rule, &plan));

        if schedule.is_expired(start) {
            info!(rule_id = %self.rule_id, "Rule schedule expired");
            return TickOutcome {
                checked: false,
                generated: 0,
                finished: true,
            };
        }

        metrics::counter!(RULE_CHECKS_TOTAL, 1);
        let mut paths = Vec::new();
        if proceed {
            match self.execute_query(&plan).await {
                Ok(found) => paths = found,
                Err(e) => {
                    metrics::counter!(RULE_TICK_FAILURES_TOTAL, 1);
                    error!(rule_id = %self.rule_id, error = %e, "Rule check failed");
                }
            }
        }
        let query_end = now_millis();

        let mut generated = 0;
        if proceed {
            for plugin in &self.plugins {
                paths = plugin.pre_submit_cmdlet(rule, paths);
            }
            generated = self.submit(rule, &plan, paths).await;
        }

        let end = now_millis();
        if end - start > SLOW_TICK_MS {
            warn!(
                rule_id = %self.rule_id,
                elapsed_ms = end - start,
                query_ms = query_end - start,
                submit_ms = end - query_end,
                generated = generated,
                "Rule check took too long"
            );
        }

        TickOutcome {
            checked: true,
            generated,
            finished: schedule.is_one_shot() || !schedule.has_next_after(end),
        }
    }

    /// 执行器退出
    pub async fn exit(&self, rule: &RuleInfo) {
        for plugin in &self.plugins {
            plugin.on_rule_executor_exit(rule).await;
        }
        debug!(rule_id = %self.rule_id, "Rule executor exited");
    }

    async fn execute_query(&mut self, plan: &RuleTranslationResult) -> Result<Vec<String>> {
        let mut result = Ok(Vec::new());
        for (index, statement) in plan.sql_statements.iter().enumerate() {
            let sql = self.unfold(plan, statement).await;
            debug!(rule_id = %self.rule_id, sql = %sql, "Rule statement");

            let step = if index == plan.ret_sql_index {
                match self.store.query_paths(&sql).await {
                    Ok(paths) => {
                        result = Ok(paths);
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            } else if sql.trim().len() > 5 {
                self.store.execute(sql.trim()).await.map(|_| ())
            } else {
                Ok(())
            };
            if let Err(e) = step {
                result = Err(SmartError::Tick {
                    rule_id: self.rule_id,
                    message: e.to_string(),
                });
                break;
            }
        }

        while let Some(sql) = self.cleanups.pop() {
            if let Err(e) = self.store.execute(&sql).await {
                error!(rule_id = %self.rule_id, sql = %sql, error = %e, "Rule cleanup failed");
            }
        }
        result
    }

    async fn unfold(&mut self, plan: &RuleTranslationResult, sql: &str) -> String {
        let sql = self.unfold_function_calls(plan, sql).await;
        self.vars.insert("NOW".to_string(), now_millis());
        unfold_variables(&sql, &self.vars)
    }

    async fn unfold_function_calls(&mut self, plan: &RuleTranslationResult, sql: &str) -> String {
        let mut out = String::with_capacity(sql.len());
        let mut rest = sql;
        while let Some(start) = rest.find("$@") {
            out.push_str(&rest[..start]);
            let call = &rest[start + 2..];
            let Some((name, param, consumed)) = parse_call(call) else {
                out.push_str("$@");
                rest = call;
                continue;
            };
            if let Some(value) = self.call_function(name, plan.parameter(param)).await {
                out.push_str(&value);
            }
            rest = &call[consumed..];
        }
        out.push_str(rest);
        out
    }

    async fn call_function(&mut self, name: &str, param: Option<&DynamicParameter>) -> Option<String> {
        let Some(param) = param else {
            error!(rule_id = %self.rule_id, function = %name, "Missing parameter for rule function");
            return None;
        };
        match name {
            GEN_ACCESS_COUNT_TABLE => Some(self.gen_access_count_table(param).await),
            GEN_ACCESS_COUNT_TOP_VALUE => {
                self.gen_access_count_value(param, true).await;
                None
            }
            GEN_ACCESS_COUNT_BOTTOM_VALUE => {
                self.gen_access_count_value(param, false).await;
                None
            }
            _ => {
                error!(rule_id = %self.rule_id, function = %name, "Unknown rule function");
                None
            }
        }
    }

    /// 建立临时访问计数表，返回填充语句
    async fn gen_access_count_table(&mut self, param: &DynamicParameter) -> String {
        let interval = param.args.first().copied().unwrap_or(0);
        let now = now_millis();

        // 上一轮清理失败时遗留的同名表不能复用
        let stale = format!("DROP TABLE IF EXISTS {}", param.table);
        if let Err(e) = self.store.execute(&stale).await {
            error!(rule_id = %self.rule_id, table = %param.table, error = %e, "Cannot drop stale table");
        }
        let create = format!(
            "CREATE TABLE {}(fid BIGINT NOT NULL, count BIGINT NOT NULL)",
            param.table
        );
        if let Err(e) = self.store.execute(&create).await {
            error!(rule_id = %self.rule_id, table = %param.table, error = %e, "Cannot create table");
        }
        self.cleanups.push(format!("DROP TABLE IF EXISTS {}", param.table));

        format!(
            "INSERT INTO {} SELECT fid, count(*) AS count FROM file_access\n\
             WHERE access_time >= {} AND access_time <= {} GROUP BY fid ;",
            param.table,
            now - interval,
            now
        )
    }

    /// 计算前/后 N 名的访问次数阈值，结果写入变量
    async fn gen_access_count_value(&mut self, param: &DynamicParameter, top: bool) {
        let limit = param.args.get(1).copied().unwrap_or(0);
        let sql = format!(
            "SELECT {}(count) AS value FROM ( SELECT * FROM {} ORDER BY count {}LIMIT {} ) AS {}_TMP",
            if top { "min" } else { "max" },
            param.table,
            if top { "DESC " } else { "" },
            limit,
            param.table
        );
        let value = match self.store.query_long(&sql).await {
            Ok(value) => value.unwrap_or(0),
            Err(e) => {
                error!(
                    rule_id = %self.rule_id,
                    table = %param.table,
                    error = %e,
                    "Get {} access count error",
                    if top { "top" } else { "bottom" }
                );
                0
            }
        };
        if let Some(variable) = &param.variable {
            self.vars.insert(variable.clone(), value);
        }
    }

    async fn submit(&self, rule: &RuleInfo, plan: &RuleTranslationResult, paths: Vec<String>) -> u64 {
        let mut generated = 0;
        for path in paths {
            let mut descriptor = plan.cmd_descriptor.clone();
            descriptor.set_rule_id(rule.id);
            descriptor.set_cmdlet_parameter(FILE_PATH, path.as_str());
            for plugin in &self.plugins {
                descriptor = plugin.pre_submit_descriptor(rule, plan, descriptor);
            }

            match self.submitter.submit_rule_cmdlet(descriptor, self.owner.clone()).await {
                Ok(Some(_)) => generated += 1,
                Ok(None) => {}
                Err(SmartError::QueueFull(_)) => {
                    warn!(rule_id = %self.rule_id, "Cmdlet queue is full, stop submitting");
                    break;
                }
                Err(e) => {
                    debug!(rule_id = %self.rule_id, path = %path, error = %e, "Failed to submit cmdlet");
                }
            }
        }
        if generated > 0 {
            metrics::counter!(CMDLETS_GENERATED_TOTAL, generated);
        }
        generated
    }
}

/// 解析 `name(param)`，返回名称、参数与消耗的字节数
fn parse_call(text: &str) -> Option<(&str, &str, usize)> {
    let name_len = text
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(text.len());
    if name_len == 0 || !text[name_len..].starts_with('(') {
        return None;
    }
    let close = text[name_len..].find(')')? + name_len;
    Some((&text[..name_len], text[name_len + 1..close].trim(), close + 1))
}

/// 替换 `$变量`，字符串字面量内部不替换，未知变量原样保留
pub fn unfold_variables(sql: &str, vars: &HashMap<String, i64>) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut in_literal = false;
    let mut chars = sql.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c == '\'' {
            in_literal = !in_literal;
        }
        if c != '$' || in_literal {
            out.push(c);
            continue;
        }

        let mut end = i + 1;
        while let Some(&(j, n)) = chars.peek() {
            if !(n.is_ascii_alphanumeric() || n == '_') {
                break;
            }
            end = j + n.len_utf8();
            chars.next();
        }
        let name = &sql[i + 1..end];
        match vars.get(name) {
            Some(value) => out.push_str(&value.to_string()),
            None => {
                if !name.is_empty() {
                    warn!(variable = %name, "Unknown rule variable");
                }
                out.push_str(&sql[i..end]);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translator::RuleTranslator;
    use smart_metastore::SqlMetaStore;
    use smart_types::RuleState;

    async fn store() -> Arc<SqlMetaStore> {
        let db = smart_metastore::connect("sqlite::memory:").await.unwrap();
        smart_metastore::setup_schema(&db).await.unwrap();
        let store = Arc::new(SqlMetaStore::new(db));
        for (fid, path, length) in [(1, "/a/1", 10), (2, "/a/2", 2048), (3, "/b/3", 4096)] {
            store
                .execute(&format!(
                    "INSERT INTO file (fid, path, length) VALUES ({}, '{}', {})",
                    fid, path, length
                ))
                .await
                .unwrap();
        }
        store
    }

    async fn rule_executor(
        rule_text: &str,
        store: Arc<SqlMetaStore>,
        submitter: MockCmdletSubmitter,
    ) -> (RuleInfo, RuleExecutor) {
        let rule = RuleInfo::new(7, rule_text, RuleState::Active);
        let translation = RuleTranslator::new().translate(rule_text).unwrap();
        let executor = RuleExecutor::create(&rule, "alice", translation, store, Arc::new(submitter), vec![])
            .await
            .unwrap();
        (rule, executor)
    }

    fn file_of(descriptor: &CmdletDescriptor) -> String {
        descriptor.action_args(0).get(FILE_PATH).cloned().unwrap_or_default()
    }

    #[test]
    fn test_unfold_variables() {
        let vars = HashMap::from([("NOW".to_string(), 100), ("top_value".to_string(), 5)]);
        assert_eq!(
            unfold_variables("a > ($NOW - 10) AND count >= $top_value", &vars),
            "a > (100 - 10) AND count >= 5"
        );
        assert_eq!(unfold_variables("path = '/x/$NOW'", &vars), "path = '/x/$NOW'");
        assert_eq!(unfold_variables("x = $missing", &vars), "x = $missing");
    }

    #[test]
    fn test_parse_call() {
        assert_eq!(
            parse_call("genVirtualAccessCountTable(accessCount_60000) rest"),
            Some(("genVirtualAccessCountTable", "accessCount_60000", 45))
        );
        assert_eq!(parse_call("(x)"), None);
        assert_eq!(parse_call("name x"), None);
    }

    #[tokio::test]
    async fn test_tick_submits_matching_files() {
        let mut submitter = MockCmdletSubmitter::new();
        submitter
            .expect_submit_rule_cmdlet()
            .withf(|d, owner| owner == "alice" && d.rule_id() == 7 && file_of(d).starts_with("/a/"))
            .times(2)
            .returning(|_, _| Ok(Some(1)));

        let (rule, mut executor) =
            rule_executor("file: path matches \"/a/*\" | echo -msg hi", store().await, submitter).await;
        let outcome = executor.tick(&rule).await;
        assert_eq!(
            outcome,
            TickOutcome {
                checked: true,
                generated: 2,
                finished: false
            }
        );
    }

    #[tokio::test]
    async fn test_duplicates_not_counted_and_queue_full_stops() {
        let mut submitter = MockCmdletSubmitter::new();
        submitter
            .expect_submit_rule_cmdlet()
            .times(1)
            .returning(|_, _| Err(SmartError::QueueFull("cmdlet queue".to_string())));
        let (rule, mut executor) = rule_executor("file: length > 0 | echo", store().await, submitter).await;
        assert_eq!(executor.tick(&rule).await.generated, 0);

        let mut submitter = MockCmdletSubmitter::new();
        submitter
            .expect_submit_rule_cmdlet()
            .times(3)
            .returning(|_, _| Ok(None));
        let (rule, mut executor) = rule_executor("file: length > 0 | echo", store().await, submitter).await;
        assert_eq!(executor.tick(&rule).await.generated, 0);
    }

    #[tokio::test]
    async fn test_access_count_rule() {
        let store = store().await;
        let now = now_millis();
        for fid in [1, 1, 1, 2, 2, 3] {
            store
                .execute(&format!(
                    "INSERT INTO file_access (fid, count, access_time) VALUES ({}, 1, {})",
                    fid, now
                ))
                .await
                .unwrap();
        }
        // 超出时间窗口的访问不计入
        store
            .execute("INSERT INTO file_access (fid, count, access_time) VALUES (3, 1, 0)")
            .await
            .unwrap();

        let mut submitter = MockCmdletSubmitter::new();
        submitter
            .expect_submit_rule_cmdlet()
            .withf(|d, _| ["/a/1", "/a/2"].contains(&file_of(d).as_str()))
            .times(2)
            .returning(|_, _| Ok(Some(1)));
        let (rule, mut executor) =
            rule_executor("file: accessCount(1h) >= 2 | echo", store.clone(), submitter).await;
        assert_eq!(executor.tick(&rule).await.generated, 2);

        let mut submitter = MockCmdletSubmitter::new();
        submitter
            .expect_submit_rule_cmdlet()
            .withf(|d, _| file_of(d) == "/a/1")
            .times(1)
            .returning(|_, _| Ok(Some(1)));
        let (rule, mut executor) =
            rule_executor("file: accessCountTop(1h, 1) | echo", store.clone(), submitter).await;
        assert_eq!(executor.tick(&rule).await.generated, 1);

        // 临时表在检查结束后删除
        assert_eq!(
            store
                .query_long("SELECT count(*) AS value FROM sqlite_master WHERE name LIKE 'accessCount%'")
                .await
                .unwrap(),
            Some(0)
        );
    }

    #[tokio::test]
    async fn test_stale_access_count_table_not_reused() {
        let store = store().await;
        let now = now_millis();
        for fid in [1, 1] {
            store
                .execute(&format!(
                    "INSERT INTO file_access (fid, count, access_time) VALUES ({}, 1, {})",
                    fid, now
                ))
                .await
                .unwrap();
        }

        let rule_text = "file: accessCount(1h) >= 2 | echo";
        let translation = RuleTranslator::new().translate(rule_text).unwrap();
        let table = translation.dynamic_parameters.values().next().unwrap().table.clone();
        store
            .execute(&format!("CREATE TABLE {}(fid BIGINT NOT NULL, count BIGINT NOT NULL)", table))
            .await
            .unwrap();
        store
            .execute(&format!("INSERT INTO {} VALUES (1, 5), (3, 9)", table))
            .await
            .unwrap();

        let mut submitter = MockCmdletSubmitter::new();
        submitter
            .expect_submit_rule_cmdlet()
            .withf(|d, _| file_of(d) == "/a/1")
            .times(1)
            .returning(|_, _| Ok(Some(1)));
        let rule = RuleInfo::new(7, rule_text, RuleState::Active);
        let mut executor = RuleExecutor::create(&rule, "alice", translation, store, Arc::new(submitter), vec![])
            .await
            .unwrap();
        assert_eq!(executor.tick(&rule).await.generated, 1);
    }

    #[tokio::test]
    async fn test_query_failure_is_isolated() {
        let store = store().await;
        store.execute("DROP TABLE file").await.unwrap();

        let mut submitter = MockCmdletSubmitter::new();
        submitter.expect_submit_rule_cmdlet().never();
        let (rule, mut executor) = rule_executor("file: length > 0 | echo", store, submitter).await;

        let first = executor.tick(&rule).await;
        assert!(first.checked);
        assert_eq!(first.generated, 0);
        assert!(!first.finished);
        assert!(executor.tick(&rule).await.checked);
    }

    #[tokio::test]
    async fn test_schedule_end() {
        let mut submitter = MockCmdletSubmitter::new();
        submitter.expect_submit_rule_cmdlet().returning(|_, _| Ok(Some(1)));
        let store = store().await;

        let (rule, mut once) = rule_executor("file: at now | length > 1000 | echo", store.clone(), submitter).await;
        let outcome = once.tick(&rule).await;
        assert!(outcome.checked);
        assert_eq!(outcome.generated, 2);
        assert!(outcome.finished);

        let mut submitter = MockCmdletSubmitter::new();
        submitter.expect_submit_rule_cmdlet().never();
        let (rule, mut expired) = rule_executor(
            "file: every 1s from now - 2h to now - 1h | length > 0 | echo",
            store.clone(),
            submitter,
        )
        .await;
        assert_eq!(
            expired.tick(&rule).await,
            TickOutcome {
                checked: false,
                generated: 0,
                finished: true
            }
        );

        let mut submitter = MockCmdletSubmitter::new();
        submitter.expect_submit_rule_cmdlet().never();
        let (rule, mut future) =
            rule_executor("file: at now + 1h | length > 0 | echo", store, submitter).await;
        assert_eq!(future.tick(&rule).await, TickOutcome::default());
    }
}
