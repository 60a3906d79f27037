use super::strategy::FileCopyScheduleStrategy;
use crate::plugin::RuleExecutorPlugin;
use crate::translation::RuleTranslationResult;
use async_trait::async_trait;
use smart_core::{Result, SmartError};
use smart_metastore::file_diff::FileDiffDao;
use smart_types::{FileDiff, FileDiffType, RuleInfo};
use std::sync::Arc;
use tracing::{debug, error, info};

pub const SYNC_ACTION: &str = "sync";
pub const SRC: &str = "-src";
pub const DEST: &str = "-dest";
pub const PRESERVE: &str = "-preserve";

const ALL_FILES_PATTERN: &str = "/*";
const PRESERVE_ATTRIBUTES: [&str; 5] =
    ["owner", "group", "permissions", "replication", "modification-time"];

/// 通配符之前最后一个 `/` 及其之前的部分
pub fn base_dir(pattern: &str) -> Option<String> {
    let first_glob = pattern.find(['*', '?']).unwrap_or(pattern.len());
    let last = pattern[..first_glob].rfind('/')?;
    Some(pattern[..=last].to_string())
}

pub fn with_path_separator(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}

fn validate_preserve(raw: Option<&String>) -> Result<()> {
    let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
        return Ok(());
    };
    for attribute in raw.split(',') {
        if !PRESERVE_ATTRIBUTES.contains(&attribute) {
            return Err(SmartError::InvalidArgument(format!(
                "Wrong preserve attribute: {}",
                attribute
            )));
        }
    }
    Ok(())
}

/// 复制（sync）规则插件
///
/// 用复制排序策略改写返回查询，给 sync action 补上 `-src`，规范 `-dest`，
/// 并登记规则的基准同步记录。
pub struct FileCopyDrPlugin {
    file_diff: Arc<dyn FileDiffDao>,
    strategy: FileCopyScheduleStrategy,
}

impl FileCopyDrPlugin {
    pub fn new(file_diff: Arc<dyn FileDiffDao>, strategy: FileCopyScheduleStrategy) -> Self {
        Self { file_diff, strategy }
    }

    fn wrap_query(&self, translation: &mut RuleTranslationResult, patterns: &[String]) {
        let Some(last) = translation.sql_statements.last_mut() else {
            return;
        };
        let original = last.replace(';', "");
        let wrapped = self.strategy.wrap_query(&original, patterns);
        info!(
            strategy = %self.strategy,
            from = %original,
            to = %wrapped,
            "Sync rule query transformed"
        );
        *last = wrapped;
    }

    async fn store_base_sync(&self, rule_id: i64, src: &str, dest: Option<&str>) {
        let mut diff = FileDiff::new(FileDiffType::Basesync, src);
        diff.rule_id = Some(rule_id);
        if let Some(dest) = dest {
            diff.parameters.insert(DEST.to_string(), dest.to_string());
        }

        let result = match self.file_diff.delete_base_sync(rule_id).await {
            Ok(_) => self.file_diff.insert(&diff).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            error!(rule_id = %rule_id, error = %e, "Failed to store base sync record");
        }
    }
}

#[async_trait]
impl RuleExecutorPlugin for FileCopyDrPlugin {
    async fn on_new_rule_executor(
        &self,
        rule: &RuleInfo,
        translation: &mut RuleTranslationResult,
    ) -> Result<()> {
        let patterns = if translation.path_patterns.is_empty() {
            vec![ALL_FILES_PATTERN.to_string()]
        } else {
            translation.path_patterns.clone()
        };

        let descriptor = &translation.cmd_descriptor;
        let Some(index) = (0..descriptor.action_size())
            .find(|&i| descriptor.action_name(i) == Some(SYNC_ACTION))
        else {
            return Ok(());
        };

        validate_preserve(descriptor.action_args(index).get(PRESERVE))?;
        self.wrap_query(translation, &patterns);

        translation
            .cmd_descriptor
            .update_action_arg(index, DEST, with_path_separator);
        let dest = translation.cmd_descriptor.action_args(index).get(DEST).cloned();
        let src = patterns
            .iter()
            .filter_map(|p| base_dir(p))
            .collect::<Vec<_>>()
            .join(",");
        translation.cmd_descriptor.add_action_arg(index, SRC, src.as_str());

        self.store_base_sync(rule.id, &src, dest.as_deref()).await;
        debug!(rule_id = %rule.id, src = %src, dest = ?dest, "Sync rule executor prepared");
        Ok(())
    }

    async fn on_rule_executor_exit(&self, rule: &RuleInfo) {
        if let Err(e) = self.file_diff.delete_base_sync(rule.id).await {
            error!(rule_id = %rule.id, error = %e, "Failed to remove base sync record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translator::RuleTranslator;
    use smart_metastore::file_diff::SqlFileDiffDao;
    use smart_types::{FileDiffState, RuleState};

    async fn dao() -> Arc<SqlFileDiffDao> {
        let db = smart_metastore::connect("sqlite::memory:").await.unwrap();
        smart_metastore::setup_schema(&db).await.unwrap();
        Arc::new(SqlFileDiffDao::new(db))
    }

    #[test]
    fn test_base_dir() {
        assert_eq!(base_dir("/src/*").as_deref(), Some("/src/"));
        assert_eq!(base_dir("/src/a*/b").as_deref(), Some("/src/"));
        assert_eq!(base_dir("/src/dir/file?.txt").as_deref(), Some("/src/dir/"));
        assert_eq!(base_dir("/src/file").as_deref(), Some("/src/"));
        assert_eq!(base_dir("*.txt"), None);
    }

    #[test]
    fn test_with_path_separator() {
        assert_eq!(with_path_separator("/dest"), "/dest/");
        assert_eq!(with_path_separator("/dest/"), "/dest/");
    }

    #[tokio::test]
    async fn test_sync_rule_is_rewritten() {
        let dao = dao().await;
        let plugin = FileCopyDrPlugin::new(dao.clone(), FileCopyScheduleStrategy::Unordered);
        let rule = RuleInfo::new(3, "", RuleState::Active);

        let mut translation = RuleTranslator::new()
            .translate("file: every 1s | path matches \"/src/*\" | sync -dest /backup")
            .unwrap();
        plugin.on_new_rule_executor(&rule, &mut translation).await.unwrap();

        let ret = translation.ret_sql().unwrap();
        assert!(ret.contains(" UNION SELECT src AS path FROM file_diff "));
        assert!(ret.contains("src LIKE '/src/%'"));

        let args = translation.cmd_descriptor.action_args(0);
        assert_eq!(args.get(DEST).map(String::as_str), Some("/backup/"));
        assert_eq!(args.get(SRC).map(String::as_str), Some("/src/"));

        let diffs = dao.get_by_state(FileDiffState::Pending).await.unwrap();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].diff_type, FileDiffType::Basesync);
        assert_eq!(diffs[0].rule_id, Some(3));
        assert_eq!(diffs[0].src, "/src/");
        assert_eq!(diffs[0].parameters.get(DEST).map(String::as_str), Some("/backup/"));

        // 重新创建执行器时替换旧记录
        let mut again = RuleTranslator::new()
            .translate("file: every 1s | path matches \"/src/*\" | sync -dest /backup")
            .unwrap();
        plugin.on_new_rule_executor(&rule, &mut again).await.unwrap();
        assert_eq!(dao.get_by_state(FileDiffState::Pending).await.unwrap().len(), 1);

        plugin.on_rule_executor_exit(&rule).await;
        assert!(dao.get_by_state(FileDiffState::Pending).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_sync_rule_untouched() {
        let plugin = FileCopyDrPlugin::new(dao().await, FileCopyScheduleStrategy::Fifo);
        let rule = RuleInfo::new(1, "", RuleState::Active);
        let mut translation = RuleTranslator::new()
            .translate("file: path matches \"/a/*\" | echo")
            .unwrap();
        let before = translation.sql_statements.clone();

        plugin.on_new_rule_executor(&rule, &mut translation).await.unwrap();
        assert_eq!(translation.sql_statements, before);
    }

    #[tokio::test]
    async fn test_invalid_preserve_rejected() {
        let plugin = FileCopyDrPlugin::new(dao().await, FileCopyScheduleStrategy::Fifo);
        let rule = RuleInfo::new(1, "", RuleState::Active);
        let mut translation = RuleTranslator::new()
            .translate("file: path matches \"/a/*\" | sync -dest /b -preserve owner,size")
            .unwrap();

        let err = plugin.on_new_rule_executor(&rule, &mut translation).await.unwrap_err();
        assert!(err.to_string().contains("Wrong preserve attribute: size"));
    }
}
