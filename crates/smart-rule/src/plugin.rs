use crate::translation::RuleTranslationResult;
use async_trait::async_trait;
use smart_core::cmdlet::CmdletDescriptor;
use smart_core::Result;
use smart_types::RuleInfo;

/// 规则执行器插件
///
/// 在执行器创建、每次检查、提交 cmdlet 以及退出时介入。默认实现不做任何事。
#[async_trait]
pub trait RuleExecutorPlugin: Send + Sync {
    /// 执行器创建时调用，可以改写翻译结果；返回错误时规则提交失败
    async fn on_new_rule_executor(
        &self,
        _rule: &RuleInfo,
        _translation: &mut RuleTranslationResult,
    ) -> Result<()> {
        Ok(())
    }

    /// 返回 false 跳过本次查询
    fn pre_execution(&self, _rule: &RuleInfo, _translation: &RuleTranslationResult) -> bool {
        true
    }

    fn pre_submit_cmdlet(&self, _rule: &RuleInfo, paths: Vec<String>) -> Vec<String> {
        paths
    }

    fn pre_submit_descriptor(
        &self,
        _rule: &RuleInfo,
        _translation: &RuleTranslationResult,
        descriptor: CmdletDescriptor,
    ) -> CmdletDescriptor {
        descriptor
    }

    async fn on_rule_executor_exit(&self, _rule: &RuleInfo) {}
}
