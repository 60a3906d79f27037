use super::{Action, ActionContext};
use async_trait::async_trait;
use smart_core::{Result, SmartError};
use std::time::Duration;

const SLEEP_STEPS: u32 = 10;

/// 返回 `-msg` 参数
pub struct EchoAction;

#[async_trait]
impl Action for EchoAction {
    async fn execute(&self, ctx: &ActionContext) -> Result<String> {
        Ok(ctx.arg("-msg").unwrap_or_default().to_string())
    }
}

/// 睡眠 `-ms` 毫秒，分段上报进度
pub struct SleepAction;

#[async_trait]
impl Action for SleepAction {
    async fn execute(&self, ctx: &ActionContext) -> Result<String> {
        let raw = ctx.arg("-ms").unwrap_or("0");
        let ms: u64 = raw
            .parse()
            .map_err(|_| SmartError::InvalidArgument(format!("Invalid -ms value: '{}'", raw)))?;

        let step = Duration::from_millis(ms) / SLEEP_STEPS;
        for i in 1..=SLEEP_STEPS {
            tokio::time::sleep(step).await;
            ctx.report_progress(i as f32 / SLEEP_STEPS as f32);
        }
        Ok(format!("Slept {} ms", ms))
    }
}

/// 总是失败，错误信息取 `-msg`
pub struct FailAction;

#[async_trait]
impl Action for FailAction {
    async fn execute(&self, ctx: &ActionContext) -> Result<String> {
        Err(SmartError::Internal(
            ctx.arg("-msg").unwrap_or("Action failed").to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tokio::sync::mpsc;

    fn context(args: &[(&str, &str)]) -> (ActionContext, mpsc::UnboundedReceiver<smart_types::ActionStatusReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let args: BTreeMap<String, String> =
            args.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        (ActionContext::new(1, 1, args, tx), rx)
    }

    #[tokio::test]
    async fn test_echo() {
        let (ctx, _) = context(&[("-msg", "hello world")]);
        assert_eq!(EchoAction.execute(&ctx).await.unwrap(), "hello world");

        let (ctx, _) = context(&[]);
        assert_eq!(EchoAction.execute(&ctx).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_sleep_reports_progress() {
        let (ctx, mut rx) = context(&[("-ms", "20")]);
        assert_eq!(SleepAction.execute(&ctx).await.unwrap(), "Slept 20 ms");

        let mut last = 0.0;
        let mut reports = 0;
        while let Ok(report) = rx.try_recv() {
            assert!(report.progress > last);
            last = report.progress;
            reports += 1;
        }
        assert_eq!(reports, SLEEP_STEPS);
        assert_eq!(last, 1.0);
    }

    #[tokio::test]
    async fn test_sleep_rejects_bad_argument() {
        let (ctx, _) = context(&[("-ms", "soon")]);
        let err = SleepAction.execute(&ctx).await.unwrap_err();
        assert!(matches!(err, SmartError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_fail() {
        let (ctx, _) = context(&[("-msg", "disk full")]);
        assert_eq!(
            FailAction.execute(&ctx).await.unwrap_err().to_string(),
            "Internal error: disk full"
        );
    }
}
