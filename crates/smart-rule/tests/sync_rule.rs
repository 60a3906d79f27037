use async_trait::async_trait;
use smart_core::cmdlet::{CmdletDescriptor, FILE_PATH};
use smart_core::Result;
use smart_metastore::file_diff::{FileDiffDao, SqlFileDiffDao};
use smart_metastore::{MetaStore, SqlMetaStore};
use smart_rule::{CmdletSubmitter, FileCopyDrPlugin, FileCopyScheduleStrategy, RuleExecutor, RuleTranslator};
use smart_types::{FileDiff, FileDiffType, RuleInfo, RuleState};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct RecordingSubmitter {
    submitted: Mutex<Vec<CmdletDescriptor>>,
}

#[async_trait]
impl CmdletSubmitter for RecordingSubmitter {
    async fn submit_rule_cmdlet(&self, descriptor: CmdletDescriptor, _owner: String) -> Result<Option<i64>> {
        let mut submitted = self.submitted.lock().await;
        submitted.push(descriptor);
        Ok(Some(submitted.len() as i64))
    }

    async fn delete_by_rule(&self, _rule_id: i64) -> Result<u64> {
        Ok(0)
    }
}

async fn setup() -> (Arc<SqlMetaStore>, Arc<SqlFileDiffDao>) {
    let db = smart_metastore::connect("sqlite::memory:").await.unwrap();
    smart_metastore::setup_schema(&db).await.unwrap();
    let store = Arc::new(SqlMetaStore::new(db.clone()));
    let diffs = Arc::new(SqlFileDiffDao::new(db));

    for (fid, path) in [(1, "/src/a"), (2, "/src/b"), (3, "/src/c"), (4, "/other/d")] {
        store
            .execute(&format!("INSERT INTO file (fid, path) VALUES ({}, '{}')", fid, path))
            .await
            .unwrap();
    }
    for (path, diff_type, create_time) in [
        ("/src/b", FileDiffType::Append, 200),
        ("/src/c", FileDiffType::Create, 100),
        ("/other/d", FileDiffType::Create, 50),
        ("/src/e", FileDiffType::Delete, 10),
    ] {
        let mut diff = FileDiff::new(diff_type, path);
        diff.create_time = create_time;
        diffs.insert(&diff).await.unwrap();
    }
    (store, diffs)
}

async fn run_sync_rule(strategy: FileCopyScheduleStrategy) -> Vec<CmdletDescriptor> {
    let (store, diffs) = setup().await;
    let submitter = Arc::new(RecordingSubmitter::default());
    let text = "file: every 1s | path matches \"/src/*\" | sync -dest /backup";
    let rule = RuleInfo::new(11, text, RuleState::Active);

    let translation = RuleTranslator::new().translate(text).unwrap();
    let mut executor = RuleExecutor::create(
        &rule,
        "ops",
        translation,
        store,
        submitter.clone(),
        vec![Arc::new(FileCopyDrPlugin::new(diffs, strategy))],
    )
    .await
    .unwrap();

    let outcome = executor.tick(&rule).await;
    assert!(outcome.checked);

    let submitted = submitter.submitted.lock().await.clone();
    assert_eq!(outcome.generated, submitted.len() as u64);
    submitted
}

fn files(descriptors: &[CmdletDescriptor]) -> Vec<String> {
    descriptors
        .iter()
        .map(|d| d.action_args(0).get(FILE_PATH).cloned().unwrap_or_default())
        .collect()
}

#[tokio::test]
async fn test_fifo_sync_rule_orders_by_oldest_diff() {
    let submitted = run_sync_rule(FileCopyScheduleStrategy::Fifo).await;
    assert_eq!(files(&submitted), vec!["/src/c", "/src/b"]);

    let args = submitted[0].action_args(0);
    assert_eq!(args.get("-src").map(String::as_str), Some("/src/"));
    assert_eq!(args.get("-dest").map(String::as_str), Some("/backup/"));
    assert_eq!(submitted[0].rule_id(), 11);
}

#[tokio::test]
async fn test_lifo_sync_rule_orders_by_newest_diff() {
    let submitted = run_sync_rule(FileCopyScheduleStrategy::Lifo).await;
    assert_eq!(files(&submitted), vec!["/src/b", "/src/c"]);
}

#[tokio::test]
async fn test_unordered_sync_rule_covers_backlog() {
    let mut paths = files(&run_sync_rule(FileCopyScheduleStrategy::Unordered).await);
    paths.sort();
    assert_eq!(paths, vec!["/src/b", "/src/c"]);
}
