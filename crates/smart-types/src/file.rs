use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 文件元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub fid: i64,
    pub path: String,
    pub length: i64,
    pub block_size: i64,
    pub modification_time: i64,
    pub access_time: i64,
    pub is_dir: bool,
    pub owner: String,
    pub group: String,
    pub storage_policy: String,
    pub ec_policy: String,
}

impl FileInfo {
    pub fn new(fid: i64, path: impl Into<String>, length: i64) -> Self {
        let now = crate::now_millis();
        Self {
            fid,
            path: path.into(),
            length,
            block_size: 128 * 1024 * 1024,
            modification_time: now,
            access_time: now,
            is_dir: false,
            owner: "root".to_string(),
            group: "supergroup".to_string(),
            storage_policy: "HOT".to_string(),
            ec_policy: String::new(),
        }
    }
}

/// 文件变更类型，数值编码与存储一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileDiffType {
    Append,
    Rename,
    Delete,
    Chmod,
    Chown,
    Metadata,
    Basesync,
    Create,
}

impl FileDiffType {
    pub fn value(&self) -> i32 {
        *self as i32
    }

    pub fn from_value(value: i32) -> Option<Self> {
        use FileDiffType::*;
        [Append, Rename, Delete, Chmod, Chown, Metadata, Basesync, Create]
            .into_iter()
            .find(|t| t.value() == value)
    }
}

/// 文件变更处理状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileDiffState {
    Pending,
    Running,
    Merged,
    Applied,
    Failed,
}

impl FileDiffState {
    pub fn value(&self) -> i32 {
        *self as i32
    }

    pub fn from_value(value: i32) -> Option<Self> {
        use FileDiffState::*;
        [Pending, Running, Merged, Applied, Failed]
            .into_iter()
            .find(|s| s.value() == value)
    }
}

/// 待同步的文件变更
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDiff {
    pub id: i64,
    pub rule_id: Option<i64>,
    pub diff_type: FileDiffType,
    pub src: String,
    pub parameters: BTreeMap<String, String>,
    pub state: FileDiffState,
    pub create_time: i64,
}

impl FileDiff {
    pub fn new(diff_type: FileDiffType, src: impl Into<String>) -> Self {
        Self {
            id: 0,
            rule_id: None,
            diff_type,
            src: src.into(),
            parameters: BTreeMap::new(),
            state: FileDiffState::Pending,
            create_time: crate::now_millis(),
        }
    }
}
