use serde::{Deserialize, Serialize};

const SECOND: i64 = 1000;
const MINUTE: i64 = 60 * SECOND;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;
const WEEK: i64 = 7 * DAY;
const MONTH: i64 = 30 * DAY;
const YEAR: i64 = 365 * DAY;

/// 原始文件访问事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAccessEvent {
    pub path: String,
    pub timestamp: i64,
}

impl FileAccessEvent {
    pub fn new(path: impl Into<String>, timestamp: i64) -> Self {
        Self {
            path: path.into(),
            timestamp,
        }
    }
}

/// 聚合后的访问计数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedAccessCounts {
    pub file_id: i64,
    pub count: u64,
    pub last_accessed: i64,
}

impl AggregatedAccessCounts {
    pub fn new(file_id: i64, count: u64, last_accessed: i64) -> Self {
        Self {
            file_id,
            count,
            last_accessed,
        }
    }

    pub fn merge(self, other: AggregatedAccessCounts) -> Self {
        Self {
            file_id: self.file_id,
            count: self.count + other.count,
            last_accessed: self.last_accessed.max(other.last_accessed),
        }
    }
}

/// 访问计数表的时间粒度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeGranularity {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl TimeGranularity {
    /// 由区间长度（毫秒）推导粒度，取不超过区间长度的最大单位
    pub fn of(interval_ms: i64) -> Self {
        match interval_ms {
            i if i >= YEAR => TimeGranularity::Year,
            i if i >= MONTH => TimeGranularity::Month,
            i if i >= WEEK => TimeGranularity::Week,
            i if i >= DAY => TimeGranularity::Day,
            i if i >= HOUR => TimeGranularity::Hour,
            i if i >= MINUTE => TimeGranularity::Minute,
            _ => TimeGranularity::Second,
        }
    }

    pub fn millis(&self) -> i64 {
        match self {
            TimeGranularity::Second => SECOND,
            TimeGranularity::Minute => MINUTE,
            TimeGranularity::Hour => HOUR,
            TimeGranularity::Day => DAY,
            TimeGranularity::Week => WEEK,
            TimeGranularity::Month => MONTH,
            TimeGranularity::Year => YEAR,
        }
    }
}
