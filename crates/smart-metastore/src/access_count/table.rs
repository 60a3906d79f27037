use rand::Rng;
use smart_types::TimeGranularity;
use std::fmt;
use std::hash::{Hash, Hasher};

/// 按时间段聚合的访问计数表
///
/// 相等性只比较起止时间与粒度，不比较表名。
#[derive(Debug, Clone)]
pub struct AccessCountTable {
    table_name: String,
    start_time: i64,
    end_time: i64,
    granularity: TimeGranularity,
    ephemeral: bool,
}

impl AccessCountTable {
    pub fn new(start_time: i64, end_time: i64) -> Self {
        Self::with_ephemeral(start_time, end_time, false)
    }

    /// 临时合并视图，名称带随机后缀
    pub fn ephemeral(start_time: i64, end_time: i64) -> Self {
        Self::with_ephemeral(start_time, end_time, true)
    }

    fn with_ephemeral(start_time: i64, end_time: i64, ephemeral: bool) -> Self {
        let mut table_name = format!("accessCount_{}_{}", start_time, end_time);
        if ephemeral {
            let suffix: i32 = rand::thread_rng().gen();
            table_name.push_str(&format!("_view_{}", suffix.unsigned_abs()));
        }
        Self::named(table_name, start_time, end_time, ephemeral)
    }

    pub fn named(table_name: impl Into<String>, start_time: i64, end_time: i64, ephemeral: bool) -> Self {
        Self {
            table_name: table_name.into(),
            start_time,
            end_time,
            granularity: TimeGranularity::of(end_time - start_time),
            ephemeral,
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    pub fn end_time(&self) -> i64 {
        self.end_time
    }

    pub fn granularity(&self) -> TimeGranularity {
        self.granularity
    }

    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    pub fn interval(&self) -> i64 {
        self.end_time - self.start_time
    }
}

impl PartialEq for AccessCountTable {
    fn eq(&self, other: &Self) -> bool {
        self.start_time == other.start_time
            && self.end_time == other.end_time
            && self.granularity == other.granularity
    }
}

impl Eq for AccessCountTable {}

impl Hash for AccessCountTable {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.start_time.hash(state);
        self.end_time.hash(state);
        self.granularity.hash(state);
    }
}

impl fmt::Display for AccessCountTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AccessCountTable {} starts from {} ends with {} and granularity is {:?}",
            self.table_name, self.start_time, self.end_time, self.granularity
        )
    }
}
