use crate::property::glob_to_like;
use smart_core::{Result, SmartError};
use smart_metastore::sql_quote;
use smart_types::{FileDiffState, FileDiffType};
use std::fmt;
use std::str::FromStr;

/// 待复制文件的排序策略
///
/// 在规则的返回查询上合并 file_diff 积压，决定候选文件出现的顺序。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileCopyScheduleStrategy {
    Unordered,
    /// 最早的变更先复制
    #[default]
    Fifo,
    /// 最新的变更先复制
    Lifo,
}

impl FileCopyScheduleStrategy {
    pub fn of(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "unordered" => Ok(Self::Unordered),
            "fifo" | "ordered" => Ok(Self::Fifo),
            "lifo" => Ok(Self::Lifo),
            _ => Err(SmartError::InvalidArgument(format!(
                "Wrong file copy schedule strategy: {}",
                name
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Unordered => "unordered",
            Self::Fifo => "fifo",
            Self::Lifo => "lifo",
        }
    }

    /// 包装返回查询
    ///
    /// 积压中未处理的新建或追加记录，只要路径匹配任一模式，就会并入候选集合。
    /// FIFO/LIFO 创建时间相同的记录按路径升序，没有积压记录的文件创建时间视为 0。
    pub fn wrap_query(&self, base_query: &str, path_patterns: &[String]) -> String {
        let union = format!(
            "{} UNION SELECT src AS path FROM file_diff WHERE {}",
            base_query,
            backlog_filter(path_patterns)
        );
        let order = match self {
            Self::Unordered => return union,
            Self::Fifo => "COALESCE(MIN(file_diff.create_time), 0) ASC",
            Self::Lifo => "COALESCE(MAX(file_diff.create_time), 0) DESC",
        };
        format!(
            "SELECT candidates.path FROM ({}) AS candidates \
             LEFT JOIN file_diff ON candidates.path = file_diff.src AND file_diff.state = {} \
             GROUP BY candidates.path ORDER BY {}, candidates.path ASC",
            union,
            FileDiffState::Pending.value(),
            order
        )
    }
}

impl FromStr for FileCopyScheduleStrategy {
    type Err = SmartError;

    fn from_str(s: &str) -> Result<Self> {
        Self::of(s)
    }
}

impl fmt::Display for FileCopyScheduleStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn backlog_filter(path_patterns: &[String]) -> String {
    let mut filter = format!(
        "state = {} AND diff_type IN ({}, {})",
        FileDiffState::Pending.value(),
        FileDiffType::Create.value(),
        FileDiffType::Append.value()
    );
    if !path_patterns.is_empty() {
        let like = path_patterns
            .iter()
            .map(|p| format!("src LIKE {}", sql_quote(&glob_to_like(p))))
            .collect::<Vec<_>>()
            .join(" OR ");
        filter.push_str(&format!(" AND ({})", like));
    }
    filter
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "select * from test";

    fn patterns() -> Vec<String> {
        vec!["/path1/*".to_string(), "/path2/*".to_string()]
    }

    #[test]
    fn test_unordered() {
        assert_eq!(
            FileCopyScheduleStrategy::Unordered.wrap_query(BASE, &patterns()),
            "select * from test UNION SELECT src AS path FROM file_diff \
             WHERE state = 0 AND diff_type IN (7, 0) AND (src LIKE '/path1/%' OR src LIKE '/path2/%')"
        );
    }

    #[test]
    fn test_fifo() {
        assert_eq!(
            FileCopyScheduleStrategy::Fifo.wrap_query(BASE, &patterns()),
            "SELECT candidates.path FROM (select * from test UNION SELECT src AS path FROM file_diff \
             WHERE state = 0 AND diff_type IN (7, 0) AND (src LIKE '/path1/%' OR src LIKE '/path2/%')) AS candidates \
             LEFT JOIN file_diff ON candidates.path = file_diff.src AND file_diff.state = 0 \
             GROUP BY candidates.path ORDER BY COALESCE(MIN(file_diff.create_time), 0) ASC, candidates.path ASC"
        );
    }

    #[test]
    fn test_lifo() {
        assert_eq!(
            FileCopyScheduleStrategy::Lifo.wrap_query(BASE, &patterns()),
            "SELECT candidates.path FROM (select * from test UNION SELECT src AS path FROM file_diff \
             WHERE state = 0 AND diff_type IN (7, 0) AND (src LIKE '/path1/%' OR src LIKE '/path2/%')) AS candidates \
             LEFT JOIN file_diff ON candidates.path = file_diff.src AND file_diff.state = 0 \
             GROUP BY candidates.path ORDER BY COALESCE(MAX(file_diff.create_time), 0) DESC, candidates.path ASC"
        );
    }

    #[test]
    fn test_of() {
        assert_eq!(FileCopyScheduleStrategy::of("FIFO").unwrap(), FileCopyScheduleStrategy::Fifo);
        assert_eq!(FileCopyScheduleStrategy::of("ordered").unwrap(), FileCopyScheduleStrategy::Fifo);
        assert_eq!("lifo".parse::<FileCopyScheduleStrategy>().unwrap(), FileCopyScheduleStrategy::Lifo);

        let err = FileCopyScheduleStrategy::of("unknown").unwrap_err();
        assert!(err.to_string().contains("Wrong file copy schedule strategy"));
    }
}
