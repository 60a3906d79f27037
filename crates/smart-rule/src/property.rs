//! 文件对象属性表
//!
//! 每个属性对应唯一的表/列，带参数的属性用 `$0`、`$1` 占位模板实例化。

use crate::ast::Value;
use smart_metastore::sql_quote;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Long,
    TimeInterval,
    String,
    Boolean,
}

impl ValueType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, ValueType::Long | ValueType::TimeInterval)
    }
}

/// 属性到 SQL 的绑定方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// 直接引用列
    Column,
    /// 由模板生成表达式
    Template,
    /// 基于临时访问计数表
    AccessCount,
    AccessCountTop,
    AccessCountBottom,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: &'static str,
    pub ret_type: ValueType,
    pub param_types: Option<Vec<ValueType>>,
    pub table: &'static str,
    pub column: &'static str,
    pub binding: Binding,
    pub format_template: Option<&'static str>,
}

pub const FILE_TABLE: &str = "file";
pub const VIRTUAL_ACCESS_COUNT_TABLE: &str = "VIRTUAL_ACCESS_COUNT_TABLE";

impl Property {
    fn column(name: &'static str, ret_type: ValueType, column: &'static str) -> Self {
        Self {
            name,
            ret_type,
            param_types: None,
            table: FILE_TABLE,
            column,
            binding: Binding::Column,
            format_template: None,
        }
    }

    fn template(name: &'static str, ret_type: ValueType, column: &'static str, template: &'static str) -> Self {
        Self {
            binding: Binding::Template,
            format_template: Some(template),
            ..Self::column(name, ret_type, column)
        }
    }

    fn access_count(name: &'static str, ret_type: ValueType, binding: Binding, params: Vec<ValueType>) -> Self {
        Self {
            name,
            ret_type,
            param_types: Some(params),
            table: VIRTUAL_ACCESS_COUNT_TABLE,
            column: "count",
            binding,
            format_template: None,
        }
    }

    /// 按名称查找文件对象属性
    pub fn lookup(name: &str) -> Option<Property> {
        use ValueType::*;
        let property = match name {
            "path" => Self::column("path", String, "path"),
            "length" => Self::column("length", Long, "length"),
            "blocksize" => Self::column("blocksize", Long, "block_size"),
            "mtime" => Self::column("mtime", TimeInterval, "modification_time"),
            "atime" => Self::column("atime", TimeInterval, "access_time"),
            "age" => Self::template("age", TimeInterval, "modification_time", "($NOW - modification_time)"),
            "owner" => Self::column("owner", String, "owner"),
            "group" => Self::column("group", String, "owner_group"),
            "storagePolicy" => Self::column("storagePolicy", String, "storage_policy"),
            "ecPolicy" => Self::column("ecPolicy", String, "ec_policy"),
            "isDir" => Self::column("isDir", Boolean, "is_dir"),
            "inCache" => Self::template("inCache", Boolean, "fid", "fid IN (SELECT fid FROM cached_file)"),
            "unsynced" => Self::template(
                "unsynced",
                Boolean,
                "path",
                "path IN (SELECT src FROM file_diff WHERE state = 0)",
            ),
            "accessCount" => Self::access_count("accessCount", Long, Binding::AccessCount, vec![TimeInterval]),
            "accessCountTop" => Self::access_count(
                "accessCountTop",
                Boolean,
                Binding::AccessCountTop,
                vec![TimeInterval, Long],
            ),
            "accessCountBottom" => Self::access_count(
                "accessCountBottom",
                Boolean,
                Binding::AccessCountBottom,
                vec![TimeInterval, Long],
            ),
            _ => return None,
        };
        Some(property)
    }

    pub fn has_parameters(&self) -> bool {
        self.param_types.is_some()
    }

    pub fn arity(&self) -> usize {
        self.param_types.as_ref().map_or(0, Vec::len)
    }

    /// 实例标识，可用作生成的表名或变量名的一部分
    pub fn inst_id(&self, values: &[Value]) -> String {
        if !self.has_parameters() {
            return self.name.to_string();
        }
        let mut id = self.name.to_string();
        for value in values {
            id.push('_');
            match value {
                Value::Str(s) => id.push_str(&sanitize_identifier(s)),
                other => id.push_str(&other.to_string()),
            }
        }
        id
    }

    /// 用参数替换模板中的 `$0`、`$1` 等占位符
    pub fn format_parameters(&self, values: &[Value]) -> String {
        let Some(template) = self.format_template else {
            return self.column.to_string();
        };

        let mut sql = template.to_string();
        // 从大下标往小替换，避免 `$1` 误伤 `$10`
        for (i, value) in values.iter().enumerate().rev() {
            let placeholder = format!("${}", i);
            if !sql.contains(&placeholder) {
                continue;
            }
            let rendered = match value {
                Value::Long(v) => v.to_string(),
                Value::Str(s) => sql_quote(s),
                Value::Now(_) => value_sql(value),
            };
            sql = sql.replace(&placeholder, &rendered);
        }
        sql
    }
}

/// 标识符中的制表符、空格、`!`、引号压缩成单个 `_`
pub fn sanitize_identifier(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut in_run = false;
    for c in value.chars() {
        if matches!(c, '\t' | ' ' | '!' | '"' | '\'') {
            if !in_run {
                out.push('_');
                in_run = true;
            }
        } else {
            out.push(c);
            in_run = false;
        }
    }
    out
}

/// 字面量的 SQL 形式，数值不加引号，字符串加单引号
pub fn value_sql(value: &Value) -> String {
    match value {
        Value::Long(v) => v.to_string(),
        Value::Str(s) => sql_quote(s),
        Value::Now(0) => "$NOW".to_string(),
        Value::Now(offset) if *offset > 0 => format!("($NOW + {})", offset),
        Value::Now(offset) => format!("($NOW - {})", offset.unsigned_abs()),
    }
}

/// glob 转 SQL LIKE
pub fn glob_to_like(pattern: &str) -> String {
    pattern.replace('*', "%").replace('?', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let length = Property::lookup("length").unwrap();
        assert_eq!(length.column, "length");
        assert_eq!(length.table, FILE_TABLE);
        assert!(!length.has_parameters());

        let top = Property::lookup("accessCountTop").unwrap();
        assert_eq!(top.arity(), 2);
        assert_eq!(top.table, VIRTUAL_ACCESS_COUNT_TABLE);

        assert!(Property::lookup("color").is_none());
    }

    #[test]
    fn test_inst_id() {
        let top = Property::lookup("accessCountTop").unwrap();
        assert_eq!(
            top.inst_id(&[Value::Long(60000), Value::Long(10)]),
            "accessCountTop_60000_10"
        );
        assert_eq!(Property::lookup("path").unwrap().inst_id(&[]), "path");
        assert_eq!(sanitize_identifier("a b\t'c\"!d"), "a_b_c_d");
    }

    #[test]
    fn test_format_parameters() {
        let property = Property {
            format_template: Some("f($0, $1)"),
            binding: Binding::Template,
            param_types: Some(vec![ValueType::Long, ValueType::String]),
            ..Property::lookup("length").unwrap()
        };
        assert_eq!(
            property.format_parameters(&[Value::Long(3), Value::Str("x'y".into())]),
            "f(3, 'x''y')"
        );
        assert_eq!(Property::lookup("owner").unwrap().format_parameters(&[]), "owner");
    }

    #[test]
    fn test_value_sql() {
        assert_eq!(value_sql(&Value::Now(0)), "$NOW");
        assert_eq!(value_sql(&Value::Now(-5000)), "($NOW - 5000)");
        assert_eq!(value_sql(&Value::Now(5000)), "($NOW + 5000)");
        assert_eq!(glob_to_like("/src/a?/*"), "/src/a_/%");
    }
}
