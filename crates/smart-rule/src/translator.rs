//! 规则翻译
//!
//! 规则文本 -> 语法树 -> SQL 语句序列。访问计数类属性会在返回语句之前插入
//! `$@函数(参数)` 形式的动态语句，由执行器在每次检查时展开。

use crate::ast::{Expr, PropRef, RuleAst, ScheduleExpr, TimeExpr, Value};
use crate::parser::RuleParser;
use crate::property::{glob_to_like, value_sql, Binding, Property, ValueType};
use crate::schedule::ScheduleInfo;
use crate::translation::{DynamicParameter, RuleTranslationResult};
use chrono::{Local, NaiveDateTime, TimeZone};
use smart_core::cmdlet::CmdletDescriptor;
use smart_core::ParseError;
use smart_metastore::access_count::AccessCountTable;
use std::collections::HashMap;
use tracing::debug;

pub const GEN_ACCESS_COUNT_TABLE: &str = "genVirtualAccessCountTable";
pub const GEN_ACCESS_COUNT_TOP_VALUE: &str = "genVirtualAccessCountTableTopValue";
pub const GEN_ACCESS_COUNT_BOTTOM_VALUE: &str = "genVirtualAccessCountTableBottomValue";

const DEFAULT_EC_POLICY: &str = "RS-6-3-1024k";
const REPLICATION_POLICY: &str = "replication";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 单个 action 隐含的过滤条件
fn implied_condition(descriptor: &CmdletDescriptor, default_ec_policy: &str) -> Option<String> {
    if descriptor.action_size() != 1 {
        return None;
    }
    let cond = match descriptor.action_name(0)? {
        "allssd" => "storagePolicy != \"ALL_SSD\"".to_string(),
        "onessd" => "storagePolicy != \"ONE_SSD\"".to_string(),
        "archive" => "storagePolicy != \"COLD\"".to_string(),
        "alldisk" => "storagePolicy != \"HOT\"".to_string(),
        "onedisk" => "storagePolicy != \"WARM\"".to_string(),
        "ramdisk" => "storagePolicy != \"LAZY_PERSIST\"".to_string(),
        "cache" => "not inCache".to_string(),
        "uncache" => "inCache".to_string(),
        "sync" => "unsynced".to_string(),
        "ec" => {
            let policy = descriptor
                .action_args(0)
                .get("-policy")
                .cloned()
                .unwrap_or_else(|| default_ec_policy.to_string());
            format!("ecPolicy != \"{}\"", policy)
        }
        "unec" => format!("ecPolicy != \"{}\"", REPLICATION_POLICY),
        _ => return None,
    };
    Some(cond)
}

/// 规则翻译器
#[derive(Debug, Clone)]
pub struct RuleTranslator {
    default_ec_policy: String,
}

impl RuleTranslator {
    pub fn new() -> Self {
        Self {
            default_ec_policy: DEFAULT_EC_POLICY.to_string(),
        }
    }

    pub fn with_default_ec_policy(mut self, policy: impl Into<String>) -> Self {
        self.default_ec_policy = policy.into();
        self
    }

    /// 翻译规则，时间表达式以当前时间为基准
    pub fn translate(&self, rule: &str) -> Result<RuleTranslationResult, ParseError> {
        self.translate_at(rule, smart_types::now_millis())
    }

    pub fn translate_at(&self, rule: &str, now: i64) -> Result<RuleTranslationResult, ParseError> {
        let result = self.do_translate(rule, now)?;
        let descriptor = &result.cmd_descriptor;
        if descriptor.action_size() == 0 {
            return Err(ParseError::new("No cmdlet specified in Rule", rule.len()));
        }

        let Some(implied) = implied_condition(descriptor, &self.default_ec_policy) else {
            return Ok(result);
        };

        let (start, end) = result.cond_position;
        let optimized = format!(
            "{}{} and ({}){}",
            &rule[..start],
            implied,
            &rule[start..end],
            &rule[end..]
        );
        debug!(rule = %rule, optimized = %optimized, "Rule condition extended by action");
        self.do_translate(&optimized, now)
    }

    fn do_translate(&self, rule: &str, now: i64) -> Result<RuleTranslationResult, ParseError> {
        let ast = RuleParser::parse(rule)?;
        let cmd_descriptor = CmdletDescriptor::parse(&ast.cmdlet).map_err(|e| {
            ParseError::new(format!("Invalid cmdlet in rule: {}", e), ast.cond_span.1)
        })?;
        let schedule_info = schedule_info(ast.schedule.as_ref(), now)?;

        let mut builder = SqlBuilder::default();
        let condition = builder.condition(&ast.condition)?;
        let RuleAst { cond_span, .. } = ast;

        let mut sql_statements = builder.statements;
        sql_statements.push(format!("SELECT path FROM file WHERE {}", condition));
        let ret_sql_index = sql_statements.len() - 1;

        Ok(RuleTranslationResult {
            sql_statements,
            dynamic_parameters: builder.parameters,
            ret_sql_index,
            schedule_info,
            cmd_descriptor,
            cond_position: cond_span,
            path_patterns: builder.path_patterns,
        })
    }
}

impl Default for RuleTranslator {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve_time(expr: &TimeExpr, now: i64) -> Result<i64, ParseError> {
    match expr {
        TimeExpr::Now(offset) => Ok(now.saturating_add(*offset)),
        TimeExpr::Absolute(text) => {
            let invalid = || ParseError::new(format!("Invalid time expression '{}'", text), 0);
            let naive = NaiveDateTime::parse_from_str(text, TIME_FORMAT).map_err(|_| invalid())?;
            Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|t| t.timestamp_millis())
                .ok_or_else(invalid)
        }
    }
}

fn schedule_info(expr: Option<&ScheduleExpr>, now: i64) -> Result<ScheduleInfo, ParseError> {
    match expr {
        None => Ok(ScheduleInfo::periodic(ScheduleInfo::DEFAULT_EVERY, now, ScheduleInfo::FOR_EVER)),
        Some(ScheduleExpr::At(at)) => Ok(ScheduleInfo::one_shot(resolve_time(at, now)?)),
        Some(ScheduleExpr::Every { every, from, to }) => {
            let start = match from {
                Some(t) => resolve_time(t, now)?,
                None => now,
            };
            let end = match to {
                Some(t) => resolve_time(t, now)?,
                None => ScheduleInfo::FOR_EVER,
            };
            if end < start {
                return Err(ParseError::new("Schedule end time is earlier than start time", 0));
            }
            Ok(ScheduleInfo::periodic(*every, start, end))
        }
    }
}

#[derive(Default)]
struct SqlBuilder {
    statements: Vec<String>,
    parameters: HashMap<String, DynamicParameter>,
    path_patterns: Vec<String>,
    /// 时间间隔 -> 临时表名
    virtual_tables: HashMap<i64, String>,
}

impl SqlBuilder {
    fn condition(&mut self, expr: &Expr) -> Result<String, ParseError> {
        Ok(match expr {
            Expr::Or(l, r) => format!("({} OR {})", self.condition(l)?, self.condition(r)?),
            Expr::And(l, r) => format!("({} AND {})", self.condition(l)?, self.condition(r)?),
            Expr::Not(e) => format!("(NOT {})", self.condition(e)?),
            Expr::Constant(v) if *v != 0 => "1 = 1".to_string(),
            Expr::Constant(_) => "1 = 0".to_string(),
            Expr::Flag(prop) => self.flag(prop)?,
            Expr::Matches { prop, pattern } => {
                let property = resolve(prop)?;
                if property.ret_type != ValueType::String {
                    return Err(ParseError::new(
                        format!("Property '{}' does not support 'matches'", prop.name),
                        prop.position,
                    ));
                }
                if property.name == "path" {
                    self.path_patterns.push(pattern.clone());
                }
                format!(
                    "{} LIKE {}",
                    property.format_parameters(&prop.args),
                    value_sql(&Value::Str(glob_to_like(pattern)))
                )
            }
            Expr::Compare { prop, op, value } => {
                let property = resolve(prop)?;
                check_value_type(&property, prop, value)?;
                let rhs = value_sql(value);
                match property.binding {
                    Binding::AccessCount => {
                        let table = self.virtual_table(&property, prop)?;
                        format!(
                            "COALESCE((SELECT count FROM {t} WHERE {t}.fid = file.fid), 0) {} {}",
                            op.sql(),
                            rhs,
                            t = table
                        )
                    }
                    _ => format!("{} {} {}", property.format_parameters(&prop.args), op.sql(), rhs),
                }
            }
        })
    }

    fn flag(&mut self, prop: &PropRef) -> Result<String, ParseError> {
        let property = resolve(prop)?;
        if property.ret_type != ValueType::Boolean {
            return Err(ParseError::new(
                format!("Property '{}' is not a boolean condition", prop.name),
                prop.position,
            ));
        }
        Ok(match property.binding {
            Binding::Column => format!("{} = 1", property.column),
            Binding::AccessCountTop | Binding::AccessCountBottom => self.top_bottom(&property, prop)?,
            _ => property.format_parameters(&prop.args),
        })
    }

    /// 按时间间隔共享的临时访问计数表
    fn virtual_table(&mut self, property: &Property, prop: &PropRef) -> Result<String, ParseError> {
        let interval = long_arg(prop, 0)?;
        if let Some(table) = self.virtual_tables.get(&interval) {
            return Ok(table.clone());
        }

        let table = AccessCountTable::ephemeral(0, interval).table_name().to_string();
        let param = Property::lookup("accessCount")
            .map(|p| p.inst_id(&[Value::Long(interval)]))
            .unwrap_or_else(|| property.inst_id(&prop.args));
        self.parameters.insert(
            param.clone(),
            DynamicParameter {
                args: vec![interval],
                table: table.clone(),
                variable: None,
            },
        );
        self.statements.push(format!("$@{}({})", GEN_ACCESS_COUNT_TABLE, param));
        self.virtual_tables.insert(interval, table.clone());
        Ok(table)
    }

    fn top_bottom(&mut self, property: &Property, prop: &PropRef) -> Result<String, ParseError> {
        let table = self.virtual_table(property, prop)?;
        let interval = long_arg(prop, 0)?;
        let limit = long_arg(prop, 1)?;
        if limit <= 0 {
            return Err(ParseError::new(
                format!("Property '{}' needs a positive count", prop.name),
                prop.position,
            ));
        }

        let param = property.inst_id(&prop.args);
        let variable = format!("{}_value", param);
        let (function, op) = match property.binding {
            Binding::AccessCountTop => (GEN_ACCESS_COUNT_TOP_VALUE, ">="),
            _ => (GEN_ACCESS_COUNT_BOTTOM_VALUE, "<="),
        };
        if !self.parameters.contains_key(&param) {
            self.parameters.insert(
                param.clone(),
                DynamicParameter {
                    args: vec![interval, limit],
                    table: table.clone(),
                    variable: Some(variable.clone()),
                },
            );
            self.statements.push(format!("$@{}({})", function, param));
        }
        Ok(format!(
            "fid IN (SELECT fid FROM {} WHERE count {} ${})",
            table, op, variable
        ))
    }
}

fn resolve(prop: &PropRef) -> Result<Property, ParseError> {
    let property = Property::lookup(&prop.name).ok_or_else(|| {
        ParseError::new(format!("Unknown property '{}'", prop.name), prop.position)
    })?;
    if property.arity() != prop.args.len() {
        return Err(ParseError::new(
            format!(
                "Property '{}' expects {} parameter(s), got {}",
                prop.name,
                property.arity(),
                prop.args.len()
            ),
            prop.position,
        ));
    }
    if let Some(types) = &property.param_types {
        for (ty, arg) in types.iter().zip(&prop.args) {
            let ok = match ty {
                ValueType::Long | ValueType::TimeInterval => matches!(arg, Value::Long(_)),
                ValueType::String => matches!(arg, Value::Str(_)),
                ValueType::Boolean => false,
            };
            if !ok {
                return Err(ParseError::new(
                    format!("Invalid parameter '{}' for property '{}'", arg, prop.name),
                    prop.position,
                ));
            }
        }
    }
    Ok(property)
}

fn check_value_type(property: &Property, prop: &PropRef, value: &Value) -> Result<(), ParseError> {
    let ok = match property.ret_type {
        ValueType::Long | ValueType::TimeInterval => matches!(value, Value::Long(_) | Value::Now(_)),
        ValueType::String => matches!(value, Value::Str(_)),
        ValueType::Boolean => false,
    };
    if ok {
        Ok(())
    } else {
        Err(ParseError::new(
            format!("Type mismatch: property '{}' compared with '{}'", prop.name, value),
            prop.position,
        ))
    }
}

fn long_arg(prop: &PropRef, index: usize) -> Result<i64, ParseError> {
    match prop.args.get(index) {
        Some(Value::Long(v)) => Ok(*v),
        _ => Err(ParseError::new(
            format!("Property '{}' expects a numeric parameter at {}", prop.name, index),
            prop.position,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    fn translate(rule: &str) -> RuleTranslationResult {
        RuleTranslator::new().translate_at(rule, NOW).unwrap()
    }

    #[test]
    fn test_simple_rule() {
        let result = translate("file: every 10s | path matches \"/src/*\" and length > 1KB | echo -msg hi");
        assert_eq!(
            result.sql_statements,
            vec!["SELECT path FROM file WHERE (path LIKE '/src/%' AND length > 1024)".to_string()]
        );
        assert_eq!(result.ret_sql_index, 0);
        assert_eq!(result.path_patterns, vec!["/src/*".to_string()]);
        assert_eq!(result.schedule_info, ScheduleInfo::periodic(10_000, NOW, ScheduleInfo::FOR_EVER));
        assert_eq!(result.cmd_descriptor.action_name(0), Some("echo"));
    }

    #[test]
    fn test_default_schedule_and_qualified_property() {
        let result = translate("file: file.age > 1d | echo");
        assert_eq!(result.schedule_info.every, ScheduleInfo::DEFAULT_EVERY);
        assert_eq!(
            result.ret_sql(),
            Some("SELECT path FROM file WHERE ($NOW - modification_time) > 86400000")
        );
    }

    #[test]
    fn test_action_implied_condition() {
        let rule = "file: path matches \"/data/*\" | allssd";
        let result = translate(rule);
        assert_eq!(
            result.ret_sql(),
            Some("SELECT path FROM file WHERE (storage_policy <> 'ALL_SSD' AND path LIKE '/data/%')")
        );

        let cache = translate("file: length > 0 | cache");
        assert_eq!(
            cache.ret_sql(),
            Some("SELECT path FROM file WHERE ((NOT fid IN (SELECT fid FROM cached_file)) AND length > 0)")
        );

        let sync = translate("file: path matches \"/a/*\" | sync -dest /b");
        assert_eq!(
            sync.ret_sql(),
            Some("SELECT path FROM file WHERE (path IN (SELECT src FROM file_diff WHERE state = 0) AND path LIKE '/a/%')")
        );

        // 多个 action 不追加条件
        let multi = translate("file: length > 0 | cache ; echo");
        assert_eq!(multi.ret_sql(), Some("SELECT path FROM file WHERE length > 0"));
    }

    #[test]
    fn test_ec_implied_condition_uses_policy_argument() {
        let result = translate("file: length > 0 | ec -policy XOR-2-1-1024k");
        assert_eq!(
            result.ret_sql(),
            Some("SELECT path FROM file WHERE (ec_policy <> 'XOR-2-1-1024k' AND length > 0)")
        );

        let translator = RuleTranslator::new().with_default_ec_policy("RS-3-2-1024k");
        let result = translator.translate_at("file: length > 0 | ec", NOW).unwrap();
        assert!(result.ret_sql().unwrap().contains("ec_policy <> 'RS-3-2-1024k'"));
    }

    #[test]
    fn test_access_count_statements() {
        let result = translate("file: accessCount(10min) > 3 and accessCountTop(10min, 5) | echo");
        assert_eq!(result.sql_statements.len(), 3);
        assert_eq!(
            result.sql_statements[0],
            "$@genVirtualAccessCountTable(accessCount_600000)"
        );
        assert_eq!(
            result.sql_statements[1],
            "$@genVirtualAccessCountTableTopValue(accessCountTop_600000_5)"
        );
        assert_eq!(result.ret_sql_index, 2);

        let table_param = result.parameter("accessCount_600000").unwrap();
        assert_eq!(table_param.args, vec![600_000]);
        assert!(table_param.table.starts_with("accessCount_0_600000_view_"));

        let top = result.parameter("accessCountTop_600000_5").unwrap();
        assert_eq!(top.table, table_param.table);
        assert_eq!(top.variable.as_deref(), Some("accessCountTop_600000_5_value"));

        let ret = result.ret_sql().unwrap();
        let table = &table_param.table;
        assert_eq!(
            ret,
            format!(
                "SELECT path FROM file WHERE (COALESCE((SELECT count FROM {t} WHERE {t}.fid = file.fid), 0) > 3 \
                 AND fid IN (SELECT fid FROM {t} WHERE count >= $accessCountTop_600000_5_value))",
                t = table
            )
        );
    }

    #[test]
    fn test_schedule_forms() {
        let once = translate("file: at now + 1min | length > 0 | echo");
        assert_eq!(once.schedule_info, ScheduleInfo::one_shot(NOW + 60_000));

        let bounded = translate("file: every 1s from now to now + 1h | length > 0 | echo");
        assert_eq!(bounded.schedule_info, ScheduleInfo::periodic(1000, NOW, NOW + 3_600_000));

        let err = RuleTranslator::new()
            .translate_at("file: every 1s from now to now - 1h | length > 0 | echo", NOW)
            .unwrap_err();
        assert!(err.message.contains("earlier than start"));
    }

    #[test]
    fn test_translation_errors() {
        let translator = RuleTranslator::new();
        let err = translator.translate_at("file: color > 1 | echo", NOW).unwrap_err();
        assert_eq!(err.message, "Unknown property 'color'");

        let err = translator.translate_at("file: accessCount > 1 | echo", NOW).unwrap_err();
        assert!(err.message.contains("expects 1 parameter(s), got 0"));

        let err = translator.translate_at("file: length > \"big\" | echo", NOW).unwrap_err();
        assert!(err.message.contains("Type mismatch"));

        let err = translator.translate_at("file: length > 0 |", NOW).unwrap_err();
        assert_eq!(err.message, "No cmdlet specified in Rule");

        let err = translator.translate_at("file: length | echo", NOW).unwrap_err();
        assert!(err.message.contains("not a boolean"));
    }

    #[test]
    fn test_translation_is_deterministic_apart_from_table_names() {
        let rule = "file: every 5s | path matches \"/x/*\" and mtime < now - 1d | echo";
        let a = translate(rule);
        let b = translate(rule);
        assert_eq!(a.sql_statements, b.sql_statements);
        assert_eq!(a.path_patterns, b.path_patterns);
        assert_eq!(a.cmd_descriptor, b.cmd_descriptor);
    }
}
