// ==========================================
// 铁路容量分配系统 - 行映射编解码工具
// ==========================================
// 职责: JSON 列、日期/时间戳列、枚举列的统一编解码, IN 子句构建
// 约定: 列表字段存 JSON 文本; 日期 %Y-%m-%d; 时间戳 %Y-%m-%d %H:%M:%S
// ==========================================

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::Type;
use serde::{de::DeserializeOwned, Serialize};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

/// 序列化为 JSON 文本 (写入)
pub fn to_json<T: Serialize + ?Sized>(value: &T) -> rusqlite::Result<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

/// 从 JSON 列反序列化 (读取), 失败时报告列号
pub fn from_json<T: DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| conversion_error(idx, e.to_string()))
}

pub fn format_ts(ts: &NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

pub fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, TS_FORMAT)
        .map_err(|e| conversion_error(idx, format!("时间戳格式错误 '{}': {}", raw, e)))
}

pub fn format_date(date: &NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_date(idx: usize, raw: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|e| conversion_error(idx, format!("日期格式错误 '{}': {}", raw, e)))
}

/// 枚举列解析: parser 返回 None 时转为转换错误
pub fn parse_enum<T>(idx: usize, raw: &str, parser: impl Fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    parser(raw).ok_or_else(|| conversion_error(idx, format!("未知枚举值: {}", raw)))
}

/// 构建 IN 子句; 空列表返回永假条件
pub fn build_in_clause<T: AsRef<str>>(column_name: &str, values: &[T]) -> String {
    if values.is_empty() {
        return "1 = 0".to_string();
    }
    let placeholders = values.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
    format!("{} IN ({})", column_name, placeholders)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_in_clause() {
        assert_eq!(build_in_clause("pot_id", &["a", "b"]), "pot_id IN (?, ?)");
        let empty: Vec<String> = vec![];
        assert_eq!(build_in_clause("pot_id", &empty), "1 = 0");
    }

    #[test]
    fn test_bad_json_reports_column() {
        let err = from_json::<Vec<String>>(4, "not json").unwrap_err();
        assert!(matches!(err, rusqlite::Error::FromSqlConversionFailure(4, _, _)));
    }
}
