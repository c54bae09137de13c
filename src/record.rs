use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 单元格的取值：字符串、数字或空。
///
/// Numbers are always `f64`; JSON integers are widened on deserialization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Value {
    Null,
    Number(f64),
    Text(String),
}

impl Value {
    pub fn text(value: impl Into<String>) -> Self {
        Value::Text(value.into())
    }

    pub fn number(value: f64) -> Self {
        Value::Number(value)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    /// 数字取值：`Number` 直接返回，数字形式的字符串按 parse 处理。
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(number) => Some(*number),
            Value::Text(text) => text.trim().parse().ok(),
            Value::Null => None,
        }
    }

    /// Numeric sort key. Values that do not parse as numbers rank as
    /// negative infinity (first ascending, last descending); they are
    /// never coerced to zero and never dropped.
    pub fn sort_key_f64(&self) -> f64 {
        self.as_f64().unwrap_or(f64::NEG_INFINITY)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Number(number) => {
                Value::Number(number.as_f64().unwrap_or(f64::NEG_INFINITY))
            }
            serde_json::Value::String(text) => Value::Text(text),
            serde_json::Value::Bool(flag) => Value::Text(flag.to_string()),
            other => Value::Text(other.to_string()),
        }
    }
}

/// 一行记录：字段名到取值的扁平映射（一支股票、一个热点、一家公司）。
///
/// Within one loaded snapshot every record is expected to carry the same
/// field set; this is not validated, and a missing field simply renders
/// blank downstream.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Record {
            fields: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// 遍历所有字符串字段值（搜索匹配用）。
    pub fn text_values(&self) -> impl Iterator<Item = &str> {
        self.fields.values().filter_map(Value::as_str)
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Record {
            fields: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_numeric_parsing() {
        assert_eq!(Value::number(3.5).as_f64(), Some(3.5));
        assert_eq!(Value::text(" 12.8 ").as_f64(), Some(12.8));
        assert_eq!(Value::text("未知").as_f64(), None);
        assert_eq!(Value::Null.as_f64(), None);
    }

    #[test]
    fn test_unparseable_sort_key_is_negative_infinity() {
        // 不可解析的值排序时排在最前（升序），而不是被当成 0
        assert_eq!(Value::text("--").sort_key_f64(), f64::NEG_INFINITY);
        assert_eq!(Value::number(0.0).sort_key_f64(), 0.0);
    }

    #[test]
    fn test_json_round_trip() {
        let mut record = Record::new();
        record.set("code", Value::text("600519"));
        record.set("close", Value::number(1688.0));
        record.set("note", Value::Null);
        let payload = serde_json::to_string(&record).unwrap();
        let decoded: Record = serde_json::from_str(&payload).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.get("close").unwrap().as_f64(), Some(1688.0));
        assert!(decoded.get("note").unwrap().is_null());
    }
}
