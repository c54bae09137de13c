use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use once_cell::sync::Lazy;
use reqwest::{Client, ClientBuilder};
use serde::Deserialize;

use crate::record::{Record, Value};

/// 数据来自哪里。回退到演示数据必须让用户看得见，
/// 绝不能和实时数据混为一谈。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataOrigin {
    Live,
    File,
    Sample,
}

impl DataOrigin {
    pub fn label(&self) -> &'static str {
        match self {
            DataOrigin::Live => "实时",
            DataOrigin::File => "文件",
            DataOrigin::Sample => "演示",
        }
    }
}

/// 一次加载得到的完整数据集：列顺序、记录、来源。
#[derive(Debug, Clone)]
pub struct Dataset {
    pub name: String,
    pub columns: Vec<String>,
    pub records: Vec<Record>,
    pub origin: DataOrigin,
}

#[derive(Debug, Deserialize)]
struct DatasetResponse {
    code: String,
    msg: String,
    #[serde(default)]
    fields: Option<Vec<String>>,
    #[serde(default)]
    data: Vec<serde_json::Map<String, serde_json::Value>>,
}

pub struct DatasetFetcher {
    http: Client,
}

impl DatasetFetcher {
    pub fn new() -> Result<Self> {
        let http = ClientBuilder::new()
            .connect_timeout(Duration::from_secs(5))
            .read_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(20))
            .build()?;
        Ok(DatasetFetcher { http })
    }

    /// 从接口拉取一个数据集。接受 `{code, msg, data}` 信封或裸 JSON
    /// 数组（静态文件两种形式都有）。
    pub async fn fetch(&self, endpoint: &str) -> Result<Dataset> {
        let payload: serde_json::Value = self
            .http
            .get(endpoint)
            .send()
            .await
            .with_context(|| format!("请求 {endpoint} 失败"))?
            .error_for_status()
            .with_context(|| format!("{endpoint} 响应状态异常"))?
            .json()
            .await
            .with_context(|| format!("解析 {endpoint} 响应失败"))?;
        dataset_from_json(endpoint, payload)
    }
}

fn dataset_from_json(endpoint: &str, payload: serde_json::Value) -> Result<Dataset> {
    let (fields, rows) = match payload {
        serde_json::Value::Array(rows) => (None, collect_rows(rows)?),
        envelope @ serde_json::Value::Object(_) => {
            let response: DatasetResponse = serde_json::from_value(envelope)
                .with_context(|| format!("解析 {endpoint} 数据信封失败"))?;
            if response.code != "0" {
                return Err(anyhow!(
                    "{} 接口返回错误 (code {}): {}",
                    endpoint,
                    response.code,
                    response.msg
                ));
            }
            (response.fields, response.data)
        }
        other => {
            return Err(anyhow!("{endpoint} 返回了意外的 JSON 形态: {other}"));
        }
    };
    let records: Vec<Record> = rows
        .into_iter()
        .map(|row| {
            row.into_iter()
                .map(|(field, value)| (field, Value::from(value)))
                .collect()
        })
        .collect();
    let columns = fields.unwrap_or_else(|| infer_columns(&records));
    Ok(Dataset {
        name: endpoint.to_string(),
        columns,
        records,
        origin: DataOrigin::Live,
    })
}

fn collect_rows(
    rows: Vec<serde_json::Value>,
) -> Result<Vec<serde_json::Map<String, serde_json::Value>>> {
    rows.into_iter()
        .map(|row| match row {
            serde_json::Value::Object(map) => Ok(map),
            other => Err(anyhow!("数据行必须是 JSON 对象: {other}")),
        })
        .collect()
}

fn infer_columns(records: &[Record]) -> Vec<String> {
    records
        .first()
        .map(|record| record.field_names().map(str::to_string).collect())
        .unwrap_or_default()
}

/// 读取本地 CSV 文件为数据集。
pub fn load_csv_file(path: impl AsRef<Path>) -> Result<Dataset> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("读取 {} 失败", path.display()))?;
    let (columns, records) = parse_csv(&text)?;
    Ok(Dataset {
        name: path.display().to_string(),
        columns,
        records,
        origin: DataOrigin::File,
    })
}

/// CSV 解析：首行是表头，后续每行一条记录，字段名取表头。
/// 短行缺少的尾部字段补 null，多余的单元格丢弃；空单元格也是 null。
/// 单元格一律保留为字符串，数字比较在查询引擎内按需转换。
pub fn parse_csv(text: &str) -> Result<(Vec<String>, Vec<Record>)> {
    let mut lines = text.lines().filter(|line| !line.trim().is_empty());
    let header_line = lines.next().ok_or_else(|| anyhow!("CSV 缺少表头行"))?;
    let headers: Vec<String> = split_csv_line(header_line)
        .into_iter()
        .map(|cell| cell.trim().to_string())
        .collect();
    if headers.is_empty() {
        return Err(anyhow!("CSV 表头为空"));
    }
    let mut records = Vec::new();
    for line in lines {
        let cells = split_csv_line(line);
        let record: Record = headers
            .iter()
            .enumerate()
            .map(|(idx, header)| {
                let value = match cells.get(idx) {
                    Some(cell) if !cell.is_empty() => Value::text(cell.clone()),
                    _ => Value::Null,
                };
                (header.clone(), value)
            })
            .collect();
        records.push(record);
    }
    Ok((headers, records))
}

/// 逗号分隔，支持双引号包裹（含逗号的单元格）与 `""` 转义。
fn split_csv_line(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            ',' if !in_quotes => {
                cells.push(current.trim().to_string());
                current = String::new();
            }
            other => current.push(other),
        }
    }
    cells.push(current.trim().to_string());
    cells
}

const SAMPLE_COLUMNS: [&str; 6] = ["code", "name", "sector", "close", "change_pct", "score"];

static SAMPLE_STOCKS: Lazy<Vec<Record>> = Lazy::new(|| {
    let rows: [(&str, &str, &str, f64, f64, f64); 8] = [
        ("600519", "贵州茅台", "白酒", 1688.00, 1.24, 86.0),
        ("000858", "五粮液", "白酒", 148.90, -0.52, 78.0),
        ("601318", "中国平安", "保险", 52.30, 0.87, 71.0),
        ("600036", "招商银行", "银行", 38.10, 0.34, 74.0),
        ("601988", "中国银行", "银行", 4.21, -0.24, 63.0),
        ("300750", "宁德时代", "新能源", 187.45, 2.96, 82.0),
        ("002594", "比亚迪", "新能源", 246.10, 1.58, 80.0),
        ("600900", "长江电力", "电力", 27.64, 0.11, 69.0),
    ];
    rows.iter()
        .map(|(code, name, sector, close, change_pct, score)| {
            [
                ("code".to_string(), Value::text(*code)),
                ("name".to_string(), Value::text(*name)),
                ("sector".to_string(), Value::text(*sector)),
                ("close".to_string(), Value::number(*close)),
                ("change_pct".to_string(), Value::number(*change_pct)),
                ("score".to_string(), Value::number(*score)),
            ]
            .into_iter()
            .collect()
        })
        .collect()
});

/// 内置演示数据（管理台的个股评分表）。
pub fn sample_dataset() -> Dataset {
    Dataset {
        name: "内置演示数据".to_string(),
        columns: SAMPLE_COLUMNS.iter().map(|s| s.to_string()).collect(),
        records: SAMPLE_STOCKS.clone(),
        origin: DataOrigin::Sample,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_csv_pads_short_rows() {
        let text = "code,name,close\n600519,贵州茅台,1688\n000858,五粮液\n";
        let (columns, records) = parse_csv(text).unwrap();
        assert_eq!(columns, vec!["code", "name", "close"]);
        assert_eq!(records.len(), 2);
        // 短行缺少的尾部字段补 null
        assert!(records[1].get("close").unwrap().is_null());
        assert_eq!(records[1].get("name").unwrap().as_str(), Some("五粮液"));
    }

    #[test]
    fn test_parse_csv_ignores_extra_cells_and_blank_lines() {
        let text = "code,close\n\n600519,1688,多余的\n";
        let (_, records) = parse_csv(text).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("close").unwrap().as_f64(), Some(1688.0));
        assert!(records[0].get("多余的").is_none());
    }

    #[test]
    fn test_parse_csv_quoted_cells() {
        let text = "name,note\n\"招商银行\",\"稳健, 高股息\"\n";
        let (_, records) = parse_csv(text).unwrap();
        assert_eq!(
            records[0].get("note").unwrap().as_str(),
            Some("稳健, 高股息")
        );
    }

    #[test]
    fn test_parse_csv_without_header_fails() {
        assert!(parse_csv("").is_err());
    }

    #[test]
    fn test_envelope_decoding() {
        let payload: serde_json::Value = serde_json::from_str(
            r#"{"code":"0","msg":"","fields":["code","heat"],
                "data":[{"code":"AI","heat":97},{"code":"芯片","heat":88}]}"#,
        )
        .unwrap();
        let dataset = dataset_from_json("http://test/hotspots", payload).unwrap();
        assert_eq!(dataset.columns, vec!["code", "heat"]);
        assert_eq!(dataset.records.len(), 2);
        assert_eq!(dataset.origin, DataOrigin::Live);
        assert_eq!(dataset.records[0].get("heat").unwrap().as_f64(), Some(97.0));
    }

    #[test]
    fn test_envelope_error_code_is_surfaced() {
        let payload: serde_json::Value =
            serde_json::from_str(r#"{"code":"50011","msg":"rate limited","data":[]}"#).unwrap();
        let err = dataset_from_json("http://test", payload).unwrap_err();
        assert!(err.to_string().contains("50011"));
    }

    #[test]
    fn test_bare_array_payload() {
        let payload: serde_json::Value =
            serde_json::from_str(r#"[{"code":"600519","close":1688.0}]"#).unwrap();
        let dataset = dataset_from_json("stocks.json", payload).unwrap();
        assert_eq!(dataset.records.len(), 1);
        assert!(dataset.columns.contains(&"close".to_string()));
    }

    #[test]
    fn test_sample_dataset_is_homogeneous() {
        let dataset = sample_dataset();
        assert_eq!(dataset.origin, DataOrigin::Sample);
        assert!(!dataset.records.is_empty());
        for record in &dataset.records {
            for column in &dataset.columns {
                assert!(record.get(column).is_some(), "缺少字段 {column}");
            }
        }
    }
}
