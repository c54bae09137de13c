use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;

use crate::query::{DEFAULT_PAGE_SIZE, QueryState, SortDirection};

#[derive(Parser, Clone, Debug)]
pub struct CliParams {
    /// Dataset endpoint returning {code, msg, data} JSON or a bare array
    #[clap(long = "endpoint", env = "TREND_DESK_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Local CSV file to load instead of an endpoint
    #[clap(long = "csv", value_name = "PATH")]
    pub csv: Option<PathBuf>,

    /// Fall back to the built-in sample table when loading fails
    #[clap(long = "allow-sample")]
    pub allow_sample: bool,

    /// Rows per page in the table view
    #[clap(long = "page-size", default_value_t = DEFAULT_PAGE_SIZE,
           value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    pub page_size: usize,

    /// Initial sort in format FIELD or FIELD:asc / FIELD:desc
    #[clap(long = "sort", value_name = "FIELD[:DIR]")]
    pub sort: Option<SortSpec>,

    /// Numeric column for the summary cards (default: first numeric column)
    #[clap(long = "summary-field", value_name = "FIELD")]
    pub summary_field: Option<String>,

    /// Re-fetch the dataset on this interval (e.g., 30s, 5m); off when unset
    #[clap(long = "refresh", value_name = "DURATION")]
    pub refresh: Option<DurationSpec>,

    /// Where failures are appended as JSONL
    #[clap(long = "error-log", value_name = "PATH")]
    pub error_log: Option<PathBuf>,
}

/// 启动时从哪里取数。优先接口，其次文件，最后内置演示数据。
#[derive(Debug, Clone)]
pub enum DatasetSpec {
    Endpoint(String),
    CsvFile(PathBuf),
    Sample,
}

impl CliParams {
    pub fn dataset_spec(&self) -> DatasetSpec {
        if let Some(endpoint) = self.endpoint.as_deref() {
            let trimmed = endpoint.trim();
            if !trimmed.is_empty() {
                return DatasetSpec::Endpoint(trimmed.to_string());
            }
        }
        if let Some(path) = &self.csv {
            return DatasetSpec::CsvFile(path.clone());
        }
        DatasetSpec::Sample
    }

    /// 没配接口也没配文件时，演示数据就是正常来源，无须显式允许。
    pub fn sample_fallback_allowed(&self) -> bool {
        self.allow_sample || matches!(self.dataset_spec(), DatasetSpec::Sample)
    }

    pub fn initial_query_state(&self) -> QueryState {
        let (sort_field, sort_direction) = match &self.sort {
            Some(spec) => (Some(spec.field.clone()), spec.direction),
            None => (None, SortDirection::Ascending),
        };
        QueryState {
            sort_field,
            sort_direction,
            page_size: self.page_size,
            ..QueryState::default()
        }
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        self.refresh.map(|spec| spec.as_duration())
    }
}

#[derive(Clone, Debug)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

impl FromStr for SortSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(2, ':');
        let field = parts
            .next()
            .map(str::trim)
            .filter(|field| !field.is_empty())
            .ok_or_else(|| "sort spec 必须包含字段名".to_string())?;
        let direction = match parts.next() {
            Some(dir) => dir.parse::<SortDirection>().map_err(|err| err.to_string())?,
            None => SortDirection::Ascending,
        };
        Ok(SortSpec {
            field: field.to_string(),
            direction,
        })
    }
}

#[derive(Copy, Clone, Debug)]
pub struct DurationSpec(Duration);

impl DurationSpec {
    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl FromStr for DurationSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err("duration 不能为空 (示例: 30s, 5m, 1h)".to_string());
        }
        let split_idx = trimmed
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(|| "duration 必须带单位 s / m / h / d".to_string())?;
        if split_idx == 0 {
            return Err("duration 必须以数字开头 (示例: 30s, 5m)".to_string());
        }
        let (value_part, unit_part) = trimmed.split_at(split_idx);
        let value: f64 = value_part
            .parse()
            .map_err(|_| format!("duration `{trimmed}` 的数值部分无法解析"))?;
        let multiplier = match unit_part.trim().to_lowercase().as_str() {
            "s" | "sec" | "secs" => 1.0,
            "m" | "min" | "mins" => 60.0,
            "h" | "hr" | "hrs" => 3_600.0,
            "d" | "day" | "days" => 86_400.0,
            other => return Err(format!("不支持的时间单位 `{other}` (用 s, m, h, d)")),
        };
        let seconds = value * multiplier;
        if !seconds.is_finite() || seconds <= 0.0 {
            return Err(format!("duration 必须为正: `{trimmed}`"));
        }
        Ok(DurationSpec(Duration::from_secs_f64(seconds)))
    }
}
