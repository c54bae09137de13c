use crate::record::Record;

const TREND_FLAT_RATIO: f64 = 0.01;

/// 对一个数字字段的汇总（概览卡片用）。
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSummary {
    pub count: usize,
    pub sum: f64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// 总体标准差（除以 count 而不是 count-1）。
    pub std_dev: f64,
}

/// Summarizes the numeric values of `field` over the given records.
/// Values that are null, missing, or unparseable are skipped; when no
/// numeric value remains the result is `None` — "没有数据" is distinct
/// from "全为 0".
pub fn compute_aggregate(records: &[Record], field: &str) -> Option<FieldSummary> {
    let values: Vec<f64> = records
        .iter()
        .filter_map(|record| record.get(field))
        .filter_map(|value| value.as_f64())
        .collect();
    if values.is_empty() {
        return None;
    }
    let count = values.len();
    let sum: f64 = values.iter().sum();
    let mean = sum / count as f64;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for &value in &values {
        min = min.min(value);
        max = max.max(value);
    }
    let variance = values
        .iter()
        .map(|value| {
            let diff = value - mean;
            diff * diff
        })
        .sum::<f64>()
        / count as f64;
    Some(FieldSummary {
        count,
        sum,
        mean,
        min,
        max,
        std_dev: variance.sqrt(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Rising,
    Falling,
    Flat,
}

impl Trend {
    pub fn label(&self) -> &'static str {
        match self {
            Trend::Rising => "上涨",
            Trend::Falling => "下跌",
            Trend::Flat => "震荡",
        }
    }
}

/// 粗粒度趋势判断：比较序列前后两半的均值，相对变化不超过 1% 视为震荡。
/// 序列不足两个点时无趋势可言，返回 `None`。
pub fn classify_trend(values: &[f64]) -> Option<Trend> {
    if values.len() < 2 {
        return None;
    }
    let mid = values.len() / 2;
    let first = values[..mid].iter().sum::<f64>() / mid as f64;
    let second = values[mid..].iter().sum::<f64>() / (values.len() - mid) as f64;
    let base = first.abs().max(f64::EPSILON);
    let ratio = (second - first) / base;
    if ratio > TREND_FLAT_RATIO {
        Some(Trend::Rising)
    } else if ratio < -TREND_FLAT_RATIO {
        Some(Trend::Falling)
    } else {
        Some(Trend::Flat)
    }
}
