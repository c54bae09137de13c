use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::str::FromStr;

use thiserror::Error;

use crate::record::{Record, Value};

pub const DEFAULT_PAGE_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl Default for SortDirection {
    fn default() -> Self {
        SortDirection::Ascending
    }
}

impl SortDirection {
    pub fn toggled(self) -> Self {
        match self {
            SortDirection::Ascending => SortDirection::Descending,
            SortDirection::Descending => SortDirection::Ascending,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SortDirection::Ascending => "升序",
            SortDirection::Descending => "降序",
        }
    }
}

impl FromStr for SortDirection {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" | "升序" => Ok(SortDirection::Ascending),
            "desc" | "descending" | "降序" => Ok(SortDirection::Descending),
            other => Err(QueryError::UnknownSortDirection(other.to_string())),
        }
    }
}

/// 当前查询参数：搜索词、字段过滤、排序、分页。
///
/// Owned by the caller and passed by value into [`query`]; the engine keeps
/// no state of its own.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState {
    pub search_text: String,
    pub field_filters: BTreeMap<String, Value>,
    pub sort_field: Option<String>,
    pub sort_direction: SortDirection,
    pub page: usize,
    pub page_size: usize,
}

impl Default for QueryState {
    fn default() -> Self {
        QueryState {
            search_text: String::new(),
            field_filters: BTreeMap::new(),
            sort_field: None,
            sort_direction: SortDirection::Ascending,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// 查询结果：可见切片加分页元数据。
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub visible_records: Vec<Record>,
    pub total_matched: usize,
    pub total_pages: usize,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("page size 必须大于 0")]
    InvalidPageSize,
    #[error("未知的排序方向: {0} (可用: asc, desc)")]
    UnknownSortDirection(String),
}

/// Applies a query to a snapshot. Stages run in a fixed order: field
/// filters, then text search, then a stable sort, then the page slice.
/// Filters are conjunctive; `total_matched`/`total_pages` always describe
/// the full filtered set, so an out-of-range `page` yields an empty slice
/// with correct metadata rather than an error.
pub fn query(records: &[Record], state: &QueryState) -> Result<QueryResult, QueryError> {
    if state.page_size == 0 {
        return Err(QueryError::InvalidPageSize);
    }

    let mut matched: Vec<&Record> = records
        .iter()
        .filter(|record| matches_filters(record, &state.field_filters))
        .filter(|record| matches_search(record, &state.search_text))
        .collect();

    if let Some(field) = state.sort_field.as_deref() {
        sort_records(&mut matched, field, state.sort_direction);
    }

    let total_matched = matched.len();
    let total_pages = total_matched.div_ceil(state.page_size);
    let start = state.page.saturating_sub(1).saturating_mul(state.page_size);
    let visible_records = if start >= total_matched {
        Vec::new()
    } else {
        let end = (start + state.page_size).min(total_matched);
        matched[start..end].iter().map(|record| (*record).clone()).collect()
    };

    Ok(QueryResult {
        visible_records,
        total_matched,
        total_pages,
    })
}

/// 字段过滤：全部命中才保留；记录缺少该字段视为不命中。
fn matches_filters(record: &Record, filters: &BTreeMap<String, Value>) -> bool {
    filters
        .iter()
        .all(|(field, expected)| record.get(field) == Some(expected))
}

/// 搜索：任一字符串字段包含搜索词（忽略大小写）即命中。
fn matches_search(record: &Record, search_text: &str) -> bool {
    if search_text.is_empty() {
        return true;
    }
    let needle = search_text.to_lowercase();
    record
        .text_values()
        .any(|text| text.to_lowercase().contains(&needle))
}

fn sort_records(records: &mut [&Record], field: &str, direction: SortDirection) {
    // 有任一取值能按数字解析就按数字排；否则按字符串排。
    let numeric = records
        .iter()
        .any(|record| record.get(field).is_some_and(|value| value.as_f64().is_some()));
    // sort_by 是稳定排序：比较相等的记录保持过滤后的相对顺序
    records.sort_by(|a, b| {
        let ordering = if numeric {
            compare_numeric(a.get(field), b.get(field))
        } else {
            compare_text(a.get(field), b.get(field))
        };
        match direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    });
}

fn compare_numeric(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let left = a.map(Value::sort_key_f64).unwrap_or(f64::NEG_INFINITY);
    let right = b.map(Value::sort_key_f64).unwrap_or(f64::NEG_INFINITY);
    left.total_cmp(&right)
}

/// 字符串比较：逐字符按小写形式比较，相等时退回原始字节序作为决胜。
/// std 没有 locale collation；对本框架的中英混排字段这一近似已足够。
fn compare_text(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let left = a.and_then(Value::as_str).unwrap_or("");
    let right = b.and_then(Value::as_str).unwrap_or("");
    let folded = left
        .chars()
        .flat_map(char::to_lowercase)
        .cmp(right.chars().flat_map(char::to_lowercase));
    match folded {
        Ordering::Equal => left.cmp(right),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs
            .iter()
            .map(|(field, value)| (field.to_string(), value.clone()))
            .collect()
    }

    fn score_records() -> Vec<Record> {
        vec![
            record(&[("code", Value::text("A")), ("score", Value::number(70.0))]),
            record(&[("code", Value::text("B")), ("score", Value::number(90.0))]),
            record(&[("code", Value::text("C")), ("score", Value::number(50.0))]),
        ]
    }

    #[test]
    fn test_score_desc_first_page() {
        // 按 score 降序取第一页，每页两条
        let records = score_records();
        let state = QueryState {
            sort_field: Some("score".to_string()),
            sort_direction: SortDirection::Descending,
            page: 1,
            page_size: 2,
            ..QueryState::default()
        };
        let result = query(&records, &state).unwrap();
        assert_eq!(result.total_matched, 3);
        assert_eq!(result.total_pages, 2);
        let codes: Vec<_> = result
            .visible_records
            .iter()
            .map(|r| r.get("code").unwrap().as_str().unwrap().to_string())
            .collect();
        assert_eq!(codes, vec!["B", "A"]);
    }

    #[test]
    fn test_field_filter_exact_match() {
        let records = score_records();
        let mut state = QueryState::default();
        state
            .field_filters
            .insert("score".to_string(), Value::number(90.0));
        let result = query(&records, &state).unwrap();
        assert_eq!(result.total_matched, 1);
        assert_eq!(
            result.visible_records[0].get("code").unwrap().as_str(),
            Some("B")
        );
    }

    #[test]
    fn test_filter_monotonicity() {
        // 追加过滤条件只会缩小结果集
        let records = score_records();
        let mut state = QueryState::default();
        let before = query(&records, &state).unwrap().total_matched;
        state
            .field_filters
            .insert("code".to_string(), Value::text("A"));
        let after = query(&records, &state).unwrap().total_matched;
        assert!(after <= before);
        state
            .field_filters
            .insert("score".to_string(), Value::number(50.0));
        let narrower = query(&records, &state).unwrap().total_matched;
        assert!(narrower <= after);
        assert_eq!(narrower, 0);
    }

    #[test]
    fn test_filter_on_absent_field_excludes() {
        let records = score_records();
        let mut state = QueryState::default();
        state
            .field_filters
            .insert("sector".to_string(), Value::text("金融"));
        assert_eq!(query(&records, &state).unwrap().total_matched, 0);
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let records = vec![record(&[("name", Value::text("Apple Inc"))])];
        let state = QueryState {
            search_text: "apple".to_string(),
            ..QueryState::default()
        };
        assert_eq!(query(&records, &state).unwrap().total_matched, 1);
    }

    #[test]
    fn test_empty_search_keeps_all() {
        let records = score_records();
        let state = QueryState::default();
        assert_eq!(query(&records, &state).unwrap().total_matched, 3);
    }

    #[test]
    fn test_search_ignores_numeric_fields() {
        // 搜索只扫字符串字段，数字字段不参与
        let records = score_records();
        let state = QueryState {
            search_text: "90".to_string(),
            ..QueryState::default()
        };
        assert_eq!(query(&records, &state).unwrap().total_matched, 0);
    }

    #[test]
    fn test_sort_is_stable() {
        let records = vec![
            record(&[("k", Value::number(1.0)), ("i", Value::text("a"))]),
            record(&[("k", Value::number(1.0)), ("i", Value::text("b"))]),
            record(&[("k", Value::number(2.0)), ("i", Value::text("c"))]),
        ];
        let state = QueryState {
            sort_field: Some("k".to_string()),
            page_size: 10,
            ..QueryState::default()
        };
        let result = query(&records, &state).unwrap();
        let order: Vec<_> = result
            .visible_records
            .iter()
            .map(|r| r.get("i").unwrap().as_str().unwrap().to_string())
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_unparseable_values_rank_first_ascending() {
        let records = vec![
            record(&[("code", Value::text("X")), ("pe", Value::text("--"))]),
            record(&[("code", Value::text("Y")), ("pe", Value::number(12.0))]),
            record(&[("code", Value::text("Z")), ("pe", Value::number(-3.0))]),
        ];
        let state = QueryState {
            sort_field: Some("pe".to_string()),
            page_size: 10,
            ..QueryState::default()
        };
        let result = query(&records, &state).unwrap();
        let codes: Vec<_> = result
            .visible_records
            .iter()
            .map(|r| r.get("code").unwrap().as_str().unwrap().to_string())
            .collect();
        // "--" 不可解析，升序时排在最前，不会被丢掉
        assert_eq!(codes, vec!["X", "Z", "Y"]);
    }

    #[test]
    fn test_text_sort_case_insensitive() {
        let records = vec![
            record(&[("name", Value::text("banana"))]),
            record(&[("name", Value::text("Apple"))]),
            record(&[("name", Value::text("cherry"))]),
        ];
        let state = QueryState {
            sort_field: Some("name".to_string()),
            page_size: 10,
            ..QueryState::default()
        };
        let result = query(&records, &state).unwrap();
        let names: Vec<_> = result
            .visible_records
            .iter()
            .map(|r| r.get("name").unwrap().as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["Apple", "banana", "cherry"]);
    }

    #[test]
    fn test_pagination_covers_everything_exactly_once() {
        let records: Vec<Record> = (0..23)
            .map(|idx| {
                record(&[
                    ("code", Value::text(format!("{idx:04}"))),
                    ("rank", Value::number(idx as f64)),
                ])
            })
            .collect();
        let mut state = QueryState {
            sort_field: Some("rank".to_string()),
            page_size: 5,
            ..QueryState::default()
        };
        let first = query(&records, &state).unwrap();
        assert_eq!(first.total_pages, 5);
        let mut seen = Vec::new();
        for page in 1..=first.total_pages {
            state.page = page;
            let result = query(&records, &state).unwrap();
            seen.extend(result.visible_records);
        }
        // 拼接每一页应恰好还原整个排序后的结果集
        assert_eq!(seen.len(), 23);
        for (idx, item) in seen.iter().enumerate() {
            assert_eq!(item.get("rank").unwrap().as_f64(), Some(idx as f64));
        }
    }

    #[test]
    fn test_page_beyond_range_yields_empty_slice() {
        let records = score_records();
        let state = QueryState {
            page: 9,
            page_size: 2,
            ..QueryState::default()
        };
        let result = query(&records, &state).unwrap();
        assert!(result.visible_records.is_empty());
        assert_eq!(result.total_matched, 3);
        assert_eq!(result.total_pages, 2);
    }

    #[test]
    fn test_empty_snapshot_is_valid() {
        let result = query(&[], &QueryState::default()).unwrap();
        assert_eq!(result.total_matched, 0);
        assert_eq!(result.total_pages, 0);
        assert!(result.visible_records.is_empty());
    }

    #[test]
    fn test_zero_page_size_is_rejected() {
        let state = QueryState {
            page_size: 0,
            ..QueryState::default()
        };
        assert_eq!(
            query(&score_records(), &state),
            Err(QueryError::InvalidPageSize)
        );
    }

    #[test]
    fn test_sort_direction_parsing() {
        assert_eq!(
            "desc".parse::<SortDirection>().unwrap(),
            SortDirection::Descending
        );
        assert_eq!(
            "ASC".parse::<SortDirection>().unwrap(),
            SortDirection::Ascending
        );
        assert!(matches!(
            "sideways".parse::<SortDirection>(),
            Err(QueryError::UnknownSortDirection(_))
        ));
    }
}
