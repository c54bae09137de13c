use std::collections::BTreeMap;

use crate::query::{self, QueryError, QueryResult, QueryState, SortDirection};
use crate::record::{Record, Value};

/// 对 QueryState 的局部更新；未给出的字段保持原值。
///
/// `sort_field` is doubly optional so a patch can clear the sort as well as
/// leave it untouched.
#[derive(Debug, Clone, Default)]
pub struct QueryPatch {
    pub search_text: Option<String>,
    pub field_filters: Option<BTreeMap<String, Value>>,
    pub sort_field: Option<Option<String>>,
    pub sort_direction: Option<SortDirection>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

/// 持有当前数据快照与查询状态的唯一写入点。
///
/// One store per table view; snapshots are replaced wholesale by [`load`]
/// and never merged incrementally. Not designed for concurrent mutation.
///
/// [`load`]: RecordStore::load
#[derive(Debug, Clone)]
pub struct RecordStore {
    snapshot: Vec<Record>,
    state: QueryState,
}

impl RecordStore {
    pub fn new(state: QueryState) -> Result<Self, QueryError> {
        if state.page_size == 0 {
            return Err(QueryError::InvalidPageSize);
        }
        Ok(RecordStore {
            snapshot: Vec::new(),
            state,
        })
    }

    /// 整体替换快照并回到第一页。字段是否同构由调用方保证。
    pub fn load(&mut self, records: Vec<Record>) {
        self.snapshot = records;
        self.state.page = 1;
    }

    /// 合并局部更新，然后把页码夹回有效范围（过滤可能把结果集
    /// 缩到当前页之前）。失败时状态保持不变。
    pub fn set_query(&mut self, patch: QueryPatch) -> Result<(), QueryError> {
        if patch.page_size == Some(0) {
            return Err(QueryError::InvalidPageSize);
        }
        if let Some(search_text) = patch.search_text {
            self.state.search_text = search_text;
        }
        if let Some(field_filters) = patch.field_filters {
            self.state.field_filters = field_filters;
        }
        if let Some(sort_field) = patch.sort_field {
            self.state.sort_field = sort_field;
        }
        if let Some(sort_direction) = patch.sort_direction {
            self.state.sort_direction = sort_direction;
        }
        if let Some(page) = patch.page {
            self.state.page = page;
        }
        if let Some(page_size) = patch.page_size {
            self.state.page_size = page_size;
        }
        self.clamp_page()
    }

    /// 当前可见切片；纯读取，无副作用。
    pub fn current_view(&self) -> Result<QueryResult, QueryError> {
        query::query(&self.snapshot, &self.state)
    }

    pub fn state(&self) -> &QueryState {
        &self.state
    }

    pub fn snapshot(&self) -> &[Record] {
        &self.snapshot
    }

    /// 过滤与搜索命中的全部记录，保持加载顺序（汇总卡片在整个
    /// 过滤集上计算，不受分页和排序影响）。
    pub fn matched_records(&self) -> Result<Vec<Record>, QueryError> {
        let unpaged = QueryState {
            page: 1,
            page_size: self.snapshot.len().max(1),
            sort_field: None,
            ..self.state.clone()
        };
        Ok(query::query(&self.snapshot, &unpaged)?.visible_records)
    }

    fn clamp_page(&mut self) -> Result<(), QueryError> {
        let first_page = QueryState {
            page: 1,
            ..self.state.clone()
        };
        let total_pages = query::query(&self.snapshot, &first_page)?.total_pages;
        self.state.page = self.state.page.clamp(1, total_pages.max(1));
        Ok(())
    }
}
