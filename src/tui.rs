use std::time::{Duration, Instant};

use anyhow::Result as AnyResult;
use color_eyre::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};
use tokio::sync::broadcast;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::command::Command;
use crate::record::Value;
use crate::source::{DataOrigin, Dataset};
use crate::stats::{classify_trend, compute_aggregate};
use crate::store::{QueryPatch, RecordStore};

const LOADING_SPINNER_FRAMES: [char; 4] = ['|', '/', '-', '\\'];
const MIN_COLUMN_WIDTH: usize = 4;
const MAX_COLUMN_WIDTH: usize = 22;
const STATUS_VISIBLE: Duration = Duration::from_secs(3);
const ERROR_VISIBLE: Duration = Duration::from_secs(5);

/// 正在输入什么。搜索和过滤都走同一条输入行。
enum InputMode {
    Normal,
    Search(String),
    Filter(String),
}

pub struct TuiApp {
    store: RecordStore,
    columns: Vec<String>,
    dataset_name: String,
    origin: Option<DataOrigin>,
    configured_summary_field: Option<String>,
    summary_field: Option<String>,
    input: InputMode,
    sort_cursor: Option<usize>,
    status_message: Option<String>,
    status_visible_until: Option<Instant>,
    status_is_error: bool,
    loading: bool,
    spinner_idx: usize,
    last_draw: Instant,
    min_redraw_gap: Duration,
}

impl TuiApp {
    pub fn new(store: RecordStore, summary_field: Option<String>) -> TuiApp {
        let min_redraw_gap = Duration::from_millis(100);
        TuiApp {
            store,
            columns: Vec::new(),
            dataset_name: String::new(),
            origin: None,
            configured_summary_field: summary_field,
            summary_field: None,
            input: InputMode::Normal,
            sort_cursor: None,
            status_message: None,
            status_visible_until: None,
            status_is_error: false,
            loading: true,
            spinner_idx: 0,
            last_draw: Instant::now() - min_redraw_gap,
            min_redraw_gap,
        }
    }

    pub fn dispose(&self) {
        ratatui::restore();
    }

    fn set_status_message(&mut self, message: impl Into<String>) {
        self.status_message = Some(message.into());
        self.status_visible_until = Some(Instant::now() + STATUS_VISIBLE);
        self.status_is_error = false;
    }

    fn set_error_status_message(&mut self, message: impl Into<String>) {
        self.status_message = Some(message.into());
        self.status_visible_until = Some(Instant::now() + ERROR_VISIBLE);
        self.status_is_error = true;
    }

    fn clear_status_if_expired(&mut self) {
        if let Some(visible_until) = self.status_visible_until {
            if Instant::now() >= visible_until {
                self.status_message = None;
                self.status_visible_until = None;
                self.status_is_error = false;
            }
        }
    }

    /// 新数据集整体替换旧快照；排序游标对准已配置的排序字段。
    fn apply_dataset(&mut self, dataset: Dataset) {
        self.loading = false;
        self.columns = dataset.columns;
        self.dataset_name = dataset.name;
        self.origin = Some(dataset.origin);
        let count = dataset.records.len();
        self.store.load(dataset.records);
        self.sort_cursor = self
            .store
            .state()
            .sort_field
            .as_deref()
            .and_then(|field| self.columns.iter().position(|column| column == field));
        self.resolve_summary_field();
        if dataset.origin == DataOrigin::Sample {
            self.set_error_status_message(format!("当前展示演示数据，共 {count} 条，非实时行情"));
        } else {
            let origin_label = dataset.origin.label();
            self.set_status_message(format!("已加载 {count} 条记录（{origin_label}）"));
        }
    }

    /// 汇总列：优先用配置的列，否则挑第一个能算出汇总的列。
    fn resolve_summary_field(&mut self) {
        if let Some(field) = &self.configured_summary_field {
            self.summary_field = Some(field.clone());
            return;
        }
        self.summary_field = self
            .columns
            .iter()
            .find(|column| compute_aggregate(self.store.snapshot(), column).is_some())
            .cloned();
    }

    fn apply_patch(&mut self, patch: QueryPatch) {
        if let Err(err) = self.store.set_query(patch) {
            self.set_error_status_message(err.to_string());
        }
    }

    fn total_pages(&self) -> usize {
        self.store
            .current_view()
            .map(|view| view.total_pages)
            .unwrap_or(0)
    }

    fn go_to_page(&mut self, page: usize) {
        self.apply_patch(QueryPatch {
            page: Some(page.max(1)),
            ..QueryPatch::default()
        });
    }

    fn cycle_sort_field(&mut self) {
        if self.columns.is_empty() {
            return;
        }
        // 依次轮换各列，转完一圈回到无排序
        let next = match self.sort_cursor {
            None => Some(0),
            Some(idx) if idx + 1 < self.columns.len() => Some(idx + 1),
            Some(_) => None,
        };
        self.sort_cursor = next;
        let sort_field = next.map(|idx| self.columns[idx].clone());
        let label = sort_field.as_deref().unwrap_or("无").to_string();
        self.apply_patch(QueryPatch {
            sort_field: Some(sort_field),
            ..QueryPatch::default()
        });
        self.set_status_message(format!("排序字段: {label}"));
    }

    fn toggle_sort_direction(&mut self) {
        let direction = self.store.state().sort_direction.toggled();
        self.apply_patch(QueryPatch {
            sort_direction: Some(direction),
            ..QueryPatch::default()
        });
        self.set_status_message(format!("排序方向: {}", direction.label()));
    }

    fn adjust_page_size(&mut self, delta: isize) {
        let current = self.store.state().page_size as isize;
        let next = (current + delta).max(1) as usize;
        self.apply_patch(QueryPatch {
            page_size: Some(next),
            ..QueryPatch::default()
        });
        self.set_status_message(format!("每页 {next} 条"));
    }

    fn apply_search(&mut self, text: String) {
        self.apply_patch(QueryPatch {
            search_text: Some(text.clone()),
            page: Some(1),
            ..QueryPatch::default()
        });
        if text.is_empty() {
            self.set_status_message("已清除搜索");
        } else {
            self.set_status_message(format!("搜索: {text}"));
        }
    }

    /// 过滤输入形如 `字段=取值`；空输入清除全部过滤。
    /// 取值先按数字精确匹配；一条都匹配不到时退回按原文匹配，
    /// 兼容 CSV 载入后仍是字符串的数字列。
    fn apply_filter_input(&mut self, input: &str) {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            self.apply_patch(QueryPatch {
                field_filters: Some(Default::default()),
                page: Some(1),
                ..QueryPatch::default()
            });
            self.set_status_message("已清除过滤条件");
            return;
        }
        let Some((field, raw_value)) = trimmed.split_once('=') else {
            self.set_error_status_message("过滤格式: 字段=取值 (如 sector=银行)");
            return;
        };
        let field = field.trim().to_string();
        let raw_value = raw_value.trim();
        match raw_value.parse::<f64>() {
            Ok(number) => {
                self.insert_filter(&field, Value::number(number));
                if self.matched_count() == 0 {
                    self.insert_filter(&field, Value::text(raw_value));
                }
            }
            Err(_) => self.insert_filter(&field, Value::text(raw_value)),
        }
        self.set_status_message(format!("过滤: {field}={raw_value}"));
    }

    fn insert_filter(&mut self, field: &str, value: Value) {
        let mut filters = self.store.state().field_filters.clone();
        filters.insert(field.to_string(), value);
        self.apply_patch(QueryPatch {
            field_filters: Some(filters),
            page: Some(1),
            ..QueryPatch::default()
        });
    }

    fn matched_count(&self) -> usize {
        self.store
            .current_view()
            .map(|view| view.total_matched)
            .unwrap_or(0)
    }

    fn clear_query(&mut self) {
        self.apply_patch(QueryPatch {
            search_text: Some(String::new()),
            field_filters: Some(Default::default()),
            page: Some(1),
            ..QueryPatch::default()
        });
        self.set_status_message("已清除搜索与过滤");
    }

    fn poll_input(&mut self) -> Result<bool> {
        while event::poll(Duration::from_millis(0))? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    if self.handle_key_event(key) {
                        return Ok(true);
                    }
                }
                _ => {}
            }
        }
        Ok(false)
    }

    fn handle_key_event(&mut self, key: KeyEvent) -> bool {
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            return true;
        }
        match &mut self.input {
            InputMode::Search(buffer) | InputMode::Filter(buffer) => {
                match key.code {
                    KeyCode::Enter => {
                        let text = buffer.clone();
                        let is_filter = matches!(self.input, InputMode::Filter(_));
                        self.input = InputMode::Normal;
                        if is_filter {
                            self.apply_filter_input(&text);
                        } else {
                            self.apply_search(text);
                        }
                    }
                    KeyCode::Esc => {
                        self.input = InputMode::Normal;
                    }
                    KeyCode::Backspace => {
                        buffer.pop();
                    }
                    KeyCode::Char(ch) => {
                        buffer.push(ch);
                    }
                    _ => {}
                }
                false
            }
            InputMode::Normal => match key.code {
                KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => true,
                KeyCode::Left | KeyCode::Char('h') | KeyCode::PageUp => {
                    let page = self.store.state().page;
                    self.go_to_page(page.saturating_sub(1));
                    false
                }
                KeyCode::Right | KeyCode::Char('l') | KeyCode::PageDown => {
                    let page = self.store.state().page;
                    self.go_to_page(page + 1);
                    false
                }
                KeyCode::Home => {
                    self.go_to_page(1);
                    false
                }
                KeyCode::End => {
                    let last = self.total_pages().max(1);
                    self.go_to_page(last);
                    false
                }
                KeyCode::Char('/') => {
                    self.input = InputMode::Search(self.store.state().search_text.clone());
                    false
                }
                KeyCode::Char('f') | KeyCode::Char('F') => {
                    self.input = InputMode::Filter(String::new());
                    false
                }
                KeyCode::Char('s') => {
                    self.cycle_sort_field();
                    false
                }
                KeyCode::Char('d') | KeyCode::Char('D') => {
                    self.toggle_sort_direction();
                    false
                }
                KeyCode::Char('c') | KeyCode::Char('C') => {
                    self.clear_query();
                    false
                }
                KeyCode::Char('+') | KeyCode::Char('=') => {
                    self.adjust_page_size(5);
                    false
                }
                KeyCode::Char('-') => {
                    self.adjust_page_size(-5);
                    false
                }
                _ => false,
            },
        }
    }

    pub async fn run(&mut self, rx: &mut broadcast::Receiver<Command>) -> Result<()> {
        color_eyre::install()?;
        let mut terminal = ratatui::init();
        let mut input_tick = tokio::time::interval(self.min_redraw_gap);
        terminal.draw(|frame| self.render(frame))?;
        self.last_draw = Instant::now();
        loop {
            tokio::select! {
                biased;
                _ = input_tick.tick() => {
                    if self.poll_input()? {
                        return Ok(());
                    }
                    self.clear_status_if_expired();
                    if self.loading {
                        self.spinner_idx = (self.spinner_idx + 1) % LOADING_SPINNER_FRAMES.len();
                    }
                    if self.last_draw.elapsed() >= self.min_redraw_gap {
                        terminal.draw(|frame| self.render(frame))?;
                        self.last_draw = Instant::now();
                    }
                }
                result = rx.recv() => {
                    match result {
                        Ok(Command::DatasetLoaded(dataset)) => {
                            self.apply_dataset(dataset);
                            terminal.draw(|frame| self.render(frame))?;
                            self.last_draw = Instant::now();
                        }
                        Ok(Command::Error(message)) => {
                            self.loading = false;
                            self.set_error_status_message(message);
                            terminal.draw(|frame| self.render(frame))?;
                            self.last_draw = Instant::now();
                        }
                        Ok(Command::Exit) => return Ok(()),
                        Err(broadcast::error::RecvError::Closed) => break,
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    }
                }
            }
        }
        Ok(())
    }

    fn render(&mut self, frame: &mut Frame) {
        let area = frame.area();
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Length(3),
                Constraint::Min(3),
                Constraint::Length(3),
            ])
            .split(area);
        self.render_header(frame, chunks[0]);
        self.render_summary_cards(frame, chunks[1]);
        self.render_table(frame, chunks[2]);
        self.render_status(frame, chunks[3]);
    }

    fn render_header(&self, frame: &mut Frame, area: Rect) {
        let mut spans = vec![Span::styled(
            "大势所趋风险框架管理台",
            Style::default().add_modifier(Modifier::BOLD),
        )];
        if self.loading {
            let spinner = LOADING_SPINNER_FRAMES[self.spinner_idx];
            spans.push(Span::raw(format!("  {spinner} 数据加载中...")));
        } else {
            if !self.dataset_name.is_empty() {
                spans.push(Span::raw(format!("  {}", self.dataset_name)));
            }
            if let Some(origin) = self.origin {
                let style = match origin {
                    DataOrigin::Live => Style::default().fg(Color::Green),
                    DataOrigin::File => Style::default().fg(Color::Cyan),
                    // 演示数据高亮提醒，避免误当成实时行情
                    DataOrigin::Sample => Style::default()
                        .fg(Color::Yellow)
                        .add_modifier(Modifier::BOLD),
                };
                spans.push(Span::styled(format!("  [{}]", origin.label()), style));
            }
        }
        let paragraph = Paragraph::new(Line::from(spans))
            .alignment(Alignment::Left)
            .block(Block::default().borders(Borders::ALL));
        frame.render_widget(paragraph, area);
    }

    fn render_summary_cards(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default().borders(Borders::ALL).title("概览");
        let line = match self.summary_line() {
            Ok(line) => line,
            Err(err) => Line::from(Span::styled(
                err.to_string(),
                Style::default().fg(Color::Red),
            )),
        };
        let paragraph = Paragraph::new(line)
            .alignment(Alignment::Left)
            .block(block);
        frame.render_widget(paragraph, area);
    }

    fn summary_line(&self) -> AnyResult<Line<'static>> {
        let Some(field) = self.summary_field.as_deref() else {
            return Ok(Line::from("无可汇总的数字列"));
        };
        let matched = self.store.matched_records()?;
        let Some(summary) = compute_aggregate(&matched, field) else {
            return Ok(Line::from(format!("{field}: 数据不足")));
        };
        let values: Vec<f64> = matched
            .iter()
            .filter_map(|record| record.get(field))
            .filter_map(Value::as_f64)
            .collect();
        let trend_label = classify_trend(&values)
            .map(|trend| trend.label())
            .unwrap_or("--");
        let text = format!(
            "{field}  数量 {}  均值 {:.2}  最小 {:.2}  最大 {:.2}  波动 {:.2}  趋势 {}",
            summary.count, summary.mean, summary.min, summary.max, summary.std_dev, trend_label,
        );
        Ok(Line::from(text))
    }

    fn render_table(&self, frame: &mut Frame, area: Rect) {
        let view = match self.store.current_view() {
            Ok(view) => view,
            Err(err) => {
                let paragraph = Paragraph::new(Line::from(err.to_string()))
                    .block(Block::default().borders(Borders::ALL).title("数据"));
                frame.render_widget(paragraph, area);
                return;
            }
        };
        let state = self.store.state();
        let title = format!(
            "数据  第 {}/{} 页  共 {} 条",
            state.page,
            view.total_pages.max(1),
            view.total_matched,
        );
        let block = Block::default().borders(Borders::ALL).title(title);
        let mut lines = Vec::new();
        if self.columns.is_empty() {
            lines.push(Line::from("暂无数据"));
        } else {
            let specs = self.column_specs(&view);
            let header: Vec<(&str, ColumnAlign, usize)> = specs
                .iter()
                .map(|(column, align, width)| (column.as_str(), *align, *width))
                .collect();
            lines.push(Line::styled(
                format_columns(&header),
                Style::default().add_modifier(Modifier::BOLD),
            ));
            if view.visible_records.is_empty() {
                lines.push(Line::from("没有匹配的记录"));
            }
            for record in &view.visible_records {
                let cells: Vec<String> = specs
                    .iter()
                    .map(|(column, _, _)| {
                        record.get(column).map(format_cell).unwrap_or_default()
                    })
                    .collect();
                let columns: Vec<(&str, ColumnAlign, usize)> = cells
                    .iter()
                    .zip(&specs)
                    .map(|(cell, (_, align, width))| (cell.as_str(), *align, *width))
                    .collect();
                lines.push(Line::from(format_columns(&columns)));
            }
        }
        let paragraph = Paragraph::new(lines)
            .alignment(Alignment::Left)
            .block(block);
        frame.render_widget(paragraph, area);
    }

    /// 每列的对齐与宽度：数字列右对齐，宽度按表头和可见单元格取最大。
    fn column_specs(&self, view: &crate::query::QueryResult) -> Vec<(String, ColumnAlign, usize)> {
        self.columns
            .iter()
            .map(|column| {
                let mut width = UnicodeWidthStr::width(column.as_str());
                let mut numeric = false;
                for record in &view.visible_records {
                    if let Some(value) = record.get(column) {
                        let cell = format_cell(value);
                        width = width.max(UnicodeWidthStr::width(cell.as_str()));
                        if matches!(value, Value::Number(_)) {
                            numeric = true;
                        }
                    }
                }
                let align = if numeric {
                    ColumnAlign::Right
                } else {
                    ColumnAlign::Left
                };
                (
                    column.clone(),
                    align,
                    width.clamp(MIN_COLUMN_WIDTH, MAX_COLUMN_WIDTH),
                )
            })
            .collect()
    }

    fn render_status(&self, frame: &mut Frame, area: Rect) {
        let (line, style) = match &self.input {
            InputMode::Search(buffer) => (
                Line::from(format!("搜索: {buffer}▏ (Enter 确认, Esc 取消)")),
                Style::default().fg(Color::Cyan),
            ),
            InputMode::Filter(buffer) => (
                Line::from(format!("过滤 字段=取值: {buffer}▏ (Enter 确认, Esc 取消)")),
                Style::default().fg(Color::Cyan),
            ),
            InputMode::Normal => match &self.status_message {
                Some(message) => {
                    let style = if self.status_is_error {
                        Style::default().fg(Color::Red)
                    } else {
                        Style::default().fg(Color::Green)
                    };
                    (Line::from(message.clone()), style)
                }
                None => {
                    let state = self.store.state();
                    let mut hints = vec![
                        "←/→ 翻页".to_string(),
                        "/ 搜索".to_string(),
                        "f 过滤".to_string(),
                        "s 排序".to_string(),
                        "d 方向".to_string(),
                        "c 清除".to_string(),
                        "q 退出".to_string(),
                    ];
                    if let Some(field) = &state.sort_field {
                        hints.push(format!("排序中: {field} {}", state.sort_direction.label()));
                    }
                    if !state.search_text.is_empty() {
                        hints.push(format!("搜索中: {}", state.search_text));
                    }
                    if !state.field_filters.is_empty() {
                        hints.push(format!("过滤 {} 项", state.field_filters.len()));
                    }
                    (Line::from(hints.join("  ")), Style::default())
                }
            },
        };
        let paragraph = Paragraph::new(line)
            .style(style)
            .alignment(Alignment::Left)
            .block(Block::default().borders(Borders::ALL));
        frame.render_widget(paragraph, area);
    }
}

#[derive(Clone, Copy)]
enum ColumnAlign {
    Left,
    Right,
}

/// 单元格显示：空值画 "--"，整数不带小数位，其余两位小数。
fn format_cell(value: &Value) -> String {
    match value {
        Value::Null => "--".to_string(),
        Value::Number(number) => {
            if number.fract() == 0.0 && number.abs() < 1e15 {
                format!("{number:.0}")
            } else {
                format!("{number:.2}")
            }
        }
        Value::Text(text) => text.clone(),
    }
}

fn format_columns(columns: &[(&str, ColumnAlign, usize)]) -> String {
    let mut row = String::new();
    for (idx, (value, align, width)) in columns.iter().enumerate() {
        let clipped = clip_to_width(value, *width);
        let padded = pad_to_width(&clipped, *width, *align);
        row.push_str(&padded);
        if idx + 1 != columns.len() {
            row.push_str("  ");
        }
    }
    row
}

fn clip_to_width(value: &str, width: usize) -> String {
    if width == 0 {
        return String::new();
    }
    if UnicodeWidthStr::width(value) <= width {
        return value.to_string();
    }
    let mut result = String::new();
    let mut remaining = width.saturating_sub(1);
    for ch in value.chars() {
        let ch_width = UnicodeWidthChar::width(ch).unwrap_or(0);
        if ch_width > remaining {
            break;
        }
        result.push(ch);
        remaining = remaining.saturating_sub(ch_width);
    }
    result.push('…');
    result
}

fn pad_to_width(value: &str, width: usize, align: ColumnAlign) -> String {
    let current = UnicodeWidthStr::width(value);
    if current >= width {
        return value.to_string();
    }
    let padding = " ".repeat(width - current);
    match align {
        ColumnAlign::Left => format!("{value}{padding}"),
        ColumnAlign::Right => format!("{padding}{value}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryState;
    use crate::source::parse_csv;

    fn fresh_app() -> TuiApp {
        let store = RecordStore::new(QueryState::default()).unwrap();
        TuiApp::new(store, None)
    }

    fn csv_dataset() -> Dataset {
        let csv = "code,name,close\n600519,贵州茅台,1688.00\n000858,五粮液,152.30\n";
        let (columns, records) = parse_csv(csv).unwrap();
        Dataset {
            name: "自选".to_string(),
            columns,
            records,
            origin: DataOrigin::File,
        }
    }

    #[test]
    fn test_filter_input_falls_back_to_text_match() {
        // CSV 单元格保持字符串，数字输入先按数字匹配不中时要退回原文匹配
        let mut app = fresh_app();
        app.apply_dataset(csv_dataset());
        app.apply_filter_input("close=1688.00");
        let view = app.store.current_view().unwrap();
        assert_eq!(view.total_matched, 1);
        assert_eq!(
            view.visible_records[0].get("name"),
            Some(&Value::text("贵州茅台"))
        );
        app.apply_filter_input("close=不存在的值");
        assert_eq!(app.store.current_view().unwrap().total_matched, 0);
    }

    #[test]
    fn test_apply_dataset_status_reflects_origin() {
        // 演示数据必须走错误样式的提示，文件数据走普通提示
        let mut app = fresh_app();
        app.apply_dataset(csv_dataset());
        assert!(!app.status_is_error);

        let mut sample = csv_dataset();
        sample.origin = DataOrigin::Sample;
        let mut app = fresh_app();
        app.apply_dataset(sample);
        assert!(app.status_is_error);
        assert!(app.status_message.as_deref().unwrap().contains("演示"));
    }

    #[test]
    fn test_format_cell() {
        assert_eq!(format_cell(&Value::Null), "--");
        assert_eq!(format_cell(&Value::number(1688.0)), "1688");
        assert_eq!(format_cell(&Value::number(52.346)), "52.35");
        assert_eq!(format_cell(&Value::number(-3.5)), "-3.50");
        assert_eq!(format_cell(&Value::text("白酒")), "白酒");
    }

    #[test]
    fn test_clip_to_width_handles_wide_chars() {
        // 全角字符占两列，截断后保留省略号
        let clipped = clip_to_width("贵州茅台", 5);
        assert!(UnicodeWidthStr::width(clipped.as_str()) <= 5);
        assert!(clipped.ends_with('…'));
        assert_eq!(clip_to_width("abc", 5), "abc");
    }

    #[test]
    fn test_pad_to_width_alignment() {
        assert_eq!(pad_to_width("42", 4, ColumnAlign::Right), "  42");
        assert_eq!(pad_to_width("ab", 4, ColumnAlign::Left), "ab  ");
    }
}
