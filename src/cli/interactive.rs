use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Chart, Dataset as ChartDataset, List, ListItem, ListState, Paragraph},
    Frame, Terminal,
};
use std::time::Duration;
use tracing::{debug, info};

use crate::search::CountrySearch;
use crate::service::{format_date, format_number, DataService};
use crate::store::Dataset;

/// One visible row of the explorer list.
#[derive(Debug, Clone)]
struct CountryRow {
    key: String,
    name: String,
    value: f64,
    color: (u8, u8, u8),
    substituted_date: Option<String>,
}

/// Terminal explorer over a loaded service: the countries of the current
/// selection, coloured with the globe colours.
pub struct GlobeExplorer {
    service: DataService,
    query: String,
    rows: Vec<CountryRow>,
    list_state: ListState,
    selected_index: usize,
    show_chart: bool,
    status: String,
}

impl GlobeExplorer {
    pub fn new(service: DataService) -> Self {
        let mut explorer = Self {
            service,
            query: String::new(),
            rows: Vec::new(),
            list_state: ListState::default(),
            selected_index: 0,
            show_chart: true,
            status: String::new(),
        };
        explorer.refresh_rows();
        explorer
    }

    pub async fn run(mut self) -> Result<()> {
        enable_raw_mode()?;
        let mut stdout = std::io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = self.run_app(&mut terminal).await;
        info!("Explorer session ended");

        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;
        result
    }

    async fn run_app<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> Result<()> {
        loop {
            terminal.draw(|f| self.ui(f))?;

            if !event::poll(Duration::from_millis(100))? {
                tokio::task::yield_now().await;
                continue;
            }
            let Event::Key(key) = event::read()? else {
                continue;
            };
            if key.kind != KeyEventKind::Press {
                continue;
            }

            match key.code {
                KeyCode::Esc => return Ok(()),
                KeyCode::Left => self.step_date(-1),
                KeyCode::Right => self.step_date(1),
                KeyCode::Tab => self.next_dataset(),
                KeyCode::BackTab => self.next_column(),
                KeyCode::Enter => self.show_chart = !self.show_chart,
                KeyCode::Up => self.move_selection(-1),
                KeyCode::Down => self.move_selection(1),
                KeyCode::Backspace => {
                    self.query.pop();
                    self.refresh_rows();
                }
                KeyCode::Char(c) => {
                    self.query.push(c);
                    self.refresh_rows();
                }
                _ => {}
            }
        }
    }

    fn step_date(&mut self, delta: i64) {
        let Some(query) = self.service.query() else {
            return;
        };
        let current = query.state().date.clone().unwrap_or_default();
        let Some(index) = query.date_index(&current) else {
            return;
        };
        let target = index as i64 + delta;
        if target < 0 {
            return;
        }
        let date = query.date_at(target as usize);
        if self.service.change_date(&date) {
            self.refresh_rows();
        }
    }

    fn next_dataset(&mut self) {
        let Some(state) = self.service.state() else {
            return;
        };
        let position = Dataset::ALL.iter().position(|d| *d == state.dataset).unwrap_or(0);
        let next = Dataset::ALL[(position + 1) % Dataset::ALL.len()];
        if let Some(selection) = self.service.change_dataset(next.as_str()) {
            self.status = format!("{} columns: {}", next.display_name(), selection.columns.join(", "));
        }
        self.refresh_rows();
    }

    fn next_column(&mut self) {
        let Some(query) = self.service.query() else {
            return;
        };
        let columns = query.columns(query.state().dataset);
        if columns.is_empty() {
            return;
        }
        let position = query
            .state()
            .column
            .as_ref()
            .and_then(|c| columns.iter().position(|col| col == c))
            .map_or(0, |p| (p + 1) % columns.len());
        let next = columns[position].clone();
        self.service.change_column(&next);
        self.refresh_rows();
    }

    fn move_selection(&mut self, delta: i64) {
        if self.rows.is_empty() {
            return;
        }
        let last = self.rows.len() as i64 - 1;
        self.selected_index = (self.selected_index as i64 + delta).clamp(0, last) as usize;
        self.list_state.select(Some(self.selected_index));
    }

    /// Rebuild the list for the current selection and filter text
    fn refresh_rows(&mut self) {
        let Some(query) = self.service.query() else {
            self.rows.clear();
            return;
        };

        let keys: Vec<(String, String)> = if self.query.trim().is_empty() {
            query
                .all_countries()
                .iter()
                .map(|e| (e.country_key.clone(), e.country_name.clone()))
                .collect()
        } else {
            CountrySearch::new(query.all_countries())
                .search(&self.query, usize::MAX)
                .results
                .into_iter()
                .map(|m| (m.country_key, m.country_name))
                .collect()
        };

        self.rows = keys
            .into_iter()
            .map(|(key, name)| {
                let data = query.country_data(&key);
                let rgb = query.color_rgb(&key);
                CountryRow {
                    value: query.value(&key),
                    color: (rgb.r, rgb.g, rgb.b),
                    substituted_date: data.filter(|d| d.substituted).map(|d| d.date),
                    key,
                    name,
                }
            })
            .collect();

        if self.query.trim().is_empty() {
            self.rows
                .sort_by(|a, b| b.value.total_cmp(&a.value).then_with(|| a.name.cmp(&b.name)));
        }
        self.selected_index = self.selected_index.min(self.rows.len().saturating_sub(1));
        self.list_state
            .select((!self.rows.is_empty()).then_some(self.selected_index));
        debug!("Explorer showing {} countries", self.rows.len());
    }

    fn ui(&mut self, f: &mut Frame) {
        let area = f.area();
        let chunks = if self.show_chart {
            Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
                .split(area)
        } else {
            vec![area].into()
        };

        let left_chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(3), Constraint::Min(0), Constraint::Length(1)])
            .split(chunks[0]);

        let title = match self.service.query() {
            Some(query) => {
                let state = query.state();
                format!(
                    " {} > {} > {} ({} countries) ",
                    state.dataset.display_name(),
                    state.column.as_deref().unwrap_or("-"),
                    state.date.as_deref().map(format_date).unwrap_or_default(),
                    self.rows.len()
                )
            }
            None => " No data loaded ".to_string(),
        };

        let input = Paragraph::new(self.query.as_str())
            .style(Style::default().fg(Color::Yellow))
            .block(Block::default().borders(Borders::ALL).title(title));
        f.render_widget(input, left_chunks[0]);

        let items: Vec<ListItem> = self
            .rows
            .iter()
            .map(|row| {
                let (r, g, b) = row.color;
                let mut spans = vec![
                    Span::styled("██ ", Style::default().fg(Color::Rgb(r, g, b))),
                    Span::raw(format!("{:<28} {:>14}", row.name, format_number(Some(row.value)))),
                ];
                if let Some(date) = &row.substituted_date {
                    spans.push(Span::styled(
                        format!("  (from {})", format_date(date)),
                        Style::default().fg(Color::DarkGray),
                    ));
                }
                ListItem::new(Line::from(spans))
            })
            .collect();

        let list = List::new(items)
            .block(Block::default().borders(Borders::ALL).title(" Countries "))
            .highlight_style(Style::default().add_modifier(Modifier::BOLD).bg(Color::DarkGray))
            .highlight_symbol(">> ");
        f.render_stateful_widget(list, left_chunks[1], &mut self.list_state);

        let help = if self.status.is_empty() {
            "←/→ date  Tab dataset  Shift+Tab column  Enter chart  Esc quit".to_string()
        } else {
            self.status.clone()
        };
        f.render_widget(Paragraph::new(help).style(Style::default().fg(Color::Gray)), left_chunks[2]);

        if self.show_chart && chunks.len() > 1 {
            self.render_series_chart(f, chunks[1]);
        }
    }

    fn render_series_chart(&self, f: &mut Frame, area: Rect) {
        let block = Block::default().borders(Borders::ALL);
        let (Some(query), Some(row)) = (self.service.query(), self.rows.get(self.selected_index)) else {
            f.render_widget(Paragraph::new("No country selected").block(block), area);
            return;
        };
        let Some(column) = query.state().column.clone() else {
            f.render_widget(Paragraph::new("No column selected").block(block), area);
            return;
        };

        let series = query.country_series(&row.key, &column);
        if series.is_empty() {
            f.render_widget(
                Paragraph::new(format!("No {} data for {}", column, row.name)).block(block),
                area,
            );
            return;
        }

        let points: Vec<(f64, f64)> = series.iter().enumerate().map(|(i, p)| (i as f64, p.value)).collect();
        let y_max = series.iter().map(|p| p.value).fold(0.0_f64, f64::max).max(1.0);
        let x_max = (points.len().max(2) - 1) as f64;
        let (r, g, b) = row.color;

        let datasets = vec![ChartDataset::default()
            .name(column.clone())
            .marker(symbols::Marker::Braille)
            .style(Style::default().fg(Color::Rgb(r, g, b)))
            .data(&points)];

        let first = series.first().map(|p| format_date(&p.date)).unwrap_or_default();
        let last = series.last().map(|p| format_date(&p.date)).unwrap_or_default();

        let chart = Chart::new(datasets)
            .block(block.title(format!(" {} - {} ", row.name, column)))
            .x_axis(
                Axis::default()
                    .bounds([0.0, x_max])
                    .labels(vec![Span::raw(first), Span::raw(last)]),
            )
            .y_axis(
                Axis::default()
                    .bounds([0.0, y_max])
                    .labels(vec![Span::raw("0"), Span::raw(format_number(Some(y_max)))]),
            );
        f.render_widget(chart, area);
    }
}
