//! Interactive terminal UI (§5)
//!
//! rsdu scans synchronously on the thread that owns the terminal; there is
//! no background scan thread or channel. [`ScanObserver`] is the
//! cooperative yield point: the scanning screen polls crossterm
//! non-blockingly from inside it and redraws at a throttled rate, and the
//! user can cancel the scan by pressing q/Esc from there. Once the scan
//! (or an import) produces a [`Model`], the browsing loop below walks the
//! arena directly by [`NodeId`] rather than materializing a second tree.

use crate::config::Config;
use crate::error::{Result, RsduError};
use crate::model::{Data, Model, NodeId, SortOrder};
use crate::scanner::{ScanConfig, ScanObserver, ScanProgress};
use crate::util::format_file_size;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{block::Title, Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
    Frame, Terminal,
};
use std::io;
use std::path::Path;
use std::time::{Duration, Instant};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

/// TUI application: owns the terminal handle across both the scan and the
/// browse phase.
pub struct TuiApp {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
    config: Config,
}

impl TuiApp {
    pub fn new(config: Config) -> Result<Self> {
        enable_raw_mode()
            .map_err(|e| RsduError::UiError(format!("Failed to enable raw mode: {}", e)))?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)
            .map_err(|e| RsduError::UiError(format!("Failed to setup terminal: {}", e)))?;

        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend)
            .map_err(|e| RsduError::UiError(format!("Failed to create terminal: {}", e)))?;

        Ok(Self { terminal, config })
    }

    /// Scans `path` synchronously, drawing a progress screen between
    /// directory entries. Returns `Ok(None)` if the user cancelled before
    /// the scan finished.
    pub fn scan(&mut self, path: &Path, scan_config: &ScanConfig) -> Result<Option<Model>> {
        let mut model = Model::new();
        let mut observer =
            ScanUiObserver::new(&mut self.terminal, &self.config, path.display().to_string());
        crate::scanner::scan_root(path, &mut model, scan_config, &mut observer)?;
        if observer.cancelled {
            return Ok(None);
        }
        model.finalize_deferred_links();
        Ok(Some(model))
    }

    /// Runs the interactive browser over `model` until the user quits.
    pub fn browse(&mut self, model: Model) -> Result<()> {
        let mut state = BrowseState::new(model, &self.config);
        loop {
            self.terminal
                .draw(|f| {
                    if state.show_help {
                        draw_help_ui(f);
                    } else {
                        draw_browsing_ui(f, &state, &self.config);
                    }
                })
                .map_err(|e| RsduError::UiError(format!("Failed to draw: {}", e)))?;

            let timeout = Duration::from_millis(100);
            if event::poll(timeout)
                .map_err(|e| RsduError::UiError(format!("Event poll error: {}", e)))?
            {
                if let Event::Key(key) = event::read()
                    .map_err(|e| RsduError::UiError(format!("Event read error: {}", e)))?
                {
                    if key.kind == KeyEventKind::Press && state.handle_key(key.code) {
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

impl Drop for TuiApp {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(
            self.terminal.backend_mut(),
            LeaveAlternateScreen,
            DisableMouseCapture
        );
        let _ = self.terminal.show_cursor();
    }
}

/// Drives the scan's [`ScanObserver`] hook: polls for a cancel keypress
/// and redraws the progress screen, both throttled so a scan over a huge
/// tree isn't dominated by terminal I/O.
struct ScanUiObserver<'a> {
    terminal: &'a mut Terminal<CrosstermBackend<io::Stdout>>,
    config: &'a Config,
    root_path: String,
    last_draw: Instant,
    cancelled: bool,
}

impl<'a> ScanUiObserver<'a> {
    fn new(
        terminal: &'a mut Terminal<CrosstermBackend<io::Stdout>>,
        config: &'a Config,
        root_path: String,
    ) -> Self {
        Self {
            terminal,
            config,
            root_path,
            last_draw: Instant::now() - Duration::from_secs(1),
            cancelled: false,
        }
    }
}

impl<'a> ScanObserver for ScanUiObserver<'a> {
    fn handle_event(&mut self, progress: &ScanProgress) -> bool {
        if event::poll(Duration::from_millis(0)).unwrap_or(false) {
            if let Ok(Event::Key(key)) = event::read() {
                if key.kind == KeyEventKind::Press
                    && matches!(key.code, KeyCode::Char('q') | KeyCode::Esc)
                {
                    self.cancelled = true;
                    return false;
                }
            }
        }

        if self.last_draw.elapsed() >= self.config.update_delay {
            self.last_draw = Instant::now();
            let root_path = &self.root_path;
            let _ = self
                .terminal
                .draw(|f| draw_scanning_ui(f, root_path, progress));
        }
        true
    }
}

fn draw_scanning_ui(f: &mut Frame, root_path: &str, progress: &ScanProgress) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3), // Title
            Constraint::Length(5), // Root path being scanned
            Constraint::Min(4),    // Counters
            Constraint::Length(2), // Instructions
        ])
        .split(f.size());

    let title = Paragraph::new("rsdu - Disk Usage Analyzer")
        .style(
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(title, chunks[0]);

    let truncated_root = if root_path.len() > (chunks[1].width as usize).saturating_sub(6) {
        let max_len = (chunks[1].width as usize).saturating_sub(9);
        if root_path.len() > max_len {
            format!("...{}", &root_path[root_path.len() - max_len..])
        } else {
            root_path.to_string()
        }
    } else {
        root_path.to_string()
    };

    let root_widget = Paragraph::new(Text::from(vec![
        Line::from(""),
        Line::from(vec![
            Span::raw("Scanning: "),
            Span::styled(
                truncated_root,
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            ),
        ]),
        Line::from(""),
    ]))
    .block(Block::default().borders(Borders::ALL))
    .alignment(Alignment::Left);
    f.render_widget(root_widget, chunks[1]);

    let counters_text = vec![
        Line::from(""),
        Line::from(vec![
            Span::raw("  Entries seen: "),
            Span::styled(
                progress.entries_seen.to_string(),
                Style::default()
                    .fg(Color::White)
                    .add_modifier(Modifier::BOLD),
            ),
        ]),
        Line::from(vec![
            Span::raw("  Current depth: "),
            Span::styled(
                progress.current_dir_depth.to_string(),
                Style::default().fg(Color::Cyan),
            ),
        ]),
        Line::from(""),
    ];
    let counters = Paragraph::new(Text::from(counters_text))
        .block(Block::default().borders(Borders::ALL).title("Progress"))
        .alignment(Alignment::Left);
    f.render_widget(counters, chunks[2]);

    let instructions = Paragraph::new("Press q to cancel, or wait for the scan to finish...")
        .style(Style::default().fg(Color::DarkGray))
        .alignment(Alignment::Center);
    f.render_widget(instructions, chunks[3]);
}

/// Browsing state: the scanned/imported [`Model`], the current directory,
/// the breadcrumb stack to get back to the root, and the sorted listing
/// of the current directory's children.
struct BrowseState {
    model: Model,
    current_dir: NodeId,
    path_stack: Vec<NodeId>,
    children: Vec<NodeId>,
    list_state: ListState,
    show_help: bool,
    sort_key: crate::model::SortKey,
    sort_order: SortOrder,
    dirs_first: bool,
}

impl BrowseState {
    fn new(model: Model, config: &Config) -> Self {
        let root = model.root().expect("a scanned/imported model has a root");
        let mut list_state = ListState::default();
        list_state.select(Some(0));
        let mut state = Self {
            model,
            current_dir: root,
            path_stack: Vec::new(),
            children: Vec::new(),
            list_state,
            show_help: false,
            sort_key: config.sort_col.into(),
            sort_order: config.sort_order.into(),
            dirs_first: config.sort_dirs_first,
        };
        state.refresh_children();
        state
    }

    fn refresh_children(&mut self) {
        self.children = self.model.sorted_children(
            self.current_dir,
            self.sort_key,
            self.sort_order,
            self.dirs_first,
        );
        self.list_state.select(Some(0));
    }

    /// Returns `true` to request quitting the browser.
    fn handle_key(&mut self, key: KeyCode) -> bool {
        if self.show_help {
            match key {
                KeyCode::Char('?') | KeyCode::F(1) | KeyCode::Esc => self.show_help = false,
                KeyCode::Char('q') => return true,
                _ => {}
            }
            return false;
        }

        match key {
            KeyCode::Char('q') | KeyCode::Esc => return true,
            KeyCode::Char('?') | KeyCode::F(1) => self.show_help = true,
            KeyCode::Up | KeyCode::Char('k') => self.move_selection(-1),
            KeyCode::Down | KeyCode::Char('j') => self.move_selection(1),
            KeyCode::Home | KeyCode::Char('g') => self.list_state.select(Some(0)),
            KeyCode::End | KeyCode::Char('G') => {
                if !self.children.is_empty() {
                    self.list_state.select(Some(self.children.len() - 1));
                }
            }
            KeyCode::Enter | KeyCode::Right | KeyCode::Char('l') => self.enter_selected(),
            KeyCode::Left | KeyCode::Char('h') | KeyCode::Backspace => self.go_back(),
            _ => {}
        }
        false
    }

    fn move_selection(&mut self, delta: i32) {
        if self.children.is_empty() {
            return;
        }
        let current = self.list_state.selected().unwrap_or(0);
        let max_index = self.children.len() - 1;
        let new_index = if delta < 0 {
            current.saturating_sub((-delta) as usize)
        } else {
            (current + delta as usize).min(max_index)
        };
        self.list_state.select(Some(new_index));
    }

    fn enter_selected(&mut self) {
        let Some(selected) = self.list_state.selected() else {
            return;
        };
        let Some(&child) = self.children.get(selected) else {
            return;
        };
        if self.model.get(child).is_dir() {
            self.path_stack.push(self.current_dir);
            self.current_dir = child;
            self.refresh_children();
        }
    }

    fn go_back(&mut self) {
        if let Some(parent) = self.path_stack.pop() {
            self.current_dir = parent;
            self.refresh_children();
        }
    }

    fn current_path(&self) -> String {
        let mut parts: Vec<String> = self
            .path_stack
            .iter()
            .chain(std::iter::once(&self.current_dir))
            .map(|&id| self.model.get(id).name_lossy())
            .collect();
        if parts.len() == 1 {
            return parts.remove(0);
        }
        parts.join("/")
    }

    /// Apparent size or disk usage for `id`, per the configured display mode.
    fn display_amount(&self, id: NodeId, config: &Config) -> u64 {
        let entry = self.model.get(id);
        if config.show_blocks {
            crate::util::blocks_to_bytes(entry.blocks)
        } else {
            entry.size
        }
    }
}

fn draw_help_ui(f: &mut Frame) {
    let help_text = vec![
        Line::from(Span::styled(
            "rsdu - Help",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from("Navigation:"),
        Line::from("  ↑/k        Move up"),
        Line::from("  ↓/j        Move down"),
        Line::from("  ←/h        Go back to parent directory"),
        Line::from("  →/l/Enter  Enter directory"),
        Line::from("  Home/g     Go to first item"),
        Line::from("  End/G      Go to last item"),
        Line::from(""),
        Line::from("Other:"),
        Line::from("  ?/F1       Toggle this help"),
        Line::from("  q/Esc      Quit"),
        Line::from(""),
        Line::from("Press ? or Esc to return to browser"),
    ];

    let area = centered_rect(60, 70, f.size());
    f.render_widget(Clear, area);

    let help_widget = Paragraph::new(Text::from(help_text))
        .block(Block::default().borders(Borders::ALL).title("Help"))
        .wrap(Wrap { trim: true });
    f.render_widget(help_widget, area);
}

fn draw_browsing_ui(f: &mut Frame, state: &BrowseState, config: &Config) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(5),
            Constraint::Length(3),
        ])
        .split(f.size());

    let current_path = state.current_path();
    let total = state.display_amount(state.current_dir, config);
    let items = state
        .model
        .get(state.current_dir)
        .as_dir()
        .map(|d| d.items)
        .unwrap_or(0);

    let header_text = vec![
        Line::from(vec![
            Span::raw("Path: "),
            Span::styled(format!("/{}", current_path), Style::default().fg(Color::Cyan)),
        ]),
        Line::from(vec![
            Span::raw("Total: "),
            Span::styled(
                format_file_size(total, config.si),
                Style::default().fg(Color::Yellow),
            ),
            Span::raw(" ("),
            Span::styled(format!("{} items", items), Style::default().fg(Color::Green)),
            Span::raw(")"),
        ]),
    ];

    let header = Paragraph::new(Text::from(header_text)).block(
        Block::default()
            .borders(Borders::ALL)
            .title(Title::from("rsdu - Disk Usage Analyzer").alignment(Alignment::Center)),
    );
    f.render_widget(header, chunks[0]);

    if state.children.is_empty() {
        let empty_msg = Paragraph::new("(empty directory)")
            .style(Style::default().fg(Color::Gray))
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL));
        f.render_widget(empty_msg, chunks[1]);
    } else {
        let list_items = create_file_list_items(state, chunks[1].width as usize, config);
        let file_list = List::new(list_items)
            .block(Block::default().borders(Borders::ALL))
            .highlight_style(
                Style::default()
                    .bg(Color::DarkGray)
                    .add_modifier(Modifier::BOLD),
            )
            .highlight_symbol("> ");
        f.render_stateful_widget(file_list, chunks[1], &mut state.list_state.clone());
    }

    let selected_index = state.list_state.selected().unwrap_or(0);
    let status_text = if state.children.is_empty() {
        "Empty directory | q:quit ?:help".to_string()
    } else {
        format!(
            "{}/{} | q:quit ?:help ↑↓:navigate ←→:dir Enter:enter h:up",
            selected_index + 1,
            state.children.len()
        )
    };
    let status = Paragraph::new(status_text)
        .style(Style::default().fg(Color::Gray))
        .block(Block::default().borders(Borders::TOP));
    f.render_widget(status, chunks[2]);
}

fn create_file_list_items(state: &BrowseState, available_width: usize, config: &Config) -> Vec<ListItem> {
    let size_width = 10;
    let bar_width = 15;
    let mtime_width = if config.show_mtime && config.extended { 17 } else { 0 };
    let spacing = 2;
    let name_width =
        available_width.saturating_sub(size_width + bar_width + mtime_width + spacing + 4);

    let total = state.display_amount(state.current_dir, config).max(1);

    let mut items = Vec::with_capacity(state.children.len());
    for &child in &state.children {
        let amount = state.display_amount(child, config);
        let size_str = format_file_size(amount, config.si);

        let percentage = ((amount as f64 / total as f64) * 100.0) as u8;
        let bar = create_percentage_bar(percentage, bar_width.saturating_sub(2));

        let (type_char, color) = entry_type_info(&state.model, child);
        let name_with_type = format!("{}{}", type_char, state.model.get(child).name_lossy());
        let truncated_name = if name_with_type.width() > name_width {
            let mut truncated = String::new();
            let mut current_width = 0;
            for ch in name_with_type.chars() {
                let char_width = ch.width().unwrap_or(0);
                if current_width + char_width + 3 > name_width {
                    truncated.push_str("...");
                    break;
                }
                truncated.push(ch);
                current_width += char_width;
            }
            truncated
        } else {
            name_with_type
        };

        let mut spans = vec![
            Span::styled(size_str, Style::default().fg(Color::Yellow)),
            Span::raw(" "),
            Span::styled(format!("[{}]", bar), Style::default().fg(Color::Blue)),
            Span::raw(" "),
        ];
        if mtime_width > 0 {
            let mtime = state
                .model
                .get(child)
                .ext
                .map(|e| crate::util::format_mtime(e.mtime))
                .unwrap_or_else(|| "-".to_string());
            spans.push(Span::styled(mtime, Style::default().fg(Color::DarkGray)));
            spans.push(Span::raw(" "));
        }
        spans.push(Span::styled(truncated_name, Style::default().fg(color)));
        items.push(ListItem::new(Line::from(spans)));
    }
    items
}

fn create_percentage_bar(percentage: u8, width: usize) -> String {
    if width == 0 {
        return String::new();
    }
    let filled = (percentage as usize * width / 100).min(width);
    let mut bar = String::new();
    for i in 0..width {
        bar.push(if i < filled { '█' } else { ' ' });
    }
    bar
}

/// Type indicator character and color for the file list (§4.1 Kind/Data).
fn entry_type_info(model: &Model, id: NodeId) -> (char, Color) {
    let entry = model.get(id);
    match &entry.data {
        Data::Dir(d) if d.err || d.suberr => ('!', Color::Red),
        Data::Dir(_) => ('/', Color::Blue),
        Data::Link(_) => ('>', Color::Yellow),
        Data::File(f) if f.err => ('!', Color::Red),
        Data::File(f) if f.excluded => ('x', Color::DarkGray),
        Data::File(f) if f.other_fs => ('~', Color::DarkGray),
        Data::File(f) if f.kernfs => ('#', Color::DarkGray),
        Data::File(f) if f.notreg => ('@', Color::Magenta),
        Data::File(_) => (' ', Color::White),
    }
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
