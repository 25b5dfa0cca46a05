//! Live progress display for scrape and check runs

use crate::progress::Progress;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Alignment, Constraint, Direction, Layout},
    style::{Color, Style},
    widgets::{Block, Borders, Gauge, List, ListItem, Paragraph, Wrap},
    Frame, Terminal,
};
use std::collections::VecDeque;
use std::io;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// Maximum number of snapshots kept for display
const MAX_RECENT_EVENTS: usize = 100;

/// Progress monitor state
pub struct ProgressMonitor {
    title: String,
    extraction: Option<Progress>,
    validation: Option<Progress>,
    /// Newest last
    recent: VecDeque<String>,
    status_message: String,
    is_complete: bool,
    should_quit: bool,
}

impl ProgressMonitor {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            extraction: None,
            validation: None,
            recent: VecDeque::new(),
            status_message: "Starting... Press 'q' to quit.".to_string(),
            is_complete: false,
            should_quit: false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    /// Fold one snapshot into the display state
    pub fn apply(&mut self, progress: Progress) {
        let line = match &progress {
            Progress::Extraction {
                candidates,
                sources_done,
                sources_total,
                rate,
            } => format!(
                "scrape  {}/{} sources | {} candidates | {:.1}/s",
                sources_done, sources_total, candidates, rate
            ),
            Progress::Validation {
                checked,
                total,
                working,
                rate,
            } => format!(
                "check   {}/{} checked | {} working | {:.1}/s",
                checked, total, working, rate
            ),
        };

        self.status_message = line.clone();
        self.recent.push_back(line);
        if self.recent.len() > MAX_RECENT_EVENTS {
            self.recent.pop_front();
        }

        match progress {
            Progress::Extraction { .. } => self.extraction = Some(progress),
            Progress::Validation { .. } => self.validation = Some(progress),
        }
    }

    fn finish(&mut self) {
        self.is_complete = true;
        self.status_message = format!("Complete! {} | Press 'q' to quit", self.status_message);
    }

    fn handle_input(&mut self, key: KeyCode) {
        if matches!(key, KeyCode::Char('q') | KeyCode::Esc) {
            self.should_quit = true;
        }
    }

    /// Show progress from `rx` until `task` finishes and the user quits.
    ///
    /// Returns the task's output, or `None` if the user quit before it
    /// finished, in which case the task is aborted.
    pub async fn run<T>(
        &mut self,
        rx: mpsc::UnboundedReceiver<Progress>,
        task: JoinHandle<T>,
    ) -> anyhow::Result<Option<T>> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = self.run_app(&mut terminal, rx).await;

        disable_raw_mode()?;
        execute!(
            terminal.backend_mut(),
            LeaveAlternateScreen,
            DisableMouseCapture
        )?;
        terminal.show_cursor()?;
        result?;

        if self.is_complete {
            Ok(Some(task.await?))
        } else {
            task.abort();
            Ok(None)
        }
    }

    async fn run_app<B: Backend>(
        &mut self,
        terminal: &mut Terminal<B>,
        mut rx: mpsc::UnboundedReceiver<Progress>,
    ) -> anyhow::Result<()> {
        loop {
            terminal.draw(|f| self.ui(f))?;

            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_input(key.code);
                        if self.should_quit {
                            break;
                        }
                    }
                }
            }

            loop {
                match rx.try_recv() {
                    Ok(progress) => self.apply(progress),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        // the task dropped its sender: the run is over
                        if !self.is_complete {
                            self.finish();
                        }
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    fn ui(&mut self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .margin(1)
            .constraints([
                Constraint::Length(3), // Title
                Constraint::Length(3), // Extraction
                Constraint::Length(3), // Validation
                Constraint::Min(0),    // Recent snapshots
                Constraint::Length(3), // Status bar
            ])
            .split(f.size());

        let title = Paragraph::new(self.title.as_str())
            .style(Style::default().fg(Color::Cyan))
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL));
        f.render_widget(title, chunks[0]);

        f.render_widget(gauge("Scrape", self.extraction.as_ref(), Color::Blue), chunks[1]);
        f.render_widget(gauge("Check", self.validation.as_ref(), Color::Green), chunks[2]);

        let items: Vec<ListItem> = self
            .recent
            .iter()
            .rev()
            .map(|line| ListItem::new(line.as_str()))
            .collect();
        let list = List::new(items).block(Block::default().borders(Borders::ALL).title("Progress"));
        f.render_widget(list, chunks[3]);

        let status = Paragraph::new(self.status_message.clone())
            .style(if self.is_complete {
                Style::default().fg(Color::Green)
            } else {
                Style::default().fg(Color::Yellow)
            })
            .wrap(Wrap { trim: true })
            .block(Block::default().borders(Borders::ALL).title("Status"));
        f.render_widget(status, chunks[4]);
    }
}

fn gauge<'a>(title: &'a str, progress: Option<&Progress>, color: Color) -> Gauge<'a> {
    let label = match progress {
        Some(Progress::Extraction {
            sources_done,
            sources_total,
            ..
        }) => format!("{}/{} sources", sources_done, sources_total),
        Some(Progress::Validation { checked, total, .. }) => format!("{}/{} proxies", checked, total),
        None => "waiting".to_string(),
    };
    let percent = progress.map_or(0, |p| (p.ratio() * 100.0) as u16);

    Gauge::default()
        .block(Block::default().borders(Borders::ALL).title(title))
        .gauge_style(Style::default().fg(color).bg(Color::Black))
        .percent(percent.min(100))
        .label(label)
}
