use crate::client::ApiClient;
use crate::protocol::{ConversationSummary, Role, StoredMessage};
use crate::session::{SessionOutcome, SessionSlot, SessionUpdate};
use crate::state::ConversationState;
use crossterm::cursor::MoveTo;
use crossterm::event::{self, Event, KeyCode, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, size};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Widget, Wrap};
use ratatui::{Frame, Terminal, TerminalOptions, Viewport};
use std::io;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

type TuiTerminal = Terminal<CrosstermBackend<io::Stdout>>;
type UiResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

const STATUS_HEIGHT: u16 = 8;
const INPUT_HEIGHT: u16 = 6;

// Restores terminal settings even if the loop exits early.
struct TerminalGuard;

impl TerminalGuard {
    fn new() -> Self {
        Self
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = io::stdout().flush();
    }
}

#[derive(Debug, Clone)]
pub enum ChatMessage {
    User(String),
    Assistant(String),
    Info(String),
}

#[derive(Debug, Clone)]
struct LineSpec {
    text: String,
    style: Style,
}

impl LineSpec {
    fn new(text: impl Into<String>, style: Style) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }
}

impl ChatMessage {
    fn line_specs(&self) -> Vec<LineSpec> {
        match self {
            ChatMessage::User(msg) => {
                let header_style = Style::default()
                    .fg(Color::Blue)
                    .add_modifier(Modifier::BOLD);
                let body_style = Style::default().fg(Color::Blue);
                let mut lines = vec![LineSpec::new("You:", header_style)];
                for line in msg.lines() {
                    lines.push(LineSpec::new(format!("  {}", line), body_style));
                }
                lines
            }
            ChatMessage::Assistant(msg) => {
                let header_style = Style::default()
                    .fg(Color::Magenta)
                    .add_modifier(Modifier::BOLD);
                let body_style = Style::default().fg(Color::Magenta);
                let mut lines = vec![LineSpec::new("Xuanming:", header_style)];
                for line in msg.lines() {
                    lines.push(LineSpec::new(format!("  {}", line), body_style));
                }
                lines
            }
            ChatMessage::Info(msg) => vec![LineSpec::new(
                format!("ℹ {}", msg),
                Style::default()
                    .fg(Color::Gray)
                    .add_modifier(Modifier::ITALIC),
            )],
        }
    }

    fn to_text(&self) -> Text<'static> {
        let lines = self
            .line_specs()
            .into_iter()
            .map(|spec| Line::from(Span::styled(spec.text, spec.style)))
            .collect::<Vec<_>>();
        Text::from(lines)
    }

    fn plain_lines(&self) -> Vec<String> {
        self.line_specs()
            .into_iter()
            .map(|spec| spec.text)
            .collect()
    }

    fn rendered_height(&self, width: u16) -> u16 {
        let width = width.max(1) as usize;
        let mut total = 0usize;
        for line in self.plain_lines() {
            let len = line.chars().count().max(1);
            total += (len + width - 1) / width;
        }
        total as u16
    }
}

/// Slash commands typed into the input box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    New,
    List,
    Open(usize),
    Delete(usize),
    Title(String),
    Unknown(String),
}

pub fn parse_command(input: &str) -> Command {
    let rest = input.trim().trim_start_matches('/');
    let mut parts = rest.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default();
    let arg = parts.next().unwrap_or("").trim();

    match name {
        "new" => Command::New,
        "list" => Command::List,
        "open" => match arg.parse() {
            Ok(index) => Command::Open(index),
            Err(_) => Command::Unknown(rest.to_string()),
        },
        "delete" => match arg.parse() {
            Ok(index) => Command::Delete(index),
            Err(_) => Command::Unknown(rest.to_string()),
        },
        "title" if !arg.is_empty() => Command::Title(arg.to_string()),
        _ => Command::Unknown(rest.to_string()),
    }
}

/// Results of background backend calls made by commands.
#[derive(Debug)]
enum UiEvent {
    Conversations(Vec<ConversationSummary>),
    Created(ConversationSummary),
    History {
        title: String,
        messages: Vec<StoredMessage>,
    },
    Deleted(String),
    TitleSet,
    Error(String),
}

struct InputBuffer {
    lines: Vec<String>,
    /// Cursor column in characters, not bytes; edits convert at the edit
    /// point so multi-byte input lands on a char boundary.
    cursor_x: usize,
    cursor_y: usize,
}

fn byte_index(line: &str, cursor: usize) -> usize {
    line.char_indices()
        .nth(cursor)
        .map(|(idx, _)| idx)
        .unwrap_or(line.len())
}

impl InputBuffer {
    fn new() -> Self {
        Self {
            lines: vec![String::new()],
            cursor_x: 0,
            cursor_y: 0,
        }
    }

    fn clear(&mut self) {
        self.lines = vec![String::new()];
        self.cursor_x = 0;
        self.cursor_y = 0;
    }

    fn insert_char(&mut self, c: char) {
        let line = &mut self.lines[self.cursor_y];
        let idx = byte_index(line, self.cursor_x);
        line.insert(idx, c);
        self.cursor_x += 1;
    }

    fn delete_char(&mut self) {
        if self.cursor_x > 0 {
            let line = &mut self.lines[self.cursor_y];
            let idx = byte_index(line, self.cursor_x - 1);
            line.remove(idx);
            self.cursor_x -= 1;
        } else if self.cursor_y > 0 {
            let prev_line = self.lines.remove(self.cursor_y);
            self.cursor_y -= 1;
            self.cursor_x = self.lines[self.cursor_y].chars().count();
            self.lines[self.cursor_y].push_str(&prev_line);
        }
    }

    fn new_line(&mut self) {
        let line = &self.lines[self.cursor_y];
        let remaining: String = line.chars().skip(self.cursor_x).collect();
        self.lines[self.cursor_y] = line.chars().take(self.cursor_x).collect();
        self.lines.insert(self.cursor_y + 1, remaining);
        self.cursor_y += 1;
        self.cursor_x = 0;
    }

    fn move_left(&mut self) {
        if self.cursor_x > 0 {
            self.cursor_x -= 1;
        } else if self.cursor_y > 0 {
            self.cursor_y -= 1;
            self.cursor_x = self.lines[self.cursor_y].chars().count();
        }
    }

    fn move_right(&mut self) {
        let line_len = self.lines[self.cursor_y].chars().count();
        if self.cursor_x < line_len {
            self.cursor_x += 1;
        } else if self.cursor_y < self.lines.len() - 1 {
            self.cursor_y += 1;
            self.cursor_x = 0;
        }
    }

    fn move_up(&mut self) {
        if self.cursor_y > 0 {
            self.cursor_y -= 1;
            self.cursor_x = self
                .cursor_x
                .min(self.lines[self.cursor_y].chars().count());
        }
    }

    fn move_down(&mut self) {
        if self.cursor_y < self.lines.len() - 1 {
            self.cursor_y += 1;
            self.cursor_x = self
                .cursor_x
                .min(self.lines[self.cursor_y].chars().count());
        }
    }

    fn to_string(&self) -> String {
        self.lines.join("\n")
    }

    fn is_empty(&self) -> bool {
        self.lines.iter().all(|l| l.is_empty())
    }

    fn render(&self) -> Text<'static> {
        if self.is_empty() {
            return Text::from(Span::styled(
                "Ask Xuanming anything...",
                Style::default().fg(Color::DarkGray),
            ));
        }
        Text::from(
            self.lines
                .iter()
                .map(|l| Line::from(l.clone()))
                .collect::<Vec<_>>(),
        )
    }
}

impl Default for InputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

pub struct App {
    client: Arc<ApiClient>,
    state: ConversationState,
    messages: Vec<ChatMessage>,
    input: InputBuffer,
    should_quit: bool,
    session: SessionSlot,
    session_tx: mpsc::Sender<SessionUpdate>,
    session_rx: mpsc::Receiver<SessionUpdate>,
    ui_tx: mpsc::Sender<UiEvent>,
    ui_rx: mpsc::Receiver<UiEvent>,
    /// The reply being streamed right now. `Some("")` renders the typing
    /// indicator; each update replaces it with the full accumulated text.
    pending_reply: Option<String>,
}

impl App {
    pub fn new(client: ApiClient) -> Self {
        let (session_tx, session_rx) = mpsc::channel(100);
        let (ui_tx, ui_rx) = mpsc::channel(100);

        Self {
            client: Arc::new(client),
            state: ConversationState::default(),
            messages: Vec::new(),
            input: InputBuffer::new(),
            should_quit: false,
            session: SessionSlot::default(),
            session_tx,
            session_rx,
            ui_tx,
            ui_rx,
            pending_reply: None,
        }
    }

    fn draw(&mut self, f: &mut Frame) {
        let [status_area, input_area] = Layout::vertical([
            Constraint::Length(STATUS_HEIGHT),
            Constraint::Length(INPUT_HEIGHT),
        ])
        .areas(f.area());

        let (status_title, status_text) = self.status_content();
        let status = Paragraph::new(status_text)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(status_title)
                    .border_style(Style::default().fg(Color::DarkGray)),
            )
            .wrap(Wrap { trim: false });
        f.render_widget(status, status_area);

        let input_title = if self.session.is_busy() {
            " Input (replying... Esc to stop) "
        } else {
            " Input (Enter to send, Esc to quit) "
        };
        let input_paragraph = Paragraph::new(self.input.render())
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(input_title)
                    .border_style(Style::default().fg(Color::DarkGray)),
            )
            .wrap(Wrap { trim: false });
        f.render_widget(input_paragraph, input_area);

        let cursor_x = (self.input.cursor_x + 1) as u16;
        let cursor_y = self.input.cursor_y as u16;
        let x = (input_area.x + cursor_x).min(input_area.x + input_area.width - 2);
        let y = (input_area.y + 1 + cursor_y).min(input_area.y + input_area.height - 2);
        f.set_cursor_position((x, y));
    }

    fn status_content(&self) -> (String, Text<'static>) {
        if let Some(reply) = &self.pending_reply {
            let title = " Xuanming is replying (Esc to stop) ".to_string();
            let body = if reply.is_empty() {
                Text::from(Span::styled("· · ·", Style::default().fg(Color::DarkGray)))
            } else {
                let lines: Vec<String> = reply.lines().map(|l| l.to_string()).collect();
                let visible = STATUS_HEIGHT.saturating_sub(2) as usize;
                let tail = lines.len().saturating_sub(visible);
                Text::from(
                    lines[tail..]
                        .iter()
                        .map(|l| {
                            Line::from(Span::styled(
                                l.clone(),
                                Style::default().fg(Color::Magenta),
                            ))
                        })
                        .collect::<Vec<_>>(),
                )
            };
            return (title, body);
        }

        match self.state.active_title() {
            Some(title) => (
                format!(" {} ", title),
                Text::from(vec![
                    Line::from("Enter sends, Shift+Enter inserts a newline."),
                    Line::from("Commands: /new /list /open <n> /delete <n> /title <text>"),
                ]),
            ),
            None => (
                " Welcome ".to_string(),
                Text::from(vec![
                    Line::from("No conversation selected; sending starts a new one."),
                    Line::from("Commands: /new /list /open <n> /delete <n> /title <text>"),
                ]),
            ),
        }
    }

    fn append_message(&mut self, terminal: &mut TuiTerminal, message: ChatMessage) -> UiResult<()> {
        let width = terminal.size()?.width;
        let height = message.rendered_height(width).saturating_add(1);
        let mut text = message.to_text();
        text.extend(Text::raw("\n"));
        // Insert above the inline viewport so the log stays in scrollback.
        terminal.insert_before(height, |buf| {
            let paragraph = Paragraph::new(text).wrap(Wrap { trim: false });
            paragraph.render(buf.area, buf);
        })?;
        self.messages.push(message);
        Ok(())
    }

    fn refresh_conversations(&self) {
        let client = Arc::clone(&self.client);
        let tx = self.ui_tx.clone();
        tokio::spawn(async move {
            match client.list_conversations().await {
                Ok(list) => {
                    let _ = tx.send(UiEvent::Conversations(list)).await;
                }
                Err(err) => {
                    let _ = tx.send(UiEvent::Error(err.to_string())).await;
                }
            }
        });
    }

    fn apply_session_update(
        &mut self,
        terminal: &mut TuiTerminal,
        update: SessionUpdate,
    ) -> UiResult<()> {
        match update {
            SessionUpdate::ConversationCreated(summary) => {
                self.state.set_active(Some(summary.id));
                self.refresh_conversations();
            }
            SessionUpdate::Content(text) => {
                self.pending_reply = Some(text);
            }
            SessionUpdate::TitleChanged => {
                self.refresh_conversations();
            }
            SessionUpdate::Finished(outcome) => {
                self.session.finish();
                let reply = self.pending_reply.take().unwrap_or_default();
                if !reply.is_empty() {
                    self.append_message(terminal, ChatMessage::Assistant(reply))?;
                }
                if outcome == SessionOutcome::Cancelled {
                    self.append_message(
                        terminal,
                        ChatMessage::Info("Generation stopped.".to_string()),
                    )?;
                }
            }
        }
        Ok(())
    }

    fn apply_ui_event(&mut self, terminal: &mut TuiTerminal, event: UiEvent) -> UiResult<()> {
        match event {
            UiEvent::Conversations(list) => {
                self.state.set_conversations(list);
            }
            UiEvent::Created(summary) => {
                self.state.set_active(Some(summary.id.clone()));
                self.refresh_conversations();
                self.append_message(
                    terminal,
                    ChatMessage::Info(format!("Started conversation \"{}\".", summary.title)),
                )?;
            }
            UiEvent::History { title, messages } => {
                self.append_message(terminal, ChatMessage::Info(format!("── {} ──", title)))?;
                for message in messages {
                    let chat_message = match message.role {
                        Role::User => ChatMessage::User(message.content),
                        Role::Assistant => ChatMessage::Assistant(message.content),
                    };
                    self.append_message(terminal, chat_message)?;
                }
            }
            UiEvent::Deleted(id) => {
                self.state.clear_active_if(&id);
                self.refresh_conversations();
                self.append_message(
                    terminal,
                    ChatMessage::Info("Conversation deleted.".to_string()),
                )?;
            }
            UiEvent::TitleSet => {
                self.refresh_conversations();
                self.append_message(terminal, ChatMessage::Info("Title updated.".to_string()))?;
            }
            UiEvent::Error(err) => {
                self.append_message(terminal, ChatMessage::Info(format!("Error: {}", err)))?;
            }
        }
        Ok(())
    }

    fn send_message(&mut self, terminal: &mut TuiTerminal, text: String) -> UiResult<()> {
        if self.session.is_busy() {
            return Ok(());
        }

        let conversation = self.state.active_id().map(str::to_string);
        let started = self.session.begin(
            Arc::clone(&self.client),
            conversation,
            &text,
            self.session_tx.clone(),
        );
        if started {
            self.append_message(terminal, ChatMessage::User(text))?;
            self.input.clear();
            self.pending_reply = Some(String::new());
        }
        Ok(())
    }

    fn run_command(&mut self, terminal: &mut TuiTerminal, command: Command) -> UiResult<()> {
        match command {
            Command::New => {
                let client = Arc::clone(&self.client);
                let tx = self.ui_tx.clone();
                tokio::spawn(async move {
                    match client.create_conversation().await {
                        Ok(summary) => {
                            let _ = tx.send(UiEvent::Created(summary)).await;
                        }
                        Err(err) => {
                            let _ = tx.send(UiEvent::Error(err.to_string())).await;
                        }
                    }
                });
            }
            Command::List => {
                if self.state.conversations().is_empty() {
                    self.append_message(
                        terminal,
                        ChatMessage::Info("No conversations yet; /new starts one.".to_string()),
                    )?;
                } else {
                    let active = self.state.active_id().map(str::to_string);
                    let listing: Vec<(usize, String, bool)> = self
                        .state
                        .conversations()
                        .iter()
                        .enumerate()
                        .map(|(i, conv)| {
                            (
                                i + 1,
                                conv.title.clone(),
                                active.as_deref() == Some(conv.id.as_str()),
                            )
                        })
                        .collect();
                    for (index, title, is_active) in listing {
                        let marker = if is_active { "*" } else { " " };
                        self.append_message(
                            terminal,
                            ChatMessage::Info(format!("{} {}. {}", marker, index, title)),
                        )?;
                    }
                }
            }
            Command::Open(index) => match self.state.by_index(index).cloned() {
                Some(conv) => {
                    if self.state.active_id() == Some(conv.id.as_str()) {
                        return Ok(());
                    }
                    self.state.set_active(Some(conv.id.clone()));
                    self.refresh_conversations();
                    let client = Arc::clone(&self.client);
                    let tx = self.ui_tx.clone();
                    tokio::spawn(async move {
                        match client.conversation_messages(&conv.id).await {
                            Ok(messages) => {
                                let _ = tx
                                    .send(UiEvent::History {
                                        title: conv.title,
                                        messages,
                                    })
                                    .await;
                            }
                            Err(err) => {
                                let _ = tx.send(UiEvent::Error(err.to_string())).await;
                            }
                        }
                    });
                }
                None => {
                    self.append_message(
                        terminal,
                        ChatMessage::Info("No such conversation; /list shows them.".to_string()),
                    )?;
                }
            },
            Command::Delete(index) => match self.state.by_index(index).cloned() {
                Some(conv) => {
                    let client = Arc::clone(&self.client);
                    let tx = self.ui_tx.clone();
                    tokio::spawn(async move {
                        match client.delete_conversation(&conv.id).await {
                            Ok(()) => {
                                let _ = tx.send(UiEvent::Deleted(conv.id)).await;
                            }
                            Err(err) => {
                                let _ = tx.send(UiEvent::Error(err.to_string())).await;
                            }
                        }
                    });
                }
                None => {
                    self.append_message(
                        terminal,
                        ChatMessage::Info("No such conversation; /list shows them.".to_string()),
                    )?;
                }
            },
            Command::Title(title) => match self.state.active_id().map(str::to_string) {
                Some(id) => {
                    let client = Arc::clone(&self.client);
                    let tx = self.ui_tx.clone();
                    tokio::spawn(async move {
                        match client.set_title(&id, &title).await {
                            Ok(()) => {
                                let _ = tx.send(UiEvent::TitleSet).await;
                            }
                            Err(err) => {
                                let _ = tx.send(UiEvent::Error(err.to_string())).await;
                            }
                        }
                    });
                }
                None => {
                    self.append_message(
                        terminal,
                        ChatMessage::Info("No active conversation to rename.".to_string()),
                    )?;
                }
            },
            Command::Unknown(cmd) => {
                self.append_message(terminal, ChatMessage::Info(format!("Unknown command: /{}", cmd)))?;
            }
        }
        Ok(())
    }

    fn handle_events(&mut self, terminal: &mut TuiTerminal) -> UiResult<bool> {
        while let Ok(update) = self.session_rx.try_recv() {
            self.apply_session_update(terminal, update)?;
        }
        while let Ok(event) = self.ui_rx.try_recv() {
            self.apply_ui_event(terminal, event)?;
        }

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c')
                {
                    self.should_quit = true;
                    return Ok(false);
                }

                match key.code {
                    KeyCode::Esc => {
                        if self.session.is_busy() {
                            self.session.cancel();
                        } else {
                            self.should_quit = true;
                            return Ok(false);
                        }
                    }
                    KeyCode::Enter => {
                        if key.modifiers.contains(KeyModifiers::SHIFT) {
                            self.input.new_line();
                        } else if !self.input.is_empty() {
                            let raw = self.input.to_string();
                            let trimmed = raw.trim();
                            if trimmed.starts_with('/') {
                                let command = parse_command(trimmed);
                                self.input.clear();
                                self.run_command(terminal, command)?;
                            } else if !trimmed.is_empty() {
                                self.send_message(terminal, trimmed.to_string())?;
                            }
                        }
                    }
                    KeyCode::Char(c) => {
                        self.input.insert_char(c);
                    }
                    KeyCode::Backspace => {
                        self.input.delete_char();
                    }
                    KeyCode::Left => {
                        self.input.move_left();
                    }
                    KeyCode::Right => {
                        self.input.move_right();
                    }
                    KeyCode::Up => {
                        self.input.move_up();
                    }
                    KeyCode::Down => {
                        self.input.move_down();
                    }
                    KeyCode::Home => {
                        self.input.cursor_x = 0;
                    }
                    KeyCode::End => {
                        self.input.cursor_x =
                            self.input.lines[self.input.cursor_y].chars().count();
                    }
                    _ => {}
                }
            }
        }

        Ok(true)
    }
}

pub fn run_tui(client: ApiClient) -> UiResult<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    let (_, rows) = size()?;
    if rows > 0 {
        // Push existing screen content into scrollback without clearing it.
        for _ in 0..rows {
            writeln!(stdout)?;
        }
        stdout.flush()?;
    }
    execute!(stdout, MoveTo(0, 0))?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::with_options(
        backend,
        TerminalOptions {
            viewport: Viewport::Inline(STATUS_HEIGHT + INPUT_HEIGHT),
        },
    )?;

    let mut app = App::new(client);

    let _guard = TerminalGuard::new();

    let banner = format!(
        "Welcome to Xuanming ({}). Enter sends, Shift+Enter inserts a newline.",
        app.client.base_url()
    );
    app.append_message(&mut terminal, ChatMessage::Info(banner))?;
    app.refresh_conversations();

    terminal.draw(|f| app.draw(f))?;

    while !app.should_quit {
        if !app.handle_events(&mut terminal)? {
            break;
        }

        terminal.draw(|f| app.draw(f))?;

        std::thread::sleep(Duration::from_millis(10));
    }

    disable_raw_mode()?;
    let mut stdout = io::stdout();
    stdout.flush()?;

    Ok(())
}
