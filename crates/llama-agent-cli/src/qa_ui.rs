//! Raw-mode terminal surfaces: the interactive Q&A screen, yes/no
//! confirmations, and the permission prompt.

use async_trait::async_trait;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use llama_agent_core::planning::{PlanInterviewer, QaOutcome, QaSession};
use llama_agent_core::{PermissionPrompt, PromptAnswer};
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const ANSI_RESET: &str = "\x1b[0m";
const ANSI_CYAN: &str = "\x1b[36m";
const ANSI_GREEN: &str = "\x1b[32m";
const ANSI_YELLOW: &str = "\x1b[33m";
const ANSI_GRAY: &str = "\x1b[90m";
const ANSI_BOLD: &str = "\x1b[1m";
const ANSI_CLEAR_LINE: &str = "\x1b[2K";
const ANSI_CURSOR_UP: &str = "\x1b[A";
const ANSI_CURSOR_HIDE: &str = "\x1b[?25l";
const ANSI_CURSOR_SHOW: &str = "\x1b[?25h";

/// Restores the terminal on every exit path, panics included.
struct RawModeGuard {
    active: bool,
}

impl RawModeGuard {
    fn enter() -> Self {
        let active = enable_raw_mode().is_ok();
        Self { active }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.active {
            let _ = disable_raw_mode();
        }
        print!("{ANSI_CURSOR_SHOW}");
        let _ = std::io::stdout().flush();
    }
}

/// Interactive Q&A and confirmation prompts over crossterm.
#[derive(Debug, Default)]
pub struct TerminalInterviewer;

#[async_trait]
impl PlanInterviewer for TerminalInterviewer {
    async fn run_qa(&self, session: &mut QaSession, interrupt: &Arc<AtomicBool>) -> QaOutcome {
        let interrupt = interrupt.clone();
        tokio::task::block_in_place(|| run_qa_screen(session, &interrupt))
    }

    async fn confirm(&self, prompt: &str) -> bool {
        let prompt = prompt.to_string();
        tokio::task::block_in_place(move || confirm_blocking(&prompt))
    }

    async fn inform(&self, message: &str) {
        println!("{message}");
    }
}

/// Terminal y/n/a permission prompt.
#[derive(Debug, Default)]
pub struct TerminalPermissionPrompt;

#[async_trait]
impl PermissionPrompt for TerminalPermissionPrompt {
    async fn ask(&self, tool: &str, resource: &str) -> PromptAnswer {
        let prompt = format!(
            "{ANSI_YELLOW}Allow {tool} on '{resource}'? (y/n/a=always){ANSI_RESET} "
        );
        tokio::task::block_in_place(move || {
            print!("\n{prompt}");
            let _ = std::io::stdout().flush();
            let _guard = RawModeGuard::enter();
            loop {
                let Ok(Event::Key(key)) = event::read() else {
                    return PromptAnswer::No;
                };
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match key.code {
                    KeyCode::Char('y') | KeyCode::Char('Y') => {
                        println!("y\r");
                        return PromptAnswer::Yes;
                    }
                    KeyCode::Char('a') | KeyCode::Char('A') => {
                        println!("a\r");
                        return PromptAnswer::Always;
                    }
                    KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                        println!("n\r");
                        return PromptAnswer::No;
                    }
                    _ => {}
                }
            }
        })
    }
}

fn confirm_blocking(prompt: &str) -> bool {
    print!("\n{prompt} (y/n): ");
    let _ = std::io::stdout().flush();
    let _guard = RawModeGuard::enter();
    loop {
        let Ok(Event::Key(key)) = event::read() else {
            return false;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') => {
                println!("y\r");
                return true;
            }
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                println!("n\r");
                return false;
            }
            _ => {}
        }
    }
}

struct QaScreen<'a> {
    session: &'a mut QaSession,
    current_option_index: usize,
    in_custom_mode: bool,
    custom_input: String,
    first_render: bool,
}

enum ScreenStep {
    Continue,
    Finished(QaOutcome),
}

fn run_qa_screen(session: &mut QaSession, interrupt: &Arc<AtomicBool>) -> QaOutcome {
    if session.questions.is_empty() {
        return QaOutcome::Completed;
    }

    let guard = RawModeGuard::enter();
    if !guard.active {
        eprintln!("Failed to enter raw terminal mode for the Q&A screen");
        return QaOutcome::Aborted;
    }

    let mut screen = QaScreen::new(session);
    print!("{ANSI_CURSOR_HIDE}");
    screen.render();

    loop {
        if interrupt.load(Ordering::SeqCst) {
            return QaOutcome::Interrupted;
        }
        match event::poll(Duration::from_millis(100)) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(_) => return QaOutcome::Aborted,
        }
        let Ok(Event::Key(key)) = event::read() else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        match screen.handle_key(key, interrupt) {
            ScreenStep::Continue => screen.render(),
            ScreenStep::Finished(outcome) => return outcome,
        }
    }
}

impl<'a> QaScreen<'a> {
    fn new(session: &'a mut QaSession) -> Self {
        let mut screen = Self {
            session,
            current_option_index: 0,
            in_custom_mode: false,
            custom_input: String::new(),
            first_render: true,
        };
        screen.restore_selection();
        screen
    }

    /// Pick up any pre-existing answer when entering a question, so a
    /// resumed session shows the prior selections.
    fn restore_selection(&mut self) {
        self.in_custom_mode = false;
        self.custom_input.clear();
        let Some(question) = self
            .session
            .questions
            .get(self.session.current_question_index)
        else {
            return;
        };
        if question.is_custom {
            self.current_option_index = question.options.len();
            self.custom_input = question.selected_answer.clone();
        } else if question.selected_option_index >= 0 {
            self.current_option_index = question.selected_option_index as usize;
        } else {
            self.current_option_index = 0;
        }
    }

    fn option_count(&self) -> usize {
        self.session
            .questions
            .get(self.session.current_question_index)
            .map(|question| question.options.len() + 1)
            .unwrap_or(0)
    }

    fn handle_key(&mut self, key: KeyEvent, interrupt: &Arc<AtomicBool>) -> ScreenStep {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            match key.code {
                KeyCode::Char('c') => {
                    interrupt.store(true, Ordering::SeqCst);
                    return ScreenStep::Finished(QaOutcome::Interrupted);
                }
                KeyCode::Char('d') => {
                    if self.session.is_complete() {
                        return ScreenStep::Finished(QaOutcome::Completed);
                    }
                    return ScreenStep::Continue;
                }
                _ => return ScreenStep::Continue,
            }
        }

        if self.in_custom_mode {
            return self.handle_custom_key(key);
        }

        match key.code {
            KeyCode::Up | KeyCode::Char('k') => {
                if self.current_option_index > 0 {
                    self.current_option_index -= 1;
                }
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if self.current_option_index + 1 < self.option_count() {
                    self.current_option_index += 1;
                }
            }
            KeyCode::Left | KeyCode::Char('h') => self.prev_tab(),
            KeyCode::Right | KeyCode::Char('l') => self.next_tab(),
            KeyCode::Tab => self.toggle_custom_mode(),
            KeyCode::Enter => {
                self.select_current_option();
                if self.session.is_complete() {
                    return ScreenStep::Finished(QaOutcome::Completed);
                }
                self.jump_to_next_unanswered();
            }
            KeyCode::Esc | KeyCode::Char('q') => {
                if confirm_abort() {
                    return ScreenStep::Finished(QaOutcome::Aborted);
                }
            }
            _ => {}
        }
        ScreenStep::Continue
    }

    fn handle_custom_key(&mut self, key: KeyEvent) -> ScreenStep {
        match key.code {
            KeyCode::Enter => {
                if !self.custom_input.is_empty() {
                    self.select_current_option();
                    self.in_custom_mode = false;
                    if self.session.is_complete() {
                        return ScreenStep::Finished(QaOutcome::Completed);
                    }
                    self.jump_to_next_unanswered();
                }
            }
            KeyCode::Backspace => {
                self.custom_input.pop();
            }
            KeyCode::Esc => {
                self.in_custom_mode = false;
                self.custom_input.clear();
            }
            KeyCode::Char(c) if !c.is_control() => self.custom_input.push(c),
            _ => {}
        }
        ScreenStep::Continue
    }

    fn next_tab(&mut self) {
        self.save_current_selection();
        if self.session.current_question_index + 1 < self.session.questions.len() {
            self.session.current_question_index += 1;
            self.restore_selection();
        }
    }

    fn prev_tab(&mut self) {
        self.save_current_selection();
        if self.session.current_question_index > 0 {
            self.session.current_question_index -= 1;
            self.restore_selection();
        }
    }

    fn toggle_custom_mode(&mut self) {
        let question = &self.session.questions[self.session.current_question_index];
        self.in_custom_mode = !self.in_custom_mode;
        if self.in_custom_mode {
            self.current_option_index = question.options.len();
            self.custom_input = if question.is_custom {
                question.selected_answer.clone()
            } else {
                String::new()
            };
        }
    }

    fn select_current_option(&mut self) {
        let question = &mut self.session.questions[self.session.current_question_index];
        if self.current_option_index < question.options.len() {
            question.selected_answer = question.options[self.current_option_index].clone();
            question.selected_option_index = self.current_option_index as i64;
            question.is_custom = false;
        } else if self.in_custom_mode && !self.custom_input.is_empty() {
            question.selected_answer = self.custom_input.clone();
            question.selected_option_index = -1;
            question.is_custom = true;
        }
    }

    /// Persist an in-progress custom entry when switching tabs.
    fn save_current_selection(&mut self) {
        if self.in_custom_mode && !self.custom_input.is_empty() {
            let question = &mut self.session.questions[self.session.current_question_index];
            question.selected_answer = self.custom_input.clone();
            question.selected_option_index = -1;
            question.is_custom = true;
        }
    }

    fn jump_to_next_unanswered(&mut self) {
        let total = self.session.questions.len();
        let start = self.session.current_question_index;
        for step in 1..=total {
            let index = (start + step) % total;
            if !self.session.questions[index].is_answered() {
                self.session.current_question_index = index;
                self.restore_selection();
                return;
            }
        }
    }

    fn render(&mut self) {
        if !self.first_render {
            // Tabs box (3) + spacing (1) + question (2) + options + custom
            // row + help spacing (1) + help box (3).
            let lines_to_clear = 10 + self.option_count();
            for _ in 0..lines_to_clear {
                print!("{ANSI_CURSOR_UP}{ANSI_CLEAR_LINE}");
            }
        }
        self.first_render = false;

        self.render_tabs();
        print!("\r\n");
        self.render_question();
        self.render_options();
        self.render_help();
        let _ = std::io::stdout().flush();
    }

    fn render_tabs(&self) {
        let rule = format!("+{}+", "-".repeat(terminal_width().saturating_sub(2)));
        print!("{rule}\r\n| ");
        for (index, question) in self.session.questions.iter().enumerate() {
            let is_current = index == self.session.current_question_index;
            let marker = if is_current {
                format!("{ANSI_BOLD}{ANSI_CYAN}[Q{}*]{ANSI_RESET}", index + 1)
            } else if question.is_answered() {
                format!("{ANSI_GREEN}[Q{}+]{ANSI_RESET}", index + 1)
            } else {
                format!("[Q{}]", index + 1)
            };
            print!("{marker} ");
        }
        print!("\r\n{rule}\r\n");
    }

    fn render_question(&self) {
        let question = &self.session.questions[self.session.current_question_index];
        print!("{ANSI_BOLD}Q{}: {}{ANSI_RESET}\r\n\r\n", question.id, question.text);
    }

    fn render_options(&self) {
        let question = &self.session.questions[self.session.current_question_index];
        for (index, option) in question.options.iter().enumerate() {
            let cursor = if index == self.current_option_index && !self.in_custom_mode {
                format!("{ANSI_CYAN} > ")
            } else {
                "   ".to_string()
            };
            let check = if question.selected_option_index == index as i64 {
                format!("{ANSI_GREEN}[x]{ANSI_RESET}")
            } else {
                "[ ]".to_string()
            };
            print!("{cursor}{check} {option}{ANSI_RESET}\r\n");
        }

        let custom_selected =
            self.current_option_index == question.options.len() || self.in_custom_mode;
        let cursor = if custom_selected {
            format!("{ANSI_CYAN} > ")
        } else {
            "   ".to_string()
        };
        let check = if question.is_custom && question.is_answered() {
            format!("{ANSI_GREEN}[x]{ANSI_RESET}")
        } else {
            "[ ]".to_string()
        };
        print!("{cursor}{check} Custom: ");
        if self.in_custom_mode {
            print!("{ANSI_YELLOW}{}_{ANSI_RESET}", self.custom_input);
        } else if question.is_custom && question.is_answered() {
            print!("{ANSI_GREEN}{}{ANSI_RESET}", question.selected_answer);
        } else {
            print!("{ANSI_GRAY}_______________{ANSI_RESET}");
        }
        print!("\r\n");
    }

    fn render_help(&self) {
        let rule = format!("+{}+", "-".repeat(terminal_width().saturating_sub(2)));
        print!("\r\n{rule}\r\n{ANSI_GRAY}");
        if self.in_custom_mode {
            print!("| Type answer, Enter to confirm, ESC to cancel custom input");
        } else {
            print!("| <- -> tabs | up/down select | Enter confirm | Tab custom | ESC abort");
        }
        if self.session.is_complete() {
            print!(" | {ANSI_GREEN}Ctrl+D submit{ANSI_RESET}{ANSI_GRAY}");
        }
        print!("{ANSI_RESET}\r\n{rule}\r\n");
    }
}

fn confirm_abort() -> bool {
    print!("\r\n{ANSI_YELLOW}Abort planning? (y/N): {ANSI_RESET}");
    let _ = std::io::stdout().flush();
    loop {
        match event::read() {
            Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                return matches!(key.code, KeyCode::Char('y') | KeyCode::Char('Y'));
            }
            Ok(_) => continue,
            Err(_) => return false,
        }
    }
}

fn terminal_width() -> usize {
    crossterm::terminal::size()
        .map(|(columns, _rows)| columns as usize)
        .unwrap_or(80)
}
