use std::io::{self, Write};
use std::sync::mpsc::{Receiver, Sender};

use crossterm::cursor::MoveTo;
use crossterm::execute;
use crossterm::style::Stylize;
use crossterm::terminal::{Clear, ClearType};

use crate::msg::{Msg, Notice};

/// Output and confirmation seam between shell commands and the terminal.
pub trait Console {
    fn notify(&mut self, notice: Notice);

    /// Ask a yes/no question. Anything but an explicit yes is a decline.
    fn confirm(&mut self, prompt: &str, default: bool) -> bool;

    fn clear_screen(&mut self) {}
}

/// Hands out permission to read one line of stdin at a time.
///
/// The reader thread only reads after a request, so a running application
/// keeps the terminal's input to itself.
pub struct InputGate {
    requests: Sender<()>,
    pending: bool,
}

impl InputGate {
    pub fn new(requests: Sender<()>) -> Self {
        Self {
            requests,
            pending: false,
        }
    }

    /// Ask for the next line unless a read is already outstanding.
    pub fn request(&mut self) {
        if !self.pending && self.requests.send(()).is_ok() {
            self.pending = true;
        }
    }

    /// Record that the reader delivered a line or hit end of input.
    pub fn received(&mut self) {
        self.pending = false;
    }
}

/// Console backed by stdout, reading confirmation answers from the input channel.
///
/// Messages that are not answers (file changes) are parked in `deferred` so the
/// main loop can replay them once the command finishes.
pub struct TerminalConsole<'a> {
    rx: &'a Receiver<Msg>,
    input: &'a mut InputGate,
    deferred: &'a mut Vec<Msg>,
    break_line: bool,
}

impl<'a> TerminalConsole<'a> {
    pub fn new(
        rx: &'a Receiver<Msg>,
        input: &'a mut InputGate,
        deferred: &'a mut Vec<Msg>,
    ) -> Self {
        Self {
            rx,
            input,
            deferred,
            break_line: false,
        }
    }

    /// Start output on a fresh line; the cursor is sitting after a prompt.
    pub fn after_prompt(mut self) -> Self {
        self.break_line = true;
        self
    }

    /// Whether anything was written since an `after_prompt` console was made.
    pub fn interrupted_prompt(&self) -> bool {
        !self.break_line
    }

    fn start_line(&mut self) {
        if self.break_line {
            println!();
            self.break_line = false;
        }
    }
}

impl Console for TerminalConsole<'_> {
    fn notify(&mut self, notice: Notice) {
        self.start_line();
        println!("{}", render_notice(&notice));
    }

    fn confirm(&mut self, prompt: &str, default: bool) -> bool {
        self.start_line();
        let hint = if default { "(Y/n)" } else { "(y/N)" };
        print!("{} ", format!("{prompt} {hint}:").yellow());
        let _ = io::stdout().flush();
        self.input.request();

        loop {
            match self.rx.recv() {
                Ok(Msg::Line(answer)) => {
                    self.input.received();
                    return parse_answer(&answer, default);
                }
                Ok(Msg::Interrupt) => {
                    // The stdin read stays requested and answers the next
                    // prompt; the shell drops the rest of the line.
                    println!("^C");
                    return false;
                }
                Ok(Msg::Eof) => {
                    self.input.received();
                    println!();
                    self.deferred.push(Msg::Eof);
                    return false;
                }
                Ok(other) => self.deferred.push(other),
                Err(_) => return false,
            }
        }
    }

    fn clear_screen(&mut self) {
        if let Err(err) = execute!(io::stdout(), Clear(ClearType::All), MoveTo(0, 0)) {
            tracing::debug!("clear failed: {err}");
        }
    }
}

pub fn render_notice(notice: &Notice) -> String {
    match notice {
        Notice::Info(text) => text.clone(),
        Notice::Success(text) => text.as_str().green().to_string(),
        Notice::Warn(text) => format!("Warning: {text}").yellow().to_string(),
        Notice::Error(text) => format!("Error: {text}").red().to_string(),
    }
}

fn parse_answer(answer: &str, default: bool) -> bool {
    match answer.trim().to_lowercase().as_str() {
        "" => default,
        "y" | "yes" => true,
        _ => false,
    }
}

/// Console that records notices and replays scripted answers.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingConsole {
    pub notices: Vec<Notice>,
    pub answers: std::collections::VecDeque<bool>,
    pub prompts: Vec<String>,
}

#[cfg(test)]
impl RecordingConsole {
    pub fn answering(answers: &[bool]) -> Self {
        Self {
            answers: answers.iter().copied().collect(),
            ..Self::default()
        }
    }

    pub fn warnings(&self) -> Vec<&str> {
        self.notices
            .iter()
            .filter_map(|notice| match notice {
                Notice::Warn(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<&str> {
        self.notices
            .iter()
            .filter_map(|notice| match notice {
                Notice::Error(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.notices.iter().any(|notice| notice.text().contains(needle))
    }
}

#[cfg(test)]
impl Console for RecordingConsole {
    fn notify(&mut self, notice: Notice) {
        self.notices.push(notice);
    }

    fn confirm(&mut self, prompt: &str, _default: bool) -> bool {
        self.prompts.push(prompt.to_string());
        self.answers.pop_front().unwrap_or(false)
    }
}
