use std::path::PathBuf;

/// All possible messages that drive state transitions.
#[derive(Debug)]
pub enum Msg {
    // -- Input events (raw)
    Line(String),
    Interrupt,
    Eof,

    // -- File I/O
    FileChanged(PathBuf),
}

/// Human-readable status text produced by shell commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Info(String),
    Success(String),
    Warn(String),
    Error(String),
}

impl Notice {
    pub fn info(text: impl Into<String>) -> Self {
        Self::Info(text.into())
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self::Success(text.into())
    }

    pub fn warn(text: impl Into<String>) -> Self {
        Self::Warn(text.into())
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::Error(text.into())
    }

    pub fn text(&self) -> &str {
        match self {
            Notice::Info(text)
            | Notice::Success(text)
            | Notice::Warn(text)
            | Notice::Error(text) => text,
        }
    }
}
