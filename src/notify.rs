use std::error::Error;
use std::fmt;
use std::io::{self, IsTerminal, Write};

use serde::Serialize;

use crate::config::NotificationConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
}

impl From<&NotificationConfig> for Notification {
    fn from(value: &NotificationConfig) -> Self {
        Self {
            title: value.title.clone(),
            body: value.body.clone(),
        }
    }
}

#[derive(Debug)]
pub enum NotifyError {
    Io(io::Error),
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyError::Io(err) => write!(f, "notification I/O error: {}", err),
        }
    }
}

impl Error for NotifyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            NotifyError::Io(err) => Some(err),
        }
    }
}

impl From<io::Error> for NotifyError {
    fn from(value: io::Error) -> Self {
        NotifyError::Io(value)
    }
}

/// User-visible notification facility. Delivery is fire-and-forget.
pub trait Notifier {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to stderr, highlighted when attached to a terminal.
pub struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let stderr = io::stderr();
        let colored = std::env::var_os("NO_COLOR").is_none() && stderr.is_terminal();
        let mut out = stderr.lock();
        if colored {
            writeln!(
                out,
                "\x1b[1;32m{}\x1b[0m: {}",
                notification.title, notification.body
            )?;
        } else {
            writeln!(out, "{}: {}", notification.title, notification.body)?;
        }
        Ok(())
    }
}
