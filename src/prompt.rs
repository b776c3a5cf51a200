/// The interactive collaborator around the custody flows.
///
/// Flows ask for exactly two things (a PIN and a public-key destination)
/// and push status through `notify`. Declining a request is a normal
/// answer (`Prompt::Cancelled`), not an error.
use std::io::{BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use parking_lot::Mutex;
use tracing::{error, info, warn};
use zeroize::Zeroizing;

use crate::crypto::kdf::Pin;
use crate::error::CustodyError;

/// Answer to a request: a value, or the user declined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt<T> {
    Provided(T),
    Cancelled,
}

/// Why a PIN is being asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinPurpose {
    /// Choosing the PIN for a new credential.
    Issue { length: usize },
    /// Unlocking an existing wrapped key.
    Unlock { attempt: u32, max_attempts: u32 },
}

/// Status and error messages for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Info(String),
    Warning(String),
    Error { code: &'static str, message: String },
}

#[async_trait]
pub trait Prompter: Send + Sync {
    async fn request_pin(&self, purpose: PinPurpose) -> Prompt<Pin>;

    /// Where to save the public key; `suggested` is a default the user may accept.
    async fn request_public_key_destination(&self, suggested: Option<&Path>) -> Prompt<PathBuf>;

    fn notify(&self, notice: Notice);
}

/// Surface a flow failure: user-facing message plus its reason code.
pub fn notify_error(prompter: &dyn Prompter, err: &CustodyError) {
    prompter.notify(Notice::Error {
        code: err.reason_code(),
        message: err.to_string(),
    });
}

fn log_notice(notice: &Notice) {
    match notice {
        Notice::Info(message) => info!("{message}"),
        Notice::Warning(message) => warn!("{message}"),
        Notice::Error { code, message } => error!(reason = code, "{message}"),
    }
}

/// Line-oriented prompts on stdin/stderr. An empty line cancels.
///
/// PINs are read with echo off when stdin is a terminal, showing `*`
/// per character.
#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl TerminalPrompter {
    async fn ask(question: String, masked: bool) -> Option<String> {
        let answer = tokio::task::spawn_blocking(move || {
            let mut stderr = std::io::stderr();
            let _ = write!(stderr, "{question}: ");
            let _ = stderr.flush();

            if masked && std::io::stdin().is_terminal() {
                read_masked(&mut stderr).ok().flatten()
            } else {
                read_line()
            }
        })
        .await
        .ok()
        .flatten()?;

        if answer.is_empty() {
            None
        } else {
            Some(answer)
        }
    }
}

fn read_line() -> Option<String> {
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
    }
}

fn read_masked(out: &mut impl Write) -> std::io::Result<Option<String>> {
    terminal::enable_raw_mode()?;
    let entered = collect_masked(std::iter::repeat_with(event::read), out);
    terminal::disable_raw_mode()?;
    write!(out, "\r\n")?;
    out.flush()?;
    entered
}

/// Enter accepts, Esc or Ctrl-C cancels, Backspace erases one character.
fn collect_masked(
    events: impl IntoIterator<Item = std::io::Result<Event>>,
    out: &mut impl Write,
) -> std::io::Result<Option<String>> {
    let mut entered = Zeroizing::new(String::new());
    for event in events {
        let Event::Key(KeyEvent {
            code,
            modifiers,
            kind,
            ..
        }) = event?
        else {
            continue;
        };
        if kind != KeyEventKind::Press {
            continue;
        }
        match code {
            KeyCode::Enter => return Ok(Some(std::mem::take(&mut *entered))),
            KeyCode::Esc => return Ok(None),
            KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => return Ok(None),
            KeyCode::Backspace => {
                if entered.pop().is_some() {
                    write!(out, "\x08 \x08")?;
                }
            }
            KeyCode::Char(c) => {
                entered.push(c);
                write!(out, "*")?;
            }
            _ => continue,
        }
        out.flush()?;
    }
    Ok(None)
}

#[async_trait]
impl Prompter for TerminalPrompter {
    async fn request_pin(&self, purpose: PinPurpose) -> Prompt<Pin> {
        let question = match purpose {
            PinPurpose::Issue { length } => format!("Enter a {length}-digit PIN"),
            PinPurpose::Unlock {
                attempt,
                max_attempts,
            } => format!("Enter your PIN (attempt {attempt}/{max_attempts})"),
        };
        match Self::ask(question, true).await {
            Some(pin) => Prompt::Provided(Pin::new(pin)),
            None => Prompt::Cancelled,
        }
    }

    async fn request_public_key_destination(&self, suggested: Option<&Path>) -> Prompt<PathBuf> {
        let question = match suggested {
            Some(path) => format!("Save public key as [{}]", path.display()),
            None => "Save public key as".to_string(),
        };
        let suggested = suggested.map(Path::to_path_buf);
        // An empty answer accepts the suggestion when there is one.
        match (Self::ask(question, false).await, suggested) {
            (Some(answer), _) if answer != "-" => Prompt::Provided(PathBuf::from(answer)),
            (None, Some(default)) => Prompt::Provided(default),
            _ => Prompt::Cancelled,
        }
    }

    fn notify(&self, notice: Notice) {
        log_notice(&notice);
        let line = match &notice {
            Notice::Info(message) => message.clone(),
            Notice::Warning(message) => format!("warning: {message}"),
            Notice::Error { message, .. } => format!("error: {message}"),
        };
        eprintln!("{line}");
    }
}

/// Non-interactive collaborator with preset answers, e.g. a PIN taken
/// from the environment. Keeps every notice it receives.
pub struct StaticPrompter {
    pins: Mutex<Vec<Pin>>,
    destination: Option<PathBuf>,
    notices: Mutex<Vec<Notice>>,
}

impl StaticPrompter {
    /// `pins` are handed out in order; once exhausted, PIN requests are cancelled.
    pub fn new(pins: Vec<Pin>, destination: Option<PathBuf>) -> Self {
        let mut pins = pins;
        pins.reverse();
        Self {
            pins: Mutex::new(pins),
            destination,
            notices: Mutex::new(Vec::new()),
        }
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().clone()
    }
}

#[async_trait]
impl Prompter for StaticPrompter {
    async fn request_pin(&self, _purpose: PinPurpose) -> Prompt<Pin> {
        let next = self.pins.lock().pop();
        match next {
            Some(pin) => Prompt::Provided(pin),
            None => Prompt::Cancelled,
        }
    }

    async fn request_public_key_destination(&self, suggested: Option<&Path>) -> Prompt<PathBuf> {
        match self.destination.clone().or_else(|| suggested.map(Path::to_path_buf)) {
            Some(path) => Prompt::Provided(path),
            None => Prompt::Cancelled,
        }
    }

    fn notify(&self, notice: Notice) {
        log_notice(&notice);
        self.notices.lock().push(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_prompter_hands_out_pins_in_order() {
        let prompter = StaticPrompter::new(vec![Pin::new("1111"), Pin::new("2222")], None);
        let purpose = PinPurpose::Issue { length: 4 };

        match prompter.request_pin(purpose).await {
            Prompt::Provided(pin) => assert_eq!(pin.as_str(), "1111"),
            Prompt::Cancelled => panic!("expected a PIN"),
        }
        match prompter.request_pin(purpose).await {
            Prompt::Provided(pin) => assert_eq!(pin.as_str(), "2222"),
            Prompt::Cancelled => panic!("expected a PIN"),
        }
        assert!(matches!(prompter.request_pin(purpose).await, Prompt::Cancelled));
    }

    #[tokio::test]
    async fn test_static_prompter_destination() {
        let fixed = StaticPrompter::new(vec![], Some(PathBuf::from("/tmp/pub.pem")));
        assert_eq!(
            fixed.request_public_key_destination(None).await,
            Prompt::Provided(PathBuf::from("/tmp/pub.pem"))
        );

        let suggested = StaticPrompter::new(vec![], None);
        assert_eq!(
            suggested
                .request_public_key_destination(Some(Path::new("/home/a/key.pem")))
                .await,
            Prompt::Provided(PathBuf::from("/home/a/key.pem"))
        );
        assert_eq!(
            suggested.request_public_key_destination(None).await,
            Prompt::Cancelled
        );
    }

    fn keys(codes: &[KeyCode]) -> Vec<std::io::Result<Event>> {
        codes
            .iter()
            .map(|code| Ok(Event::Key(KeyEvent::new(*code, KeyModifiers::NONE))))
            .collect()
    }

    #[test]
    fn test_masked_entry_never_echoes_digits() {
        let mut screen = Vec::new();
        let events = keys(&[
            KeyCode::Char('1'),
            KeyCode::Char('2'),
            KeyCode::Char('3'),
            KeyCode::Char('4'),
            KeyCode::Enter,
        ]);
        let pin = collect_masked(events, &mut screen).unwrap();
        assert_eq!(pin.as_deref(), Some("1234"));
        assert_eq!(screen, b"****");
    }

    #[test]
    fn test_masked_entry_backspace_and_release_events() {
        let mut screen = Vec::new();
        let mut events = keys(&[KeyCode::Char('1'), KeyCode::Char('2'), KeyCode::Backspace]);
        events.push(Ok(Event::Key(KeyEvent::new_with_kind(
            KeyCode::Char('9'),
            KeyModifiers::NONE,
            KeyEventKind::Release,
        ))));
        events.extend(keys(&[KeyCode::Char('3'), KeyCode::Enter]));

        let pin = collect_masked(events, &mut screen).unwrap();
        assert_eq!(pin.as_deref(), Some("13"));
        assert_eq!(screen, b"**\x08 \x08*");
    }

    #[test]
    fn test_masked_entry_cancel() {
        let mut screen = Vec::new();
        let esc = keys(&[KeyCode::Char('1'), KeyCode::Esc]);
        assert_eq!(collect_masked(esc, &mut screen).unwrap(), None);

        let ctrl_c: Vec<std::io::Result<Event>> = vec![Ok(Event::Key(KeyEvent::new(
            KeyCode::Char('c'),
            KeyModifiers::CONTROL,
        )))];
        assert_eq!(collect_masked(ctrl_c, &mut screen).unwrap(), None);

        let exhausted: Vec<std::io::Result<Event>> = Vec::new();
        assert_eq!(collect_masked(exhausted, &mut screen).unwrap(), None);
    }

    #[test]
    fn test_static_prompter_records_notices() {
        let prompter = StaticPrompter::new(vec![], None);
        prompter.notify(Notice::Info("hello".into()));
        prompter.notify(Notice::Error {
            code: "io_error",
            message: "nope".into(),
        });
        assert_eq!(prompter.notices().len(), 2);
    }
}
