use std::io::Write;
use std::sync::Arc;

use selah_chat::{
    ChatController, ChatEvent, ChatSession, GenerationOutcome, GenerationTarget, Role,
};
use snafu::ResultExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use crate::error::{AppResult, ReadInputSnafu};
use crate::settings::SettingsStore;

const HELP: &str = "\
commands:
  /new              start a new chat
  /list             list chats
  /select <n>       switch to chat n from /list
  /rename <title>   rename the current chat
  /delete           delete the current chat
  /regen            regenerate the last reply
  /stop             stop the reply being written
  /key <api key>    save the provider API key
  /quit             exit
anything else is sent as a message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    New,
    List,
    /// One-based index into `/list`.
    Select(usize),
    Rename(String),
    Delete,
    Regenerate,
    Stop,
    SetKey(String),
    Help,
    Quit,
    Unknown(String),
}

impl Command {
    /// Returns `None` for blank lines.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let Some(command) = line.strip_prefix('/') else {
            return Some(Self::Send(line.to_string()));
        };

        let (name, argument) = match command.split_once(char::is_whitespace) {
            Some((name, argument)) => (name, argument.trim()),
            None => (command, ""),
        };

        let parsed = match (name, argument) {
            ("new", "") => Self::New,
            ("list", "") => Self::List,
            ("select", index) => match index.parse::<usize>() {
                Ok(index) if index > 0 => Self::Select(index),
                _ => Self::Unknown(line.to_string()),
            },
            ("rename", title) if !title.is_empty() => Self::Rename(title.to_string()),
            ("delete", "") => Self::Delete,
            ("regen", "") => Self::Regenerate,
            ("stop", "") => Self::Stop,
            ("key", key) if !key.is_empty() => Self::SetKey(key.to_string()),
            ("help", "") => Self::Help,
            ("quit" | "exit", "") => Self::Quit,
            _ => Self::Unknown(line.to_string()),
        };
        Some(parsed)
    }
}

pub struct Runner {
    controller: ChatController,
    settings: Arc<SettingsStore>,
}

impl Runner {
    pub fn new(controller: ChatController, settings: Arc<SettingsStore>) -> Self {
        Self {
            controller,
            settings,
        }
    }

    pub async fn run(self) -> AppResult<()> {
        let printer = tokio::spawn(print_events(self.controller.subscribe()));

        println!("{HELP}");
        self.print_active();

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines
            .next_line()
            .await
            .context(ReadInputSnafu { stage: "read-line" })?
        {
            let Some(command) = Command::parse(&line) else {
                continue;
            };
            if !self.execute(command).await {
                break;
            }
        }

        if let Some(target) = self.controller.active_generation() {
            self.controller.cancel_generation(target.message_id);
        }
        printer.abort();
        Ok(())
    }

    /// Returns `false` when the loop should stop.
    async fn execute(&self, command: Command) -> bool {
        match command {
            Command::Send(text) => {
                if let Err(error) = self.controller.send(text, None) {
                    println!("[{error}]");
                }
            }
            Command::New => {
                self.controller.create_session(true);
                self.print_active();
            }
            Command::List => self.print_sessions(),
            Command::Select(index) => match self.controller.sessions().get(index - 1) {
                Some(session) => {
                    self.controller.select_session(session.id);
                    self.print_active();
                }
                None => println!("[no chat {index}]"),
            },
            Command::Rename(title) => match self.controller.active_session_id() {
                Some(session_id) => {
                    if !self.controller.rename_session(session_id, title).await {
                        println!("[rename failed]");
                    }
                }
                None => println!("[no active chat]"),
            },
            Command::Delete => match self.controller.active_session_id() {
                Some(session_id) => match self.controller.delete_session(session_id).await {
                    Ok(_) => self.print_active(),
                    Err(error) => println!("[delete failed: {error}]"),
                },
                None => println!("[no active chat]"),
            },
            Command::Regenerate => match self.controller.regenerate() {
                Ok(Some(_)) => {}
                Ok(None) => println!("[nothing to regenerate]"),
                Err(error) => println!("[{error}]"),
            },
            Command::Stop => match self.controller.active_generation() {
                Some(target) => {
                    self.controller.cancel_generation(target.message_id);
                }
                None => println!("[nothing to stop]"),
            },
            Command::SetKey(api_key) => {
                let mut settings = (*self.settings.settings()).clone();
                settings.provider.api_key = api_key;
                match self.settings.update(settings) {
                    Ok(()) => println!(
                        "[API key saved to {}]",
                        self.settings.config_path().display()
                    ),
                    Err(error) => println!("[{error}]"),
                }
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => return false,
            Command::Unknown(line) => println!("[unknown command `{line}`, try /help]"),
        }
        true
    }

    fn print_sessions(&self) {
        let active = self.controller.active_session_id();
        for (index, session) in self.controller.sessions().iter().enumerate() {
            let marker = if Some(session.id) == active { '*' } else { ' ' };
            println!(
                "{marker} {:>2}. {} ({} messages)",
                index + 1,
                session.title,
                session.messages.len()
            );
        }
    }

    fn print_active(&self) {
        match self.controller.active_session() {
            Some(session) => print_transcript(&session),
            None => println!("[no active chat]"),
        }
    }
}

fn print_transcript(session: &ChatSession) {
    println!("== {} ==", session.title);
    for message in &session.messages {
        let speaker = match message.role {
            Role::User => "you",
            Role::Model => "selah",
        };
        println!("{speaker}> {}", message.text);
    }
}

/// Prints streamed replies as they grow.
async fn print_events(mut events: broadcast::Receiver<ChatEvent>) {
    let mut printed: Option<(GenerationTarget, usize)> = None;

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "terminal output lagged behind chat events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event {
            ChatEvent::GenerationStarted(target) => {
                print!("selah> ");
                printed = Some((target, 0));
            }
            ChatEvent::MessageUpdated { target, text } => {
                let offset = match printed {
                    Some((current, length)) if current == target => length,
                    _ => 0,
                };
                print!("{}", text.get(offset..).unwrap_or(&text));
                printed = Some((target, text.len()));
            }
            ChatEvent::GenerationFinished { outcome, .. } => {
                println!();
                match outcome {
                    GenerationOutcome::Completed => {}
                    GenerationOutcome::Cancelled => println!("[stopped]"),
                    GenerationOutcome::Failed(reason) => println!("[reply failed: {reason}]"),
                }
                printed = None;
            }
            ChatEvent::TitleChanged { title, .. } => println!("[title: {title}]"),
            ChatEvent::CredentialRequired => {
                println!("[no API key: use /key <api key> or set OPENAI_API_KEY]");
            }
            _ => continue,
        }
        let _ = std::io::stdout().flush();
    }
}
