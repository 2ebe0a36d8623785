//! Terminal front-end: ask questions and manage saved conversations.
//! Run with: `cargo run --bin mentor-chat-cli`

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use mentor_chat::config::AppConfig;
use mentor_chat::conversation::{ConversationSession, SAMPLE_QUESTIONS, sample_question};
use mentor_chat::error::{ChatError, ChatResult};
use mentor_chat::history::{JsonDirHistoryStore, SavedHistoryRecord};
use mentor_chat::llm::{ChatClient, StreamSink};
use mentor_chat::start;

const RULE: &str = "----------------------------------------";

#[derive(Debug, Parser)]
#[command(name = "mentor-chat-cli", version, about = "Chat with the mentor model from a terminal")]
struct Args {
    /// Wait for whole replies instead of streaming them.
    #[arg(long)]
    no_stream: bool,
    /// Directory holding saved conversations.
    #[arg(long)]
    history_dir: Option<PathBuf>,
    /// Model name sent to the API.
    #[arg(long)]
    model: Option<String>,
}

/// One line of REPL input.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Exit,
    ToggleStream,
    Save,
    Clear,
    History,
    Load(usize),
    Rename(usize, String),
    Delete(usize),
    Samples,
    Sample(usize),
    Help,
    Ask(String),
    Invalid(&'static str),
}

impl Command {
    /// Command words only win when their arguments fit; any other line is a question.
    fn parse(line: &str) -> Self {
        let line = line.trim();
        let (head, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(head, rest)| (head, rest.trim()));

        let command = match (head.to_ascii_lowercase().as_str(), rest) {
            ("", _) => Some(Self::Invalid("Please enter a valid question.")),
            ("exit" | "quit", "") => Some(Self::Exit),
            ("stream", "") => Some(Self::ToggleStream),
            ("save", "") => Some(Self::Save),
            ("clear" | "new", "") => Some(Self::Clear),
            ("history", "") => Some(Self::History),
            ("samples", "") => Some(Self::Samples),
            ("help", "") => Some(Self::Help),
            ("load", "") => Some(Self::Invalid("usage: load <n>")),
            ("delete", "") => Some(Self::Invalid("usage: delete <n>")),
            ("sample", "") => Some(Self::Invalid("usage: sample <n>")),
            ("rename", "") => Some(Self::Invalid("usage: rename <n> <name>")),
            ("load", arg) => parse_index(arg).map(Self::Load),
            ("delete", arg) => parse_index(arg).map(Self::Delete),
            ("sample", arg) => parse_index(arg).map(Self::Sample),
            ("rename", arg) => parse_rename(arg),
            _ => None,
        };
        command.unwrap_or_else(|| Self::Ask(line.to_string()))
    }
}

/// `<n> <name>`; a bare index is a usage error.
fn parse_rename(arg: &str) -> Option<Command> {
    let (n, name) = arg
        .split_once(char::is_whitespace)
        .map_or((arg, ""), |(n, name)| (n, name.trim()));
    let n = parse_index(n)?;
    if name.is_empty() {
        return Some(Command::Invalid("usage: rename <n> <name>"));
    }
    Some(Command::Rename(n, name.to_string()))
}

/// 1-based listing position.
fn parse_index(raw: &str) -> Option<usize> {
    raw.trim().parse().ok().filter(|n| *n > 0)
}

/// Prints only the part of the cumulative text not yet shown.
struct TerminalSink {
    printed: usize,
}

impl StreamSink for TerminalSink {
    fn partial(&mut self, text: &str) {
        if let Some(fresh) = text.get(self.printed..) {
            let mut out = io::stdout().lock();
            let _ = out.write_all(fresh.as_bytes());
            let _ = out.flush();
        }
        self.printed = text.len();
    }
}

struct Repl {
    session: ConversationSession<ChatClient>,
    list_limit: usize,
    label_max_chars: usize,
}

impl Repl {
    async fn run(&mut self) -> io::Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print_flush("\nYour question: ")?;
            let Some(line) = lines.next_line().await? else {
                break;
            };
            let command = Command::parse(&line);
            if command == Command::Exit {
                break;
            }
            self.dispatch(command).await?;
        }

        if let Err(e) = self.session.auto_save().await {
            tracing::error!("Could not save the conversation: {e}");
        }
        writeln!(io::stdout(), "Goodbye! Keep coding securely!")
    }

    async fn dispatch(&mut self, command: Command) -> io::Result<()> {
        let mut out = io::stdout();
        match command {
            Command::Exit => {}
            Command::Invalid(message) => writeln!(out, "{message}")?,
            Command::Help => writeln!(
                out,
                "Commands: exit, stream, save, clear, history, load <n>, rename <n> <name>, delete <n>, \
                 samples, sample <n>"
            )?,
            Command::Samples => print_samples()?,
            Command::Sample(n) => match sample_question(n) {
                Some(question) => {
                    writeln!(out, "\nYour question: {question}")?;
                    self.ask(question).await?;
                }
                None => writeln!(out, "No sample question #{n}; type 'samples' to list them.")?,
            },
            Command::ToggleStream => {
                let client = self.session.backend_mut();
                client.set_streaming(!client.is_streaming());
                let mode = if client.is_streaming() { "enabled" } else { "disabled" };
                writeln!(out, "Streaming mode {mode}")?;
            }
            Command::Save => match self.session.save().await {
                Ok(Some(id)) => writeln!(out, "Saved as {id}")?,
                Ok(None) => writeln!(out, "Nothing new to save.")?,
                Err(e) => report(&e)?,
            },
            Command::Clear => match self.session.clear().await {
                Ok(saved) => {
                    announce_auto_save(saved.as_ref())?;
                    writeln!(out, "Started a new conversation.")?;
                }
                Err(e) => report(&e)?,
            },
            Command::History => self.print_history().await?,
            Command::Load(n) => match self.nth_record(n).await {
                Ok(record) => {
                    let name = record.display_name.clone();
                    match self.session.load(record).await {
                        Ok(saved) => {
                            announce_auto_save(saved.as_ref())?;
                            writeln!(out, "Loaded \"{name}\"")?;
                            self.print_conversation()?;
                        }
                        Err(e) => report(&e)?,
                    }
                }
                Err(e) => report(&e)?,
            },
            Command::Rename(n, name) => {
                let result = match self.nth_record(n).await {
                    Ok(record) => self.session.rename_saved(&record.id, &name).await,
                    Err(e) => Err(e),
                };
                match result {
                    Ok(()) => writeln!(out, "Renamed to \"{name}\"")?,
                    Err(e) => report(&e)?,
                }
            }
            Command::Delete(n) => {
                let result = match self.nth_record(n).await {
                    Ok(record) => self
                        .session
                        .delete_saved(&record.id)
                        .await
                        .map(|()| record.display_name.clone()),
                    Err(e) => Err(e),
                };
                match result {
                    Ok(name) => writeln!(out, "Deleted \"{name}\"")?,
                    Err(e) => report(&e)?,
                }
            }
            Command::Ask(query) => self.ask(&query).await?,
        }
        Ok(())
    }

    async fn ask(&mut self, query: &str) -> io::Result<()> {
        let streaming = self.session.backend().is_streaming();
        writeln!(io::stdout(), "\nResponse:\n{RULE}")?;

        let mut sink = TerminalSink { printed: 0 };
        let result = self.session.ask(query, &mut sink).await;
        let mut out = io::stdout();
        match result {
            Ok(outcome) => {
                if !streaming && sink.printed == 0 {
                    writeln!(out, "{}", outcome.reply)?;
                }
                writeln!(out, "\n{RULE}")?;
                announce_auto_save(outcome.auto_saved.as_ref())?;
            }
            Err(e) => {
                writeln!(out, "\n{RULE}")?;
                report(&e)?;
            }
        }
        Ok(())
    }

    async fn print_history(&self) -> io::Result<()> {
        let mut out = io::stdout();
        match self.session.list_saved().await {
            Ok(records) if records.is_empty() => writeln!(out, "No saved conversations yet.")?,
            Ok(records) => {
                for (i, record) in records.iter().take(self.list_limit).enumerate() {
                    let when = record
                        .created_at()
                        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_default();
                    writeln!(out, "{:>3}. {}  {when}", i + 1, record.short_label(self.label_max_chars))?;
                }
            }
            Err(e) => report(&e)?,
        }
        Ok(())
    }

    fn print_conversation(&self) -> io::Result<()> {
        let mut out = io::stdout();
        for message in self.session.messages() {
            writeln!(out, "\n[{}]\n{}", message.role, message.content)?;
        }
        Ok(())
    }

    async fn nth_record(&self, n: usize) -> ChatResult<SavedHistoryRecord> {
        self.session
            .list_saved()
            .await?
            .into_iter()
            .take(self.list_limit)
            .nth(n - 1)
            .ok_or_else(|| ChatError::NotFound(format!("no conversation #{n} in the history list")))
    }
}

fn print_flush(text: &str) -> io::Result<()> {
    let mut out = io::stdout();
    out.write_all(text.as_bytes())?;
    out.flush()
}

fn print_samples() -> io::Result<()> {
    let mut out = io::stdout();
    writeln!(out, "\nSample questions (ask one with 'sample <n>'):")?;
    let mut n = 0;
    for category in SAMPLE_QUESTIONS {
        writeln!(out, "\n{}:", category.title)?;
        for question in category.questions {
            n += 1;
            writeln!(out, "{n:>4}. {question}")?;
        }
    }
    Ok(())
}

fn announce_auto_save(id: Option<&mentor_chat::history::RecordId>) -> io::Result<()> {
    if let Some(id) = id {
        writeln!(io::stdout(), "Previous chat auto-saved: {id}")?;
    }
    Ok(())
}

fn report(err: &ChatError) -> io::Result<()> {
    writeln!(io::stderr(), "Error: {err}")
}

fn build_repl(args: Args) -> ChatResult<Repl> {
    let mut config = AppConfig::from_env()?;
    if args.no_stream {
        config = config.with_stream(false);
    }
    if let Some(dir) = args.history_dir {
        config = config.with_history_dir(dir);
    }
    if let Some(model) = args.model {
        config = config.with_model(model);
    }
    config.validate()?;

    let client = ChatClient::new(config.llm.clone())?;
    let store = JsonDirHistoryStore::new(config.history.dir.clone())?;
    let session = ConversationSession::new(client, Arc::new(store))
        .with_context_messages(config.llm.context_messages);

    Ok(Repl {
        session,
        list_limit: config.history.list_limit,
        label_max_chars: config.history.label_max_chars,
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    start::init_tracing(tracing::Level::WARN);

    let mut repl = match build_repl(args) {
        Ok(repl) => repl,
        Err(e) => {
            let _ = writeln!(io::stderr(), "{e}");
            return start::exit_code(&e);
        }
    };

    let _ = writeln!(
        io::stdout(),
        "Java mentor chat (model {})\n\
         Type a question, 'samples' for ideas, 'help' for commands, 'exit' to quit.\n{RULE}",
        repl.session.backend().config().model
    );

    if let Err(e) = repl.run().await {
        tracing::error!("Terminal error: {e}");
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}
