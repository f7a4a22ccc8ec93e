use anyhow::{Context, Result};
use clap::Args;
use std::io::{self, Write};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};
use tracing::{debug, warn};

use crate::{
    app::{App, AppEvent},
    llm::{extract_thought, ChatMessage, ChatError, MessageRole},
    session::{ModelTarget, SendOutcome, SessionId, StreamingChat, DEFAULT_TITLE},
};

const HELP: &str = "\
/new              start a new session
/sessions         list sessions
/switch <id>      continue another session
/model <name>     pick the model (only before the first message)
/thoughts         show the reasoning of the last reply
/quit             leave
Ctrl+C cancels a reply in progress; the partial reply is kept.";

/// Start an interactive chat
#[derive(Args, Default)]
pub struct ChatCommand {
    /// Model to talk to; defaults to the configured default model
    #[arg(short = 'm', long = "model")]
    pub model: Option<String>,

    /// Continue this session instead of the most recent one
    #[arg(short = 's', long = "session")]
    pub session: Option<SessionId>,
}

impl ChatCommand {
    pub async fn execute(&self, app: &App) -> Result<()> {
        let mut events = app
            .take_event_receiver()
            .await
            .context("Event channel already taken")?;
        let manager = app.session_manager();

        manager.refresh().await.context("Failed to load sessions")?;
        if let Some(id) = self.session {
            manager.select(id).await?;
        }
        if let Some(text) = app.api().current_announcement().await.unwrap_or_else(|e| {
            debug!("No announcement: {}", e);
            None
        }) {
            println!("📢 {}\n", text);
        }

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        match app.pending_agreement().await {
            Ok(Some(agreement)) => {
                println!("{}\n", agreement);
                print!("Accept the usage agreement? [y/N] ");
                io::stdout().flush()?;
                let answer = lines.next_line().await?.unwrap_or_default();
                if !is_yes(&answer) {
                    anyhow::bail!("The usage agreement must be accepted before chatting");
                }
                app.accept_agreement(&agreement).await?;
            }
            Ok(None) => {}
            Err(e) => warn!("Could not check the usage agreement: {:#}", e),
        }

        let mut model = self.model.clone().unwrap_or_else(|| app.config().default_model.clone());
        let mut chat: Option<StreamingChat> = None;
        if let Some(session) = manager.current().await {
            println!("Session {}: {}", session.id, session.title);
            for message in &session.messages {
                println!("{}\n", render_message(message, false));
            }
            chat = Some(app.start_chat(&session));
        }
        println!("Chatting with {} (/help for commands)", model);

        loop {
            print!("> ");
            io::stdout().flush()?;

            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => None,
            };
            let Some(line) = line else {
                break;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(command) = line.strip_prefix('/') {
                let (name, arg) = command.split_once(' ').unwrap_or((command, ""));
                match name {
                    "quit" | "exit" => break,
                    "help" => println!("{}", HELP),
                    "new" => {
                        let session = manager.create(DEFAULT_TITLE).await?;
                        replace_chat(&mut chat, app.start_chat(&session)).await;
                        println!("Started session {}", session.id);
                    }
                    "sessions" => {
                        for session in manager.sessions().await {
                            let marker = if chat.as_ref().map(|c| c.session_id()) == Some(session.id) { "*" } else { " " };
                            println!("{} {:>6}  {}", marker, session.id, session.title);
                        }
                    }
                    "switch" => match arg.trim().parse::<SessionId>() {
                        Ok(id) => match manager.select(id).await {
                            Ok(session) => {
                                replace_chat(&mut chat, app.start_chat(&session)).await;
                                for message in &session.messages {
                                    println!("{}\n", render_message(message, false));
                                }
                                println!("Switched to session {}", id);
                            }
                            Err(e) => println!("{}", e),
                        },
                        Err(_) => println!("Usage: /switch <id>"),
                    },
                    "model" => {
                        let requested = arg.trim();
                        if chat.as_ref().is_some_and(|c| !c.messages().is_empty()) {
                            println!("The model can only be changed before the first message; use /new");
                        } else if app.config().models.iter().any(|m| m == requested) {
                            model = requested.to_string();
                            println!("Using {}", model);
                        } else {
                            println!("Available models: {}", app.config().models.join(", "));
                        }
                    }
                    "thoughts" => {
                        let last = chat
                            .as_ref()
                            .and_then(|c| c.messages().into_iter().rev().find(|m| m.role == MessageRole::Assistant));
                        match last.map(|m| extract_thought(&m.content)) {
                            Some(split) if split.has_thought() => println!("{}", split.thought),
                            _ => println!("No reasoning in the last reply"),
                        }
                    }
                    other => println!("Unknown command /{} (/help for commands)", other),
                }
                continue;
            }

            let target = match app.resolve_target(&model).await {
                Ok(target) => target,
                Err(e) => {
                    println!("{}", e);
                    continue;
                }
            };

            if chat.is_none() {
                let session = manager.ensure_current().await?;
                chat = Some(app.start_chat(&session));
            }
            let Some(active) = chat.as_ref() else {
                continue;
            };

            match stream_reply(active, &target, line, &mut events, &mut io::stdout()).await {
                Ok(SendOutcome::Completed { .. }) => {}
                Ok(SendOutcome::Cancelled { .. }) => println!("[cancelled]"),
                Err(e) => match e.downcast_ref::<ChatError>() {
                    Some(ChatError::Busy) => println!("A reply is still in progress"),
                    _ => println!("Error: {}", e),
                },
            }
        }

        if let Some(chat) = chat {
            chat.shutdown().await;
        }
        Ok(())
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

async fn replace_chat(slot: &mut Option<StreamingChat>, next: StreamingChat) {
    if let Some(previous) = slot.replace(next) {
        previous.shutdown().await;
    }
}

/// Send `prompt` and print the reply as it streams.
///
/// Ctrl+C cancels the reply; the partial content stays in the transcript.
pub(crate) async fn stream_reply<W: Write>(
    chat: &StreamingChat,
    target: &ModelTarget,
    prompt: &str,
    events: &mut mpsc::UnboundedReceiver<AppEvent>,
    out: &mut W,
) -> Result<SendOutcome> {
    let mut printer = ChunkPrinter::new(chat.session_id());
    let send = chat.send(target, prompt);
    tokio::pin!(send);

    let mut interrupted = false;
    let outcome = loop {
        tokio::select! {
            outcome = &mut send => break outcome,
            Some(event) = events.recv() => printer.handle(&event, out)?,
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                if let Err(e) = signal {
                    warn!("Failed to listen for Ctrl+C: {}", e);
                }
                interrupted = true;
                chat.cancel();
            }
        }
    };

    while let Ok(event) = events.try_recv() {
        printer.handle(&event, out)?;
    }
    printer.finish(out)?;

    Ok(outcome?)
}

/// Prints streamed chunks, holding back reasoning segments
pub(crate) struct ChunkPrinter {
    session_id: SessionId,
    content: String,
    printed: String,
    noted_thinking: bool,
}

impl ChunkPrinter {
    pub(crate) fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            content: String::new(),
            printed: String::new(),
            noted_thinking: false,
        }
    }

    pub(crate) fn handle<W: Write>(&mut self, event: &AppEvent, out: &mut W) -> io::Result<()> {
        if event.is_error() {
            debug!("Chat error event: {:?}", event);
        }
        if !event.is_streaming_event() || event.session_id() != Some(self.session_id) {
            return Ok(());
        }
        match event {
            AppEvent::StreamChunk { chunk, .. } => self.push(chunk, out),
            _ => Ok(()),
        }
    }

    fn push<W: Write>(&mut self, chunk: &str, out: &mut W) -> io::Result<()> {
        self.content.push_str(chunk);
        let split = extract_thought(&self.content);

        if split.has_thought() && !self.noted_thinking && self.printed.is_empty() {
            writeln!(out, "(thinking…)")?;
            self.noted_thinking = true;
        }

        let visible = hold_back_partial_tag(&split.main);
        if let Some(fresh) = visible.strip_prefix(self.printed.as_str()) {
            if !fresh.is_empty() {
                write!(out, "{}", fresh)?;
                out.flush()?;
                self.printed = visible.to_string();
            }
        }
        Ok(())
    }

    pub(crate) fn finish<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        let split = extract_thought(&self.content);
        if let Some(rest) = split.main.strip_prefix(self.printed.as_str()) {
            write!(out, "{}", rest)?;
        }
        writeln!(out)?;
        if split.has_thought() {
            writeln!(out, "(reasoning hidden, /thoughts to show)")?;
        }
        out.flush()
    }
}

/// Drop a trailing `<`, `<th`… that may still grow into `<think>`
fn hold_back_partial_tag(text: &str) -> &str {
    match text.rfind('<') {
        Some(pos) if "<think>".starts_with(&text[pos..]) => &text[..pos],
        _ => text,
    }
}

/// Format a stored message for the terminal
pub(crate) fn render_message(message: &ChatMessage, show_thoughts: bool) -> String {
    match message.role {
        MessageRole::User => format!("you: {}", message.content),
        MessageRole::Assistant => {
            let split = extract_thought(&message.content);
            if show_thoughts && split.has_thought() {
                let thought: Vec<String> = split.thought.lines().map(|l| format!("  | {}", l)).collect();
                format!("assistant (reasoning):\n{}\nassistant: {}", thought.join("\n"), split.main)
            } else {
                format!("assistant: {}", split.main)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str) -> AppEvent {
        AppEvent::StreamChunk {
            session_id: 1,
            message_id: "m".to_string(),
            chunk: text.to_string(),
        }
    }

    fn print_all(chunks: &[&str]) -> String {
        let mut out = Vec::new();
        let mut printer = ChunkPrinter::new(1);
        for text in chunks {
            printer.handle(&chunk(text), &mut out).unwrap();
        }
        printer.finish(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_printer_streams_plain_text() {
        assert_eq!(print_all(&["He", "llo"]), "Hello\n");
    }

    #[test]
    fn test_printer_hides_reasoning() {
        let output = print_all(&["<thi", "nk>plan", " steps</think>", "Answer"]);
        assert!(!output.contains("plan"));
        assert!(!output.contains("<thi"));
        assert!(output.starts_with("(thinking…)\nAnswer\n"));
        assert!(output.ends_with("(reasoning hidden, /thoughts to show)\n"));
    }

    #[test]
    fn test_printer_ignores_other_sessions() {
        let mut out = Vec::new();
        let mut printer = ChunkPrinter::new(2);
        printer.handle(&chunk("not mine"), &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_agreement_answer() {
        assert!(is_yes("y"));
        assert!(is_yes(" Yes\n"));
        assert!(!is_yes(""));
        assert!(!is_yes("no"));
    }

    #[test]
    fn test_render_message_with_thoughts() {
        let message = ChatMessage::assistant("<think>check units</think>42 km");
        assert_eq!(render_message(&message, false), "assistant: 42 km");
        assert_eq!(
            render_message(&message, true),
            "assistant (reasoning):\n  | check units\nassistant: 42 km"
        );
        assert_eq!(render_message(&ChatMessage::user("hi"), true), "you: hi");
    }
}
