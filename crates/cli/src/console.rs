//! Console output for runs: event lines and approval prompts.

use parley_core::capability::ApprovalDecision;
use parley_core::event::ConversationEvent;
use parley_core::message::{Message, MessageRole};
use parley_tools::{ApprovalBroker, RegistrationGate};
use std::collections::HashMap;
use std::io::BufRead;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const TOOL_PREVIEW_CHARS: usize = 200;

/// Lines typed on stdin.
///
/// Read on a plain thread so an unanswered prompt never holds up runtime
/// shutdown.
pub fn stdin_lines() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Answers approval prompts typed on the console.
pub struct Prompter {
    pub broker: Arc<ApprovalBroker>,
    pub gate: Arc<RegistrationGate>,
    pub lines: mpsc::UnboundedReceiver<String>,
}

impl Prompter {
    async fn ask(&mut self, proposal_id: &str, shutdown: &CancellationToken) {
        eprint!("  Approve? [y/N] ");
        let line = tokio::select! {
            line = self.lines.recv() => line,
            _ = shutdown.cancelled() => return,
        };
        let decision = match line.as_deref().map(str::trim) {
            Some(answer) if is_yes(answer) => ApprovalDecision::Approve,
            _ => ApprovalDecision::Reject,
        };
        if !self.broker.resolve(proposal_id, decision) {
            // The turn stopped waiting (cancelled); record the decision anyway.
            match self.gate.settle_detached(proposal_id, decision).await {
                Ok(outcome) => println!("  {}", outcome.system_note()),
                Err(e) => warn!(proposal_id, error = %e, "Could not settle proposal"),
            }
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes" | "approve")
}

/// Print events until `shutdown` fires and the queue is drained.
pub fn spawn_printer(
    mut rx: broadcast::Receiver<Arc<ConversationEvent>>,
    mut names: HashMap<String, String>,
    mut prompter: Option<Prompter>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                biased;
                r = rx.recv() => match r {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Console fell behind; some events were not shown");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.cancelled() => break,
            };

            if let ConversationEvent::TurnStart { agent_id, agent_name, .. } = event.as_ref() {
                names.insert(agent_id.clone(), agent_name.clone());
            }
            println!("{}", format_event(&event, &names));
            if let (ConversationEvent::ApprovalRequired { proposal_id, .. }, Some(p)) = (event.as_ref(), prompter.as_mut()) {
                p.ask(proposal_id, &shutdown).await;
            }
        }
    })
}

fn preview(text: &str) -> String {
    parley_tools::truncate_payload(text, TOOL_PREVIEW_CHARS)
}

fn name_of<'a>(names: &'a HashMap<String, String>, agent_id: &'a str) -> &'a str {
    names.get(agent_id).map(String::as_str).unwrap_or(agent_id)
}

/// The console line for one event.
pub fn format_event(event: &ConversationEvent, names: &HashMap<String, String>) -> String {
    match event {
        ConversationEvent::TurnStart { agent_name, turn_index, .. } => {
            format!("\n── turn {} · {agent_name} ──", turn_index + 1)
        }
        ConversationEvent::TurnEnd {
            agent_id,
            content,
            intermediate,
            ..
        } => {
            let who = name_of(names, agent_id);
            if *intermediate {
                format!("  {who} (thinking) > {content}")
            } else {
                format!("  {who} > {content}")
            }
        }
        ConversationEvent::ToolCall { tool_name, args, .. } => {
            format!("    ⚙ {tool_name} {}", preview(&args.to_string()))
        }
        ConversationEvent::ToolResult {
            tool_name,
            result,
            success,
            ..
        } => {
            let mark = if *success { "✓" } else { "✗" };
            format!("    {mark} {tool_name} → {}", preview(&result.to_string()))
        }
        ConversationEvent::ApprovalRequired {
            agent_id,
            proposal_id,
            tool_name,
            description,
            code,
            ..
        } => format!(
            "\n  {} proposes a new tool '{tool_name}' ({proposal_id})\n  {description}\n  ---\n{}\n  ---",
            name_of(names, agent_id),
            indent(code)
        ),
        ConversationEvent::Error { message, .. } => format!("  [Error] {message}"),
        ConversationEvent::ConversationPaused { .. } => "\n  Conversation paused.".to_string(),
        ConversationEvent::ConversationResting { .. } => "\n  Conversation is resting.".to_string(),
        ConversationEvent::ConversationComplete { .. } => "\n  Conversation complete.".to_string(),
    }
}

fn indent(text: &str) -> String {
    text.lines().map(|l| format!("    {l}")).collect::<Vec<_>>().join("\n")
}

/// A transcript line for `session show`.
pub fn format_message(message: &Message, names: &HashMap<String, String>) -> String {
    let time = message.created_at.format("%H:%M:%S");
    let who = message.agent_id.as_deref().map(|id| name_of(names, id)).unwrap_or("?");
    match message.role {
        MessageRole::Human => format!("[{time}] You > {}", message.content),
        MessageRole::System => format!("[{time}] System: {}", message.content),
        MessageRole::Agent => format!("[{time}] {who} > {}", message.content),
        MessageRole::ToolCall => format!(
            "[{time}] {who} ⚙ {} {}",
            message.tool_name.as_deref().unwrap_or("?"),
            preview(&message.content)
        ),
        MessageRole::ToolResult => format!(
            "[{time}] {who} → {} {}",
            message.tool_name.as_deref().unwrap_or("?"),
            preview(&message.content)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn names() -> HashMap<String, String> {
        HashMap::from([("a1".to_string(), "Alice".to_string())])
    }

    #[test]
    fn turn_lines() {
        let start = ConversationEvent::TurnStart {
            session_id: "s".into(),
            agent_id: "a1".into(),
            agent_name: "Alice".into(),
            turn_index: 0,
        };
        assert_eq!(format_event(&start, &names()), "\n── turn 1 · Alice ──");

        let end = ConversationEvent::TurnEnd {
            session_id: "s".into(),
            agent_id: "a1".into(),
            message_id: "m".into(),
            content: "Hello".into(),
            intermediate: false,
        };
        assert_eq!(format_event(&end, &names()), "  Alice > Hello");
    }

    #[test]
    fn unknown_agent_falls_back_to_id() {
        let end = ConversationEvent::TurnEnd {
            session_id: "s".into(),
            agent_id: "zz".into(),
            message_id: "m".into(),
            content: "Hi".into(),
            intermediate: true,
        };
        assert_eq!(format_event(&end, &names()), "  zz (thinking) > Hi");
    }

    #[test]
    fn tool_results_are_previewed() {
        let result = ConversationEvent::ToolResult {
            session_id: "s".into(),
            agent_id: "a1".into(),
            tool_name: "http_request".into(),
            result: json!({"data": "x".repeat(500)}),
            success: true,
        };
        let line = format_event(&result, &names());
        assert!(line.starts_with("    ✓ http_request → "));
        assert!(line.contains("chars)"));
    }

    #[test]
    fn approval_answers() {
        assert!(is_yes("y"));
        assert!(is_yes("YES"));
        assert!(is_yes("approve"));
        assert!(!is_yes(""));
        assert!(!is_yes("no"));
    }
}
