//! Session and probe execution.

use colored::Colorize;
use jnova_client::{
    ConnectionConfig, OutboundPlan, Probe, ProbeReport, Session, SessionConfig, SessionEvent,
    SessionSummary,
};
use jnova_protocol::{Command, Framing};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;

/// Runs a JSON command session until the server closes it or Ctrl+C.
///
/// Returns the formatted session summary.
pub async fn run_session(
    config: ConnectionConfig,
    plan: OutboundPlan,
    initial: Option<Command>,
) -> Result<String, Box<dyn std::error::Error>> {
    println!("Connecting to {}...", config.addr());

    let session = Session::new(SessionConfig::new(config).with_outbound(plan));
    let mut events = session.subscribe();
    session.start().await?;
    println!(
        "{} (session {})",
        "Connected!".green(),
        session.id().to_string().dimmed()
    );

    if let Some(command) = initial {
        session.send(&command).await?;
        println!("{} {}", "Sent:".cyan(), command);
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SessionEvent::Message(value)) => {
                    println!("{} {}", "Received:".green(), format_message(&value));
                }
                Ok(SessionEvent::InvalidMessage { line, reason }) => {
                    println!("{} {} ({})", "Invalid JSON:".yellow(), line, reason);
                }
                Ok(SessionEvent::OutboundFinished { sent }) => {
                    println!("{}", format!("Finished sending {} pings", sent).dimmed());
                }
                Ok(SessionEvent::Terminated(reason)) => {
                    println!("{} {}", "Session ended:".dimmed(), reason);
                    break;
                }
                Err(RecvError::Lagged(skipped)) => {
                    println!("{}: skipped {} events", "Warning".yellow(), skipped);
                }
                Err(RecvError::Closed) => break,
            },
            result = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                if let Err(e) = result {
                    tracing::warn!("Failed to listen for Ctrl+C: {}", e);
                    continue;
                }
                println!("^C");
                session.close().await;
            }
        }
    }

    let summary = session.wait().await;
    Ok(format_summary(&summary))
}

/// Runs one framing probe and formats the report.
pub async fn run_probe(
    config: ConnectionConfig,
    framing: Framing,
    payload: &[u8],
) -> Result<String, Box<dyn std::error::Error>> {
    println!("Probing {} with {}...", config.addr(), framing);
    let report = Probe::new(config, framing).run(payload).await?;
    Ok(format_report(&report))
}

/// Expands `\n`, `\r`, `\t` and `\\` escapes. Unknown escapes are kept as is.
pub fn unescape(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            output.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => output.push('\n'),
            Some('r') => output.push('\r'),
            Some('t') => output.push('\t'),
            Some('\\') => output.push('\\'),
            Some(other) => {
                output.push('\\');
                output.push(other);
            }
            None => output.push('\\'),
        }
    }

    output
}

/// Formats a session summary for display.
fn format_summary(summary: &SessionSummary) -> String {
    let mut output = format!("{}\n", format!("Session {}", summary.id).bold());
    output.push_str(&format!(
        "  Sent:          {} ({} failed)\n",
        summary.sent, summary.send_failures
    ));
    output.push_str(&format!("  Received:      {}\n", summary.received));
    output.push_str(&format!("  Invalid:       {}\n", summary.invalid));
    match &summary.reason {
        Some(reason) => output.push_str(&format!("  Ended:         {}", reason)),
        None => output.push_str("  Ended:         -"),
    }
    output
}

/// Formats a probe report for display.
fn format_report(report: &ProbeReport) -> String {
    let mut output = format!("{}\n", "Probe succeeded".green());
    output.push_str(&format!("  Framing:       {}\n", report.framing));
    output.push_str(&format!("  Bytes sent:    {}\n", report.bytes_sent));
    output.push_str(&format!("  Response size: {} bytes\n", report.response.len()));
    output.push_str(&format!("  Response:      {:?}", report.response_text()));
    output
}

/// Formats an inbound JSON frame; broadcast messages get a chat-style line.
fn format_message(value: &Value) -> String {
    if value["type"] == "message" {
        if let (Some(sender), Some(content)) =
            (value["sender"].as_str(), value["content"].as_str())
        {
            return format!("[{}] {}", sender.cyan(), content);
        }
    }
    value.to_string()
}
