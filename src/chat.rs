//! Interactive raw-text chat.
//!
//! Every input line is sent verbatim with a trailing newline. Server lines
//! are printed as they arrive, and a raw `PING` keeps the connection alive.

use colored::Colorize;
use jnova_client::{ClientError, Connection, ConnectionConfig};
use jnova_protocol::{Framing, LineBuffer};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

const KEEP_ALIVE: &[u8] = b"PING\n";

pub async fn run(
    config: ConnectionConfig,
    keep_alive: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "jnova chat".bold().cyan());
    println!("Connecting to {}...", config.addr());

    let conn = Arc::new(Connection::new(config));
    conn.connect().await?;
    println!("{}", "Connected!".green());

    let listener = tokio::spawn(listen(conn.clone(), LineBuffer::new(), std::io::stdout()));
    let pinger = tokio::spawn(ping_loop(conn.clone(), keep_alive));

    // Create readline editor
    let rl_config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(rl_config)?;

    // Load history
    let history_path = std::env::var("HOME")
        .map(|h| std::path::PathBuf::from(h).join(".jnova_history"))
        .unwrap_or_else(|_| ".jnova_history".into());
    let _ = rl.load_history(&history_path);

    println!("Type a message and press Enter. 'exit' or 'quit' to leave.\n");

    loop {
        match rl.readline("You: ") {
            Ok(line) => {
                if is_exit(&line) {
                    break;
                }
                match send_line(&conn, &line).await {
                    Ok(()) => {}
                    Err(ClientError::Protocol(e)) => println!("{}: {}", "Error".red(), e),
                    Err(e) => {
                        println!("{}: {}", "Send failed".red(), e);
                        break;
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    // Save history
    let _ = rl.save_history(&history_path);

    // Disconnect
    conn.close().await;
    let _ = listener.await;
    let _ = pinger.await;
    println!("{}", "Disconnected.".dimmed());

    Ok(())
}

/// Whether an input line asks to leave the chat.
fn is_exit(line: &str) -> bool {
    let line = line.trim();
    line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit")
}

/// Sends one input line as typed, newline-terminated.
async fn send_line(conn: &Connection, line: &str) -> Result<(), ClientError> {
    let frame = Framing::line().encode(line.as_bytes())?;
    conn.send_all(&frame).await
}

/// Writes server lines to `out` until the connection ends, then returns it.
///
/// An oversized line discards everything buffered and listening continues.
async fn listen<W: Write>(conn: Arc<Connection>, mut lines: LineBuffer, mut out: W) -> W {
    let mut buf = vec![0u8; conn.config().read_buffer_size];

    loop {
        let n = match conn.receive(&mut buf).await {
            Ok(n) => n,
            Err(_) if conn.is_closed() => break,
            Err(e) if e.is_orderly_close() => {
                let _ = writeln!(out, "\n{}", "Server closed the connection.".yellow());
                break;
            }
            Err(e) => {
                let _ = writeln!(out, "\n{}: {}", "Receive failed".red(), e);
                break;
            }
        };

        lines.extend(&buf[..n]);
        loop {
            match lines.next_line() {
                Ok(Some(Ok(line))) => {
                    let _ = writeln!(out, "{} {}", "[Server]".cyan(), line);
                }
                Ok(Some(Err(raw))) => {
                    let text = String::from_utf8_lossy(&raw);
                    let _ = writeln!(out, "{} {}", "[Server]".cyan(), text.trim());
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = writeln!(out, "{}: {}", "Dropping input".yellow(), e);
                    lines.clear();
                    break;
                }
            }
        }
        let _ = out.flush();
    }

    out
}

/// Sends the raw keep-alive every `interval` until the connection closes.
async fn ping_loop(conn: Arc<Connection>, interval: Duration) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = conn.closed() => break,
        }

        if let Err(e) = conn.send_all(KEEP_ALIVE).await {
            tracing::debug!("Keep-alive stopped: {}", e);
            break;
        }
        tracing::debug!("Keep-alive sent");
    }
}
