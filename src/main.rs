//! rcon - Remote console for game servers
//!
//! Thin command-line front end over the `rcon_client` session engine.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rcon_client::config::{self, Config, ServerConfig};
use rcon_client::{Response, Session, SessionEvent};

/// rcon - Remote console for game servers
#[derive(Parser)]
#[command(name = "rcon")]
#[command(author = "rcon-client Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Administer game servers over the RCON protocol", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print replies and server messages as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run commands and print their replies
    Exec {
        #[command(flatten)]
        target: TargetArgs,

        /// Commands to execute, in order
        #[arg(required = true)]
        commands: Vec<String>,
    },

    /// Interactive console; also prints messages pushed by the server
    Console {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args)]
struct TargetArgs {
    /// Server host
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Server port
    #[arg(short, long)]
    port: Option<u16>,

    /// RCON password
    #[arg(short = 'P', long, env = "RCON_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Named server from the configuration file
    #[arg(long)]
    profile: Option<String>,
}

impl TargetArgs {
    /// Command-line values override the configured server
    fn resolve(self, config: &Config) -> anyhow::Result<ServerConfig> {
        let mut server = config.server(self.profile.as_deref())?;
        if let Some(host) = self.host {
            server.host = host;
        }
        if let Some(port) = self.port {
            server.port = port;
        }
        if self.password.is_some() {
            server.password = self.password;
        }
        Ok(server)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    // Initialize logging; stdout is reserved for server output
    let filter = if cli.verbose || config.general.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let output = Output { json: cli.json };

    match cli.command {
        Commands::Exec { target, commands } => {
            let server = target.resolve(&config)?;
            run_exec(&config, server, commands, output).await?;
        }
        Commands::Console { target } => {
            let server = target.resolve(&config)?;
            run_console(&config, server, output).await?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

/// Connect and, if a password is known, authenticate
async fn open_session(config: &Config, server: &ServerConfig) -> anyhow::Result<Session> {
    let mut session = Session::new(server.host.clone(), server.port, config.session_config());
    session.connect().await?;

    if let Some(password) = &server.password {
        session.authenticate(password).await?;
    } else {
        tracing::warn!("No password configured; commands will likely be refused");
    }

    Ok(session)
}

/// Run a fixed list of commands
async fn run_exec(
    config: &Config,
    server: ServerConfig,
    commands: Vec<String>,
    output: Output,
) -> anyhow::Result<()> {
    let mut session = open_session(config, &server).await?;

    for command in &commands {
        let response = session.send(command).await?;
        output.response(command, &response);
    }

    session.disconnect().await;
    Ok(())
}

/// Read commands from stdin until EOF or Ctrl+C
async fn run_console(config: &Config, server: ServerConfig, output: Output) -> anyhow::Result<()> {
    let mut session = open_session(config, &server).await?;
    let events = session
        .take_event_receiver()
        .ok_or_else(|| anyhow::anyhow!("event receiver already taken"))?;

    let printer = tokio::spawn(print_events(events, output));

    eprintln!("Connected to {}. Type commands, Ctrl+D to quit.", session.target());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let command = line.trim();
                if command.is_empty() {
                    continue;
                }
                match session.send(command).await {
                    Ok(response) => output.response(command, &response),
                    Err(e) => {
                        eprintln!("error: {}", e);
                        if !session.is_connected() {
                            break;
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\nDisconnecting...");
                break;
            }
        }
    }

    session.disconnect().await;
    drop(session);
    let _ = printer.await;
    Ok(())
}

/// Print server pushes and connection changes
async fn print_events(mut events: mpsc::Receiver<SessionEvent>, output: Output) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Notification { frame } => {
                if output.json {
                    let line = serde_json::json!({
                        "type": "notification",
                        "id": frame.id,
                        "kind": frame.kind.as_i32(),
                        "body": frame.body_text(),
                    });
                    println!("{}", line);
                } else {
                    println!("{}", frame.body_text().trim_end());
                }
            }
            SessionEvent::Disconnected { reason } => {
                eprintln!("Disconnected: {}", reason);
            }
            SessionEvent::Error { message } => {
                tracing::error!("Session error: {}", message);
            }
            SessionEvent::FrameTrace { direction, frame } => {
                tracing::debug!(
                    "{:?} frame id={} type={} len={}",
                    direction,
                    frame.id,
                    frame.kind,
                    frame.body.len()
                );
            }
            SessionEvent::Connected { .. } | SessionEvent::Authenticated => {}
        }
    }
}

#[derive(Clone, Copy)]
struct Output {
    json: bool,
}

impl Output {
    fn response(&self, command: &str, response: &Response) {
        if self.json {
            let line = serde_json::json!({
                "type": "response",
                "command": command,
                "id": response.id,
                "frames": response.frames,
                "body": response.text(),
            });
            println!("{}", line);
        } else {
            print!("{}", response.text());
            if !response.body.ends_with(b"\n") {
                println!();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["rcon", "exec", "-H", "10.0.0.2", "status", "users"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_exec_requires_a_command() {
        assert!(Cli::try_parse_from(["rcon", "exec"]).is_err());
    }

    #[test]
    fn test_target_overrides_config() {
        let cli = Cli::try_parse_from(["rcon", "console", "--port", "25575", "-P", "pw"]).unwrap();
        let Commands::Console { target } = cli.command else {
            panic!("expected console command");
        };

        let server = target.resolve(&Config::default()).unwrap();
        assert_eq!(server.host, "127.0.0.1");
        assert_eq!(server.port, 25575);
        assert_eq!(server.password.as_deref(), Some("pw"));
    }
}
