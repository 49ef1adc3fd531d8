//! tether: interactive console for a tether shell server
//!
//! Lines typed on stdin are sent as commands. Ctrl-C asks the server to
//! interrupt the running command; the next line answers its prompt.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use tether_client::{app_addr, Client, ClientReceiver};
use tether_protocol::{CommandDescriptor, Payload, Signal};
use tether_utils::{init_logging_with_config, LogConfig, Result};

/// Console for tether shell servers
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(about = "Interactive console for tether shell servers")]
#[command(version)]
struct Cli {
    /// Server address (host:port); overrides --host and --app-name
    #[arg(long, env = "TETHER_ADDR")]
    addr: Option<SocketAddr>,

    /// Host running the server
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    host: IpAddr,

    /// Application name used to derive the server port
    #[arg(long, default_value = "tether")]
    app_name: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging_with_config(LogConfig::client())?;
    let cli = Cli::parse();

    let addr = match cli.addr {
        Some(addr) => addr,
        None => app_addr(cli.host, &cli.app_name)?,
    };

    let mut client = Client::connect(addr).await?;
    let commands = client.commands().await?;
    println!("Connected to {} ({} commands, 'help' lists them)", addr, commands.len());

    let (mut sender, receiver) = client.into_split();
    let prompted = Arc::new(AtomicBool::new(false));
    let printer = tokio::spawn(print_signals(receiver, Arc::clone(&prompted)));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let line = line.trim();

                if prompted.swap(false, Ordering::SeqCst) {
                    let confirm = matches!(line.to_ascii_lowercase().as_str(), "y" | "yes");
                    sender.confirm_interrupt(confirm).await?;
                    continue;
                }

                match line {
                    "" => {}
                    "help" => print_help(&commands),
                    "exit" | "quit" => break,
                    _ => sender.execute(line).await?,
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                debug!("Ctrl-C, requesting interrupt");
                sender.interrupt().await?;
            }
        }

        if printer.is_finished() {
            break;
        }
    }

    printer.abort();
    Ok(())
}

async fn print_signals(mut receiver: ClientReceiver, prompted: Arc<AtomicBool>) {
    while let Some(signal) = receiver.next_signal().await {
        match signal {
            Ok(Signal::AskInterrupt { prompt }) => {
                prompted.store(true, Ordering::SeqCst);
                println!("{}", prompt);
            }
            Ok(Signal::Output(payload)) => print_payload(payload),
            Ok(other) => debug!("Ignoring {} from server", other.kind()),
            Err(e) => {
                eprintln!("{}", e);
                break;
            }
        }
    }
    eprintln!("Connection closed by server");
}

fn print_payload(payload: Payload) {
    match payload {
        Payload::Text(text) => println!("{}", text),
        Payload::Progress {
            title,
            progress,
            whole,
        } => {
            let percent = if whole == 0 { 100 } else { progress.saturating_mul(100) / whole };
            println!("{}: {}/{} ({}%)", title, progress, whole, percent);
        }
        Payload::Fault { class, message } => eprintln!("error ({}): {}", class, message),
        Payload::Commands(commands) => print_help(&commands),
        Payload::Completed => {}
    }
}

fn print_help(commands: &[CommandDescriptor]) {
    for command in commands {
        match &command.help {
            Some(help) => println!("  {:<32} {}", command.usage(), help),
            None => println!("  {}", command.usage()),
        }
    }
    println!("  {:<32} {}", "help", "Show this list");
    println!("  {:<32} {}", "exit", "Leave the console");
}
