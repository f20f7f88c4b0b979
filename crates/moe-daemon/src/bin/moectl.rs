//! Command-line client for the moe-daemon control socket.
//!
//! ```text
//! moectl PLAY_PAUSE | STOP | TOGGLE_FAVORITE | UPDATE | MEDIA_BUTTON 85 | LIBRARY_KPOP ...
//! moectl login <token> | logout
//! moectl sleep <minutes> | sleep off
//! moectl search <query>
//! moectl state | watch
//! ```

use clap::{Parser, Subcommand};
use moe_engine::router::parse_token;
use moe_proto::protocol::{Broadcast, Command, Message};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

struct DaemonConnection {
    stream: TcpStream,
    read_buffer: Vec<u8>,
}

impl DaemonConnection {
    async fn connect(address: &str) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(address).await?;
        Ok(Self {
            stream,
            read_buffer: Vec::with_capacity(4096),
        })
    }

    async fn send_command(&mut self, cmd: Command) -> anyhow::Result<()> {
        let encoded = Message::Command(cmd).encode()?;
        self.stream.write_all(&encoded).await?;
        Ok(())
    }

    /// Next complete frame, or `None` once the daemon hangs up.
    async fn recv(&mut self) -> anyhow::Result<Option<Broadcast>> {
        let mut buf = [0u8; 4096];
        loop {
            if let Ok((msg, consumed)) = Message::decode(&self.read_buffer) {
                self.read_buffer.drain(..consumed);
                if let Message::Broadcast(b) = msg {
                    return Ok(Some(b));
                }
                continue;
            }
            let n = self.stream.read(&mut buf).await?;
            if n == 0 {
                return Ok(None);
            }
            self.read_buffer.extend_from_slice(&buf[..n]);
        }
    }
}

/// Control a running moe-daemon
#[derive(Parser, Debug)]
#[command(name = "moectl")]
#[command(about = "Control the moe-radio daemon over its control socket")]
struct Cli {
    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Cmd {
    /// Print the current state once (default)
    State,
    /// Print every broadcast until the daemon exits
    Watch,
    /// Store an API token and re-authenticate
    Login { token: String },
    /// Forget the stored token
    Logout,
    /// Fade out after N minutes, or `off` to cancel
    Sleep {
        #[arg(value_name = "MINUTES|off", value_parser = parse_sleep)]
        minutes: Sleep,
    },
    /// Pick a library from a free-text query and play it
    Search {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        query: Vec<String>,
    },
    /// Action token: PLAY_PAUSE, STOP, TOGGLE_FAVORITE, MEDIA_BUTTON <code>, LIBRARY_KPOP ...
    #[command(external_subcommand)]
    Action(Vec<String>),
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Sleep {
    Off,
    Minutes(u32),
}

fn parse_sleep(value: &str) -> Result<Sleep, String> {
    if value.eq_ignore_ascii_case("off") {
        return Ok(Sleep::Off);
    }
    value
        .parse()
        .map(Sleep::Minutes)
        .map_err(|_| format!("expected a number of minutes or 'off', got {:?}", value))
}

impl Cli {
    /// The command to send, or `None` to just watch.
    fn into_command(self) -> anyhow::Result<Option<Command>> {
        let cmd = match self.command.unwrap_or(Cmd::State) {
            Cmd::State => Command::GetState,
            Cmd::Watch => return Ok(None),
            Cmd::Login { token } => Command::Login { token },
            Cmd::Logout => Command::Logout,
            Cmd::Sleep {
                minutes: Sleep::Off,
            } => Command::CancelSleepTimer,
            Cmd::Sleep {
                minutes: Sleep::Minutes(minutes),
            } => Command::SetSleepTimer { minutes },
            Cmd::Search { query } => Command::PlayFromSearch {
                query: query.join(" "),
            },
            Cmd::Action(args) => {
                let Some(token) = args.first() else {
                    anyhow::bail!("missing action");
                };
                parse_token(token, args.get(1).map(String::as_str))?
            }
        };
        Ok(Some(cmd))
    }
}

fn print(b: &Broadcast) {
    match b {
        Broadcast::Hello { .. } => {}
        Broadcast::State { data } => match &data.notification {
            Some(n) => {
                let heart = match n.favorited {
                    Some(true) => " ♥",
                    _ => "",
                };
                let timer = if data.sleep_timer_armed { " (sleep timer)" } else { "" };
                println!(
                    "{} {} - {}{}{}",
                    if n.playing { "▶" } else { "⏸" },
                    n.title,
                    n.text,
                    heart,
                    timer
                );
            }
            None => println!("■ stopped"),
        },
        Broadcast::FavoriteChanged { song_id, favorite } => {
            println!("song {} favorite={}", song_id, favorite)
        }
        Broadcast::Toast { message } => println!("! {}", message),
        Broadcast::Log { message } => eprintln!("{}", message),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let command = Cli::parse().into_command()?;

    let address = match moe_proto::config::Config::load() {
        Ok(config) => moe_proto::platform::daemon_address_on(config.daemon.control_port),
        Err(_) => moe_proto::platform::daemon_address(),
    };
    let mut conn = DaemonConnection::connect(&address).await?;
    match conn.recv().await? {
        Some(Broadcast::Hello {
            protocol_version, ..
        }) if protocol_version != moe_proto::protocol::PROTOCOL_VERSION => {
            anyhow::bail!("daemon speaks protocol {}", protocol_version)
        }
        Some(_) => {}
        None => anyhow::bail!("daemon closed the connection"),
    }

    let Some(command) = command else {
        while let Some(b) = conn.recv().await? {
            print(&b);
        }
        return Ok(());
    };

    conn.send_command(command).await?;
    while let Some(b) = conn.recv().await? {
        print(&b);
        if matches!(b, Broadcast::State { .. }) {
            break;
        }
    }
    Ok(())
}
