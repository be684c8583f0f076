use clap::Parser;
use duel_server::config::{GameRules, ServerConfig};
use duel_server::network::{BoxError, Server};
use duel_server::prompts::{default_prompts, load_prompts};
use duel_shared::{DEFAULT_COMMAND_PORT, DEFAULT_NOTIFICATION_PORT, DEFAULT_ROUNDS, DEFAULT_SEATS};
use log::info;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Port for the request/reply connection
    #[arg(short, long, default_value_t = DEFAULT_COMMAND_PORT)]
    command_port: u16,
    /// Port for the server-push connection
    #[arg(short, long, default_value_t = DEFAULT_NOTIFICATION_PORT)]
    notification_port: u16,
    /// Players per game
    #[arg(short, long, default_value_t = DEFAULT_SEATS)]
    seats: usize,
    /// Rounds per game
    #[arg(short, long, default_value_t = DEFAULT_ROUNDS)]
    rounds: usize,
    /// Delay before announcing a full game has started
    #[arg(long, default_value = "3000")]
    start_delay_ms: u64,
    /// Delay between a duel closing and the next transition
    #[arg(long, default_value = "2000")]
    pacing_delay_ms: u64,
    /// Force-advance a stalled answer phase or duel vote (off by default)
    #[arg(long)]
    phase_deadline_ms: Option<u64>,
    /// How long an ended game stays queryable; 0 keeps it forever
    #[arg(long, default_value = "600")]
    game_retention_secs: u64,
    /// HS256 signing secret for tokens
    #[arg(long, env = "DUEL_TOKEN_SECRET", default_value = "super secret", hide_env_values = true)]
    token_secret: String,
    /// Token lifetime; tokens never expire when unset
    #[arg(long)]
    token_ttl_secs: Option<u64>,
    /// File with one prompt per line, replacing the built-in pool
    #[arg(long)]
    prompts: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig, BoxError> {
        let prompts = match &self.prompts {
            Some(path) => load_prompts(path)?,
            None => default_prompts(),
        };

        Ok(ServerConfig {
            command_addr: format!("{}:{}", self.host, self.command_port),
            notification_addr: format!("{}:{}", self.host, self.notification_port),
            rules: GameRules {
                seats: self.seats,
                max_rounds: self.rounds,
            },
            start_delay: Duration::from_millis(self.start_delay_ms),
            pacing_delay: Duration::from_millis(self.pacing_delay_ms),
            phase_deadline: self.phase_deadline_ms.map(Duration::from_millis),
            game_retention: match self.game_retention_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            token_secret: self.token_secret,
            token_ttl: self.token_ttl_secs.map(Duration::from_secs),
            prompts: prompts.into(),
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    env_logger::init();

    let args = Args::parse();
    let server = Server::bind(args.into_config()?).await?;

    tokio::select! {
        _ = server.run() => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
