use clap::{Parser, Subcommand};
use std::path::PathBuf;

use ws_gateway::auth::{JwtCodec, TokenDecoder, UserClaims};
use ws_gateway::config::{load_config, JwtConfig};

#[derive(Parser)]
#[command(name = "gateway-token")]
#[command(about = "Mint and inspect access tokens for ws-gateway", long_about = None)]
struct Cli {
    /// Read the signing key and issuer from this gateway config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Signing key (overrides the config file).
    #[arg(short, long)]
    key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Issue a token for a user
    Issue {
        #[arg(long)]
        user_id: i64,
        #[arg(long)]
        biz_id: i64,
        /// Lifetime in seconds (default 24h)
        #[arg(long)]
        ttl: Option<i64>,
    },
    /// Verify a token and print its claims
    Inspect { token: String },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut jwt = match &cli.config {
        Some(path) => load_config(path)?.jwt,
        None => JwtConfig::default(),
    };
    if let Some(key) = cli.key {
        jwt.key = key;
    }
    let codec = JwtCodec::from_config(&jwt);

    match cli.command {
        Commands::Issue {
            user_id,
            biz_id,
            ttl,
        } => {
            let mut claims = UserClaims::new(user_id, biz_id);
            if let Some(ttl) = ttl {
                claims.expires_at = Some(chrono::Utc::now().timestamp() + ttl);
            }
            println!("{}", codec.encode(&claims)?);
        }
        Commands::Inspect { token } => {
            let claims = codec.decode(&token)?;
            let value = serde_json::json!({
                "user_id": claims.user_id,
                "biz_id": claims.biz_id,
                "iat": claims.issued_at,
                "exp": claims.expires_at,
                "iss": claims.issuer,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }

    Ok(())
}
