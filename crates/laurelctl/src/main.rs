//! Laurel Control - CLI client for the Laurel rewards daemon

mod cli;
mod client;
mod display;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands, ReferralCommands};
use client::LaureldClient;
use serde::Serialize;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print as JSON or through the human formatter
macro_rules! emit {
    ($json:expr, $value:expr, $human:path) => {{
        let value = $value;
        if $json {
            print_json(&value)?;
        } else {
            $human(&value);
        }
    }};
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    tracing::debug!("laurelctl v{} using {}", env!("LAUREL_VERSION"), cli.daemon);
    let client = LaureldClient::new(&cli.daemon)?;
    let json = cli.json;

    match cli.command {
        Commands::Health => emit!(json, client.health().await?, display::print_health),
        Commands::Achievements { user_id, category } => emit!(
            json,
            client.achievements(&user_id, category).await?,
            display::print_achievements
        ),
        Commands::Summary { user_id } => {
            emit!(json, client.summary(&user_id).await?, display::print_summary)
        }
        Commands::Evaluate { user_id } => {
            emit!(json, client.evaluate(&user_id).await?, display::print_evaluation)
        }
        Commands::Points { user_id } => {
            emit!(json, client.points(&user_id).await?, display::print_points)
        }
        Commands::Leaderboard { scope, limit } => emit!(
            json,
            client.leaderboard(scope, limit).await?,
            display::print_leaderboard
        ),
        Commands::Referral { action } => match action {
            ReferralCommands::Status { user_id } => emit!(
                json,
                client.referral_status(&user_id).await?,
                display::print_referral_status
            ),
            ReferralCommands::Code { user_id } => {
                let resp = client.referral_code(&user_id).await?;
                if json {
                    print_json(&resp)?;
                } else {
                    println!("{}", resp.code);
                }
            }
            ReferralCommands::Redeem { code, referred_id } => emit!(
                json,
                client.redeem(&code, &referred_id).await?,
                display::print_referral_record
            ),
            ReferralCommands::Complete {
                referred_id,
                reward_cents,
            } => emit!(
                json,
                client.complete(&referred_id, reward_cents).await?,
                display::print_referral_record
            ),
        },
    }

    Ok(())
}
