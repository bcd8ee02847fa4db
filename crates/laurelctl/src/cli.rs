//! CLI - Command-line argument parsing
//!
//! Keeps argument parsing separate from execution logic.

use clap::{Parser, Subcommand};
use laurel_common::{Category, Scope};

pub const DEFAULT_DAEMON_URL: &str = "http://127.0.0.1:7870";

/// Laurel rewards CLI
#[derive(Parser)]
#[command(name = "laurelctl")]
#[command(about = "Laurel - achievements, points, leaderboards and referrals", long_about = None)]
#[command(version = env!("LAUREL_VERSION"))]
pub struct Cli {
    /// Daemon base URL
    #[arg(long, global = true, env = "LAURELD_URL", default_value = DEFAULT_DAEMON_URL)]
    pub daemon: String,

    /// Print raw JSON instead of formatted output
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Check daemon health
    Health,

    /// List a user's achievements and progress
    Achievements {
        user_id: String,

        /// Only buyer or seller achievements
        #[arg(long, value_parser = parse_category)]
        category: Option<Category>,
    },

    /// Unlocked count and collector badge
    Summary { user_id: String },

    /// Re-evaluate progress and record new unlocks
    Evaluate { user_id: String },

    /// Points and tier for a user
    Points { user_id: String },

    /// Ranked users
    Leaderboard {
        /// all-time, monthly, weekly, top-buyers, top-sellers
        #[arg(long, default_value = "all-time", value_parser = parse_scope)]
        scope: Scope,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Referral program
    Referral {
        #[command(subcommand)]
        action: ReferralCommands,
    },
}

/// Referral subcommands
#[derive(Subcommand)]
pub enum ReferralCommands {
    /// Level, counts and earnings
    Status { user_id: String },

    /// Show (creating if needed) the user's referral code
    Code { user_id: String },

    /// Redeem a code for a newly referred user
    Redeem { code: String, referred_id: String },

    /// Confirm a pending referral
    Complete {
        referred_id: String,

        /// Reward credited to the referrer, in cents
        #[arg(long, default_value_t = 0)]
        reward_cents: u64,
    },
}

fn parse_category(s: &str) -> Result<Category, String> {
    s.parse()
}

fn parse_scope(s: &str) -> Result<Scope, String> {
    s.parse()
}
