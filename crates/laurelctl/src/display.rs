//! Display helpers for laurelctl output. ASCII only.

use laurel_common::api::{
    AchievementSummary, AchievementView, AchievementsResponse, EvaluationResponse, HealthResponse,
    LeaderboardResponse, PointsResponse, ReferralStatusResponse,
};
use laurel_common::referral::ReferralRecord;
use laurel_common::{AchievementState, Tier};
use owo_colors::OwoColorize;

const BAR_WIDTH: usize = 20;
const KEY_WIDTH: usize = 14;

fn print_kv(key: &str, value: &str) {
    println!("  {:width$} {}", key, value, width = KEY_WIDTH);
}

fn tier_label(tier: Tier) -> String {
    match tier {
        Tier::Diamond => tier.as_str().bright_cyan().to_string(),
        Tier::Platinum => tier.as_str().bright_white().to_string(),
        Tier::Gold => tier.as_str().yellow().to_string(),
        Tier::Silver => tier.as_str().white().to_string(),
        Tier::Bronze => tier.as_str().red().to_string(),
    }
}

/// `[#####.....]` style bar, full once target is reached
pub fn progress_bar(value: u64, target: u64) -> String {
    let target = target.max(1);
    let filled = ((value.min(target) as u128 * BAR_WIDTH as u128) / target as u128) as usize;
    format!("[{}{}]", "#".repeat(filled), ".".repeat(BAR_WIDTH - filled))
}

/// Minor units as `12.34`
pub fn format_cents(cents: u64) -> String {
    format!("{}.{:02}", cents / 100, cents % 100)
}

pub fn print_health(health: &HealthResponse) {
    println!("{} laureld v{}", "[OK]".bright_green(), health.version);
    print_kv("status", &health.status);
    print_kv("achievements", &health.achievements.to_string());
}

fn print_achievement(view: &AchievementView) {
    let marker = match view.state {
        AchievementState::Unlocked => "[X]".bright_green().to_string(),
        AchievementState::InProgress => "[~]".yellow().to_string(),
        AchievementState::NotStarted => "[ ]".dimmed().to_string(),
    };
    println!(
        "  {} {:24} {} {}/{}",
        marker,
        view.name,
        progress_bar(view.progress_value, view.target),
        view.progress_value,
        view.target
    );
    if let Some(at) = view.unlocked_at {
        println!("      unlocked {}", at.format("%Y-%m-%d %H:%M UTC").dimmed());
    }
}

pub fn print_achievements(resp: &AchievementsResponse) {
    let scope = resp
        .category
        .map(|c| format!(" ({})", c))
        .unwrap_or_default();
    println!("Achievements for {}{}", resp.user_id.bold(), scope);
    if resp.achievements.is_empty() {
        println!("  (none)");
        return;
    }
    for view in &resp.achievements {
        print_achievement(view);
    }
}

pub fn print_summary(summary: &AchievementSummary) {
    println!("Summary for {}", summary.user_id.bold());
    print_kv("unlocked", &format!("{}/{}", summary.unlocked, summary.total));
    print_kv("badge", &tier_label(summary.badge));
}

pub fn print_evaluation(resp: &EvaluationResponse) {
    if resp.newly_unlocked.is_empty() {
        println!("No new achievements for {}", resp.user_id);
        return;
    }
    println!("{} {} unlocked:", "[NEW]".bright_green(), resp.user_id.bold());
    for id in &resp.newly_unlocked {
        println!("  * {}", id);
    }
}

pub fn print_points(resp: &PointsResponse) {
    let s = &resp.snapshot;
    println!("Points for {}", resp.user_id.bold());
    print_kv("points", &s.points.to_string());
    print_kv("tier", &tier_label(s.tier));
    print_kv("orders", &s.counts.delivered_orders.to_string());
    print_kv("reviews", &s.counts.reviews_given.to_string());
    print_kv("referrals", &s.counts.completed_referrals.to_string());
}

pub fn print_leaderboard(resp: &LeaderboardResponse) {
    println!("Leaderboard ({})", resp.scope);
    if resp.entries.is_empty() {
        println!("  (no ranked users)");
        return;
    }
    for entry in &resp.entries {
        println!(
            "  {:>4}. {:24} {:>10}  {}",
            entry.rank,
            entry.user_id,
            entry.points,
            tier_label(entry.tier)
        );
    }
}

pub fn print_referral_status(resp: &ReferralStatusResponse) {
    println!("Referrals for {}", resp.user_id.bold());
    print_kv("level", &resp.level.to_string());
    print_kv("completed", &resp.completed_referrals.to_string());
    print_kv("total", &resp.total_referrals.to_string());
    print_kv("earnings", &format_cents(resp.total_earnings_cents));
    match resp.next_level_requirement {
        Some(next) => print_kv("next level", &format!("at {} completed", next)),
        None => print_kv("next level", "max level reached"),
    }
    if let Some(reward) = &resp.reward {
        let bonus = if reward.bonus_cents > 0 {
            format!(" + {} bonus", format_cents(reward.bonus_cents))
        } else {
            String::new()
        };
        print_kv("reward", &format!("{}{}", reward.perk, bonus));
    }
    print_kv("code", resp.referral_code.as_deref().unwrap_or("(not issued)"));
}

pub fn print_referral_record(record: &ReferralRecord) {
    println!(
        "{} {} -> {} via {}",
        format!("[{}]", record.status.as_str().to_uppercase()).bright_green(),
        record.referrer_id,
        record.referred_id,
        record.code
    );
    if record.reward_cents > 0 {
        print_kv("reward", &format_cents(record.reward_cents));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_bar() {
        assert_eq!(progress_bar(0, 10), format!("[{}]", ".".repeat(20)));
        assert_eq!(progress_bar(5, 10), format!("[{}{}]", "#".repeat(10), ".".repeat(10)));
        assert_eq!(progress_bar(99, 10), format!("[{}]", "#".repeat(20)));
        assert_eq!(progress_bar(1, 0), format!("[{}]", "#".repeat(20)));
    }

    #[test]
    fn test_format_cents() {
        assert_eq!(format_cents(0), "0.00");
        assert_eq!(format_cents(505), "5.05");
        assert_eq!(format_cents(5_000), "50.00");
    }
}
