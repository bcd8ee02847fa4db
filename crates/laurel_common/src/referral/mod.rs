//! Referral program: the level ladder and the code/referral ledger.

pub mod ladder;
pub mod ledger;

pub use ladder::{LadderReward, LadderStanding, LADDER};
pub use ledger::{code_for_user, ReferralLedger, ReferralRecord, ReferralStatus};
