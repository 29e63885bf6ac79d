//! Burst classification and temporary allowance management

mod classifier;
mod handler;
mod types;

pub use classifier::{
    default_rules, is_known_browser, BotUserAgentRule, BurstClassifier, BurstContext,
    ClassificationError, ClassifierRule, KnownGoodTrafficRule, RapidFireRule,
    RepeatOffenderRule, SensitivePathRule, MAX_CONFIDENCE,
};
pub use handler::{BurstHandler, BurstStatistics, BurstTypeCounts, SweepReport};
pub use types::{BurstConfig, BurstDecision, BurstEvent, BurstType};
