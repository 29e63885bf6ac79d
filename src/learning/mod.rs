//! Usage pattern learning

mod learner;
mod pattern;

pub use learner::{LearnerStats, LearningError, LearningReport, PatternMap, UsagePatternLearner};
pub use pattern::{analyze_history, recommend_limit, AnalysisParams, UsagePattern, UserType};
