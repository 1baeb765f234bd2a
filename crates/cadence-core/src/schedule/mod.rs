//! Schedule - cron 式とエイリアスの評価

pub mod alias;
pub mod evaluator;

pub use self::alias::AliasTable;
pub use self::evaluator::{CronSchedule, ScheduleEvaluator, minute_floor};
