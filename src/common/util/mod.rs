pub mod date_utils;
pub mod id_utils;
pub mod task_util;

pub use date_utils::current_time_millis;
pub use id_utils::random_id;
pub use task_util::Scheduler;
