/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Identifier the job processor assigns to a task (usually a file name
/// or the literal `"current_task"`).
pub type TaskId = String;
