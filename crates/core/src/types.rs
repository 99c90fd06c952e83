/// Every regional analysis run is identified by a UUID (v7, time ordered).
pub type JobId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
