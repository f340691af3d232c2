/// User ids are opaque strings generated at registration.
pub type UserId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Seconds since the Unix epoch, as carried in token claims.
pub type UnixSeconds = i64;
