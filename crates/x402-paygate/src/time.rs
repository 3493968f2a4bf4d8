/// Current unix time in seconds.
///
/// A clock before the epoch yields 0: every signed timestamp then looks
/// future-dated and is rejected, and no pending settlement is expired early.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_else(|_| {
            tracing::error!("system clock before UNIX epoch");
            0
        })
}
