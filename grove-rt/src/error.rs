/// Errors surfaced across UI<->audio-thread boundaries. Realtime-path
/// functions themselves never return this type (a realtime function that
/// can fail returns a plain bool/Option so the caller never pays for
/// unwinding machinery); `CoreError` is for the non-realtime side: matrix
/// commands, buffer-store futures, and handle lookups issued from the UI
/// thread.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("queue is full")]
    QueueFull,
    #[error("no such handle")]
    NoSuchHandle,
    #[error("index out of bounds")]
    OutOfBounds,
    #[error("a snapshot is already in flight")]
    SnapshotInFlight,
    #[error("buffer underrun or overflow")]
    UnderrunOrOverflow,
}
