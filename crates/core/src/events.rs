/// Notifications from the server to the encoding side.
///
/// All methods have empty defaults so implementors pick what they need.
/// They are called from connection threads and producer threads, so
/// implementations must be cheap and must not call back into blocking
/// server operations.
pub trait StreamEvents: Send + Sync {
    /// A client subscribed to `path`; `total` is the stream's new client count.
    fn on_client_connected(&self, _path: &str, _total: usize) {}

    /// A client left `path`; `total` is the stream's remaining client count.
    fn on_client_disconnected(&self, _path: &str, _total: usize) {}

    /// A client sent PLAY on `path`. The encoder should produce a key frame
    /// now so the new viewer can start decoding.
    fn on_client_started_playing(&self, _path: &str) {}

    /// Video parameter sets or audio config of `path` changed.
    fn on_parameter_sets_changed(&self, _path: &str) {}
}

/// Listener that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEvents;

impl StreamEvents for NoopEvents {}
