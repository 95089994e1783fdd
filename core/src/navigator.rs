//! Navigation seam used when a session cannot be recovered.

/// Navigator trait - abstracts the application's router.
///
/// The HTTP client only ever asks two things of the router: where the user is
/// right now, and to go somewhere else. A browser shell would back this with
/// its history API; a CLI backs it with a log line.
pub trait Navigator: Send + Sync {
    /// Path of the current location (e.g. `/dashboard`).
    fn current_path(&self) -> String;

    /// Navigate to `path`.
    fn redirect(&self, path: &str);
}
