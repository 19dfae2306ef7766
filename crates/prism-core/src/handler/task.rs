//! Task trait: ties a task name to its payload type.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// A typed task payload.
///
/// The payload type doubles as the submission-time validator: a submit call
/// whose JSON does not decode as `T` is rejected before anything is
/// enqueued, so malformed arguments never reach a worker.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct DownloadImage {
///     image_url: String,
/// }
///
/// impl Task for DownloadImage {
///     const NAME: &'static str = "download_image";
/// }
/// ```
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The handler name used for routing and registration.
    const NAME: &'static str;
}
