//! Service-side state and side effects behind the HTTP handlers.

pub mod catalog;
pub mod playback_recorder;
pub mod user_registry;

pub use catalog::{CatalogError, MovieCatalog, MovieDetail};
pub use playback_recorder::{PlaybackHistory, PlaybackRecord, PlaybackRecorder};
pub use user_registry::{InMemoryUserStore, NewUser, RegistryError, User, UserStore};
