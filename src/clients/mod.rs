//! HTTP collaborator clients
//!
//! Concrete implementations of the collaborator seams over `reqwest`: the
//! wall content source, the chat and photo feed publishers, and the tagging
//! and translation clients. Every client takes its API base URL from
//! configuration so tests can point it at a local mock server.

/// Chat channel publisher (media group API)
pub mod chat;
/// Photo feed publisher (container/carousel API)
pub mod photofeed;
/// Image tagging client
pub mod tagger;
/// Text translation client
pub mod translate;
/// Wall content source
pub mod wall;

pub use chat::ChatPublisher;
pub use photofeed::PhotoFeedPublisher;
pub use tagger::ImageTagClient;
pub use translate::TranslationClient;
pub use wall::WallSource;
