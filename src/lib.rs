pub mod config;
pub mod enrich;
pub mod fetcher;
pub mod index;
pub mod notify;
pub mod orchestrator;
pub mod parser;
pub mod resolver;
pub mod sanitize;
pub mod snapshot;
pub mod store;
pub mod types;
pub mod writer;

pub use config::{RunConfig, SmtpConfig};
pub use enrich::{Enricher, Entity, EntityKind, EntityTagger, MockTagger, NoopTagger};
pub use fetcher::{ContentFetcher, Fetcher};
pub use index::KnownItemIndex;
pub use notify::{EmailNotifier, Notifier};
pub use orchestrator::IngestRunner;
pub use resolver::IdentityResolver;
pub use snapshot::{FsPublisher, SnapshotPublisher, ViewMaterializer};
pub use store::{ItemStore, MemoryStore, PgItemStore, QueryPage, QueryScope};
pub use types::{
    FeedSource, FetchConfig, IngestError, RawEntry, Resolved, Result, RunSummary, StoredItem,
};
pub use writer::{PersistenceWriter, WriteOutcome};
