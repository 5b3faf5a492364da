pub mod memory;

pub use memory::{CollectionInfo, InMemoryBackend};
