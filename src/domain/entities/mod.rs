pub mod event;
pub mod object_document;

pub use event::{ActionMetadata, Event};
pub use object_document::{
    BrokenInfo, ChunkSettings, ObjectDocument, RollbackRecord, SnapshotRef, StreamInformation,
};
