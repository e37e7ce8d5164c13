pub mod data_store;

pub use data_store::{AppendOptions, DataStore, DataStoreReader, DataStoreWriter, EventStream};
