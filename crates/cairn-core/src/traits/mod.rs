pub mod store;

pub use store::{DocumentStore, InsertOutcome, ScanControl, StoreSession};
