pub mod journal;
pub mod store;

pub use journal::RunJournal;
pub use store::RunStore;
