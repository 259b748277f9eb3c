pub mod fjall;
pub mod keys;
pub mod mem;
pub mod traits;

pub use traits::{MigrationLogStore, RecordStore};
