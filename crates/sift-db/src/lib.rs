mod error;
mod lookup;
#[cfg(feature = "memory")]
mod memory;
mod path;
mod query;
mod store;
mod value;

pub use error::{DbError, StoreError};
#[cfg(feature = "memory")]
pub use memory::MemoryStore;
pub use query::{FindOptions, Page, Pagination, SmartQuery};
pub use store::Store;
