pub mod record;
pub mod registry;

pub use record::{DbRecord, LockMode, LockState, INDEX_FILES};
pub use registry::{canonical, Acquired, DbHandle, DbRegistry};
