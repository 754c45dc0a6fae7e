pub mod schema;
pub mod storage;
mod story;
mod validation;

pub use storage::{SqliteStoryStore, StoreError, StoryStore};
pub use story::*;
pub use validation::*;
