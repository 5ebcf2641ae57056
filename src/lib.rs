pub mod core;
pub mod services;
pub mod utils;

pub use crate::core::error::HelperError;
pub use crate::core::state::{ChapterMap, ChapterRecord};
pub use crate::services::archive::{ArchiveBuilder, BuildOptions};
pub use crate::services::resolver::resolve;
