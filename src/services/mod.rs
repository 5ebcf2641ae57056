pub mod archive;
pub mod fetch;
pub mod page;
pub mod resolver;
pub mod ui;
