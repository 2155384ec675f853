pub mod commands;
pub mod input;
pub mod render;
pub mod ui;

pub use input::{InputFormat, load_comments};
pub use render::ConsoleRenderer;
