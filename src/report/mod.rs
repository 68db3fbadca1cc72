//! Report generation for replayed trace forests.

pub mod generator;

pub use generator::{build_report, generate_json_report, generate_markdown_report, RenderOptions};
