mod exports;
mod progress;
mod styling;
mod summary;
mod tables;

pub use exports::{export_forest, write_json};
pub use progress::{PhaseProgress, EXTRACT_PHASES, TREE_PHASES};
pub use styling::{dim, magenta_bold};
pub use summary::print_summary;

/// Prints the `StoryMap` banner to stderr.
pub fn print_banner() {
    eprintln!(
        r"
{} {}
  {}
",
        magenta_bold("🗺️  StoryMap"),
        dim(env!("CARGO_PKG_VERSION")),
        dim("Lark Bitable user story maps")
    );
}
