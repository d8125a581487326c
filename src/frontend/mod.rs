//! HTTP frontend serving the days-since count.

mod index;
mod render;

pub use index::router;
pub use render::watch_render_data;
