//! Text and markup transformations applied to every cloned post.

pub mod buttons;
pub mod links;

pub use buttons::{render as render_buttons, resolve_markup};
pub use links::{RewrittenText, rewrite};
