pub mod html;
pub mod labels;

pub use html::{decode_html, normalize_text};
pub use labels::{difficulty_label, type_label};
