//! Value and document model
//!
//! Every record flowing through a pipeline is a [`Document`]: an
//! insertion-ordered mapping from field name to [`Value`]. Values are a
//! closed tagged union so that coercion, ordering and equality are decided
//! in one place instead of at every call site.
//!
//! # Ordering
//!
//! Values of different kinds compare by type class first:
//!
//! `Null < Number < String < Object < Array < Bool < Date`
//!
//! Within a class the natural ordering applies. Equality is structural and
//! ignores object field order.

mod compare;
mod document;
mod path;
mod value;

pub use compare::{compare_values, type_rank};
pub use document::Document;
pub use path::{get_path, get_value_path, remove_path, set_path};
pub use value::Value;
