//! Various utilities functions and types

mod rectangle;
mod transform;

pub use self::rectangle::{FRectangle, Rectangle};
pub use self::transform::Transform;
