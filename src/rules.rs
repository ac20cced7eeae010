pub use self::filters::{MediaKind, classify_media, passes_filters};
pub use self::schedule::passes_schedule;
pub use self::transforms::{TransformContext, apply_transforms, pick_media_replacement};

pub mod filters;
pub mod schedule;
pub mod transforms;
