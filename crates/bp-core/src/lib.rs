pub mod compositor;
pub mod design;

pub use compositor::{CanvasSpec, CompositeError, CompositeImage, RawImage, composite};
pub use compositor::{PRINT_HEIGHT, PRINT_WIDTH};
pub use design::{Design, DesignMetadata, DesignStatus, Prompt};
