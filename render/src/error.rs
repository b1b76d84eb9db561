//! Error type of the rendering API.

use karst_heap::HeapError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    /// A renderer lifecycle method was called out of order.
    #[error("renderer operation called in the wrong state")]
    WrongState,
    /// Color and depth buffers disagree on dimensions.
    #[error("color buffer is {color_width}x{color_height} but depth buffer is {depth_width}x{depth_height}")]
    SizeMismatch {
        color_width: i32,
        color_height: i32,
        depth_width: i32,
        depth_height: i32,
    },
    /// The operation needs a depth buffer that was not given to `begin`.
    #[error("a depth buffer is required for this operation")]
    MissingDepthBuffer,
    /// Malformed model file content.
    #[error("parse error: {0}")]
    Parse(String),
    #[error(transparent)]
    Heap(#[from] HeapError),
}
