pub mod adjustments;
pub mod clipboard;
pub mod effects;
pub mod scripting;
pub mod shapes;
pub mod text;
