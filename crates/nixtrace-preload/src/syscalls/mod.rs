// Replacement entry points: forward first, then observe.
pub mod dir;
pub mod misc;
pub mod open;
pub mod stat;
