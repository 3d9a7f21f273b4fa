pub mod accumulator;
pub mod audio;
pub mod cancel;
pub mod inference;
pub mod mix;
pub mod window;
