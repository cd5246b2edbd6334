pub mod exif;
pub mod frames;
pub mod jpeg;
pub mod pipeline;
pub mod scanner;
#[cfg(test)]
pub mod test_support;
pub mod thumbnails;
pub mod util;
