mod key;
mod manifest;
mod segment;

pub use key::*;
pub use m3u8_rs;
pub use manifest::*;
pub use segment::*;
