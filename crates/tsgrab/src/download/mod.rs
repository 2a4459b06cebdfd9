mod pool;
mod session;

pub use pool::*;
pub use session::*;
