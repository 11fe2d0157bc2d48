mod channel;
mod search;
mod session;

pub use channel::*;
pub use search::*;
pub use session::*;
