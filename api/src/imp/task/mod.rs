mod exit;
pub mod signal;
mod thread;
mod wait;

pub use self::exit::*;
pub use self::signal::*;
pub use self::thread::*;
pub use self::wait::*;
