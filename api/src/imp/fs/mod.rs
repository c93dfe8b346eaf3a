mod path;

pub use self::path::*;
