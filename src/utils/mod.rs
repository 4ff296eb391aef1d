pub mod strings;
pub mod traits;
