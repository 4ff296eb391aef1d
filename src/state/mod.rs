mod transitions;

pub use transitions::{check_transition, Role, UpdateStatus};
