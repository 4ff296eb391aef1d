pub mod node;
pub mod pod;
