pub mod probes;
pub mod tasks;
