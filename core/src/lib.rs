pub mod aggregate;
pub mod measurement;
pub mod network;
pub mod scanner;
pub mod schedule;
pub mod sink;
pub mod trace;
