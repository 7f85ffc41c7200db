pub mod actuator;
pub mod audio;
pub mod catalog;
pub mod config;
pub mod controller;
pub mod messages;
pub mod ramp;
pub mod recovery;
pub mod runtime;
