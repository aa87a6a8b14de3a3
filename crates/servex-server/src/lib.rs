//! Servex server - runs a broker node as a process

pub mod cli;
pub mod startup;
