pub mod aggregate;
pub mod config;
pub mod controller;
pub mod driver;
pub mod io;
pub mod logging;
pub mod network;
pub mod scenario;
pub mod sweep;
