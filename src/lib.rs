pub mod configuration;
pub mod controller;
pub mod data_capture;
pub mod error_handling;
pub mod logging;
pub mod network;
pub mod response_simulation;
pub mod session_management;
pub mod storage;
pub mod web_interface;
