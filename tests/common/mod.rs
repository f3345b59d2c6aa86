#![allow(dead_code)]

pub mod controller;
pub mod exchange;
pub mod mock_connector;
pub mod strategies;

pub use controller::*;
pub use exchange::*;
pub use mock_connector::*;
