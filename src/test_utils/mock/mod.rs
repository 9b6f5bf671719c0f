mod mock_controller;

pub use mock_controller::*;
