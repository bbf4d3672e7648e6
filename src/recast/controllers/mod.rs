pub mod session_controller;

#[cfg(test)]
mod session_controller_test;

pub use session_controller::SessionController;
