pub mod bluetooth;
pub mod camera;
pub mod logging;
pub mod recognition;
pub mod speech;
