pub mod stage;
pub mod teardown;
pub mod verify;
