pub mod add;
pub mod verify;
