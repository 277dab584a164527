pub mod appointments;
pub mod directory;
pub mod health;
