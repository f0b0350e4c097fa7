pub mod item;
pub mod reservation;
