//! Repository layer persisting inventory models to SQLite

pub mod computers;
pub mod groups;

pub use computers::ComputerRepo;
pub use groups::GroupRepo;
