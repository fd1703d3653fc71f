pub mod audit;
pub mod core;
pub mod directory;
pub mod grades;
pub mod marks;
pub mod policy;
pub mod windows;
