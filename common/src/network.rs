pub mod exclusion;
pub mod range;
pub mod route;
