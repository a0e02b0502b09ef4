pub mod project;
pub mod tenant;
