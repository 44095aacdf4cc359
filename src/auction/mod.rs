pub mod events;
pub mod machine;
pub mod model;
