pub mod auth;
pub mod backup;
pub mod core;
pub mod hierarchy;
pub mod layers;
pub mod learning_path;
pub mod quizzes;
pub mod resources;
pub mod setup;
pub mod uploads;
