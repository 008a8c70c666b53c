pub mod attendance;
pub mod employee;
pub mod project;
pub mod role;
pub mod task_assignment;
pub mod user;
