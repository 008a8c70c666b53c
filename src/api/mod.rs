pub mod attendance;
pub mod employee;
pub mod integrity;
pub mod project;
pub mod supervisor;
pub mod worker_task;
