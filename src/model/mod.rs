pub mod anchor;
pub mod attendance;
pub mod check_in;
pub mod notification;
pub mod role;
pub mod student;
