pub mod absence;
pub mod device;
pub mod qr_scan;
pub mod qr_session;
pub mod room;
pub mod session;
pub mod session_room;
pub mod student;
