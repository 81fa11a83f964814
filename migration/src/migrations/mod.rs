pub mod m202601120001_create_students;
pub mod m202601120002_create_rooms_devices;
pub mod m202601120003_create_sessions;
pub mod m202601120004_create_absences;
pub mod m202601120005_create_qr;
