pub mod batch;
pub mod catalog;
pub mod clock;
pub mod device_directory;
pub mod error;
pub mod materializer;
pub mod punch;
pub mod qr;
pub mod reconcile;
pub mod tenant;
pub mod tracker;
