pub mod channel;
pub mod device;
pub mod feed;
pub mod sample;
pub mod status;
pub mod timefmt;
pub mod warning;
