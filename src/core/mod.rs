// Core modules implementing the appender cache, file opening, and error modeling.
pub mod appender;
pub mod archive_mutex;
pub mod archive_watch;
pub mod cache;
pub mod error;
pub mod opener;
pub mod params;
pub mod retry;
pub mod shared;
