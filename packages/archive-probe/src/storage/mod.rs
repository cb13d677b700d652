//! Archive storage transports.
//!
//! Available backends:
//! - `HttpRangeStorage` - HTTP `Range` requests against an object store or CDN
//! - `FileStorage` - Archive files on a local or mounted filesystem

pub mod file;
pub mod http;

pub use file::FileStorage;
pub use http::HttpRangeStorage;
