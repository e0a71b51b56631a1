pub mod routes;
pub mod storage;

pub use routes::router;
pub use storage::BlobStorage;
