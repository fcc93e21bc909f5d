pub mod feed;
pub mod observable;
pub mod storage;
pub mod sync;
