mod redis;

pub use redis::*;
