mod service;
mod writer;

pub use service::*;
pub use writer::*;

pub mod prelude {
    pub use crate::service::*;
    pub use crate::writer::*;
}
