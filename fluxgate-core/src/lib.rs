mod channel;
mod clock;
mod config;
mod logging;
mod models;
mod pubsub;
mod traits;

pub use channel::*;
pub use clock::*;
pub use config::*;
pub use models::*;
pub use pubsub::*;
pub use traits::*;

pub mod prelude {
    pub use crate::channel::*;
    pub use crate::clock::*;
    pub use crate::config::*;
    pub use crate::logging::*;
    pub use crate::models::*;
    pub use crate::pubsub::*;
    pub use crate::traits::*;
}
