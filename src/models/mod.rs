pub mod auth;
pub mod chat;
pub mod job;
pub mod payment;
pub mod response;
pub mod review;
pub mod stats;
pub mod user;
pub mod verification;

pub use auth::*;
pub use chat::*;
pub use job::*;
pub use payment::*;
pub use response::*;
pub use review::*;
pub use stats::*;
pub use user::*;
pub use verification::*;
