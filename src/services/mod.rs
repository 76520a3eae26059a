pub mod captcha;
pub mod chat;
pub mod mailer;
pub mod otp;
pub mod passwords;
pub mod tokens;

pub use captcha::{CaptchaVerifier, ReplayCache};
pub use chat::{ChatEvent, ChatHub};
pub use mailer::{Mailer, OutgoingMail};
pub use tokens::{Claims, TokenService};
