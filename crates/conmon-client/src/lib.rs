pub mod driver;
pub mod launcher;
pub mod mailer;

#[cfg(feature = "browser")]
pub mod browser_driver;

pub use driver::ReqwestDriver;
pub use launcher::ProcessLauncher;
pub use mailer::{HttpMailer, MailConfig};

#[cfg(feature = "browser")]
pub use browser_driver::BrowserDriver;
