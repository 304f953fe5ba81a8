pub mod driver;
pub mod session;
pub mod webdriver;

pub use session::{LaunchOptions, WebDriverSession};
