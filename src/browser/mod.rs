//! Browser access: connect or launch, then drive one tab per job

pub mod connection;
pub mod driver;
pub mod headless;

pub use connection::{connect_to_browser, new_blank_page};
pub use driver::{dispenser_number_from_label, ChromeSession, ChromeSessionFactory};
pub use headless::launch_headless_browser;
