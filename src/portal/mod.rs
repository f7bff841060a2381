//! Browser side of the scraper: a WebDriver client and the SLCM page adapter.

pub mod slcm;
pub mod webdriver;

pub use slcm::SlcmPortal;
pub use webdriver::WebDriver;
