pub mod audio;
pub mod bot;
pub mod config;
pub mod error;
pub mod sources;
pub mod ui;
pub mod voice;

#[cfg(test)]
mod test_support;
