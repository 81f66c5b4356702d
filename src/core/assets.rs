//! Embedded default assets.

use rust_embed::RustEmbed;

#[derive(RustEmbed)]
#[folder = "assets/"]
#[include = "*.toml"]
pub struct DefaultAssets;

/// Fetch an embedded asset as UTF-8 text.
pub fn get_asset(name: &str) -> Option<String> {
    DefaultAssets::get(name).map(|f| String::from_utf8_lossy(f.data.as_ref()).to_string())
}
