pub mod filesystem;
pub mod thumbnail;

pub use filesystem::AssetStore;
pub use thumbnail::render_thumbnail;
