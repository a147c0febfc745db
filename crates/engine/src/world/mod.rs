mod nav;
mod rng;
mod tilemap;

pub use nav::{find_path, find_path_to_adjacent, find_path_with, NavCache};
pub use rng::XorShift32;
pub use tilemap::{Terrain, TileGrid, TilePos, TilemapError};
