use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TilePos {
    pub x: i32,
    pub y: i32,
}

impl TilePos {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn manhattan(self, other: TilePos) -> u32 {
        self.x.abs_diff(other.x).saturating_add(self.y.abs_diff(other.y))
    }

    /// Chebyshev distance; used for leash and range checks that count diagonals as one step.
    pub fn chebyshev(self, other: TilePos) -> u32 {
        self.x.abs_diff(other.x).max(self.y.abs_diff(other.y))
    }

    pub fn offset(self, dx: i32, dy: i32) -> TilePos {
        TilePos {
            x: self.x.saturating_add(dx),
            y: self.y.saturating_add(dy),
        }
    }

    pub fn neighbors4(self) -> [TilePos; 4] {
        [
            self.offset(0, 1),
            self.offset(1, 0),
            self.offset(0, -1),
            self.offset(-1, 0),
        ]
    }

    pub fn neighbors8(self) -> [TilePos; 8] {
        [
            self.offset(0, 1),
            self.offset(1, 0),
            self.offset(0, -1),
            self.offset(-1, 0),
            self.offset(1, 1),
            self.offset(1, -1),
            self.offset(-1, -1),
            self.offset(-1, 1),
        ]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Terrain {
    #[default]
    Open,
    Water,
    Cliff,
    Floor,
    Wall,
    Path,
    Lava,
}

impl Terrain {
    pub const ALL: [Terrain; 7] = [
        Terrain::Open,
        Terrain::Water,
        Terrain::Cliff,
        Terrain::Floor,
        Terrain::Wall,
        Terrain::Path,
        Terrain::Lava,
    ];

    pub fn code(self) -> u8 {
        match self {
            Self::Open => 0,
            Self::Water => 1,
            Self::Cliff => 2,
            Self::Floor => 3,
            Self::Wall => 4,
            Self::Path => 5,
            Self::Lava => 6,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|terrain| terrain.code() == code)
    }

    pub fn is_walkable(self) -> bool {
        matches!(self, Self::Open | Self::Floor | Self::Path)
    }

    /// Glyph used by the hand-authored zone maps.
    pub fn from_glyph(glyph: char) -> Option<Self> {
        match glyph {
            '.' => Some(Self::Open),
            '~' => Some(Self::Water),
            '^' => Some(Self::Cliff),
            '_' => Some(Self::Floor),
            '#' => Some(Self::Wall),
            '=' => Some(Self::Path),
            '!' => Some(Self::Lava),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TilemapError {
    #[error("tile count mismatch: expected {expected}, got {actual}")]
    TileCountMismatch { expected: usize, actual: usize },
    #[error("grid must be at least 1x1, got {width}x{height}")]
    Empty { width: u32, height: u32 },
    #[error("row {row} has width {actual}, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        actual: usize,
    },
    #[error("unknown terrain glyph '{glyph}' at row {row}, column {column}")]
    UnknownGlyph {
        glyph: char,
        row: usize,
        column: usize,
    },
}

/// Row-major terrain grid. Row 0 is the top row of the authored map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileGrid {
    width: u32,
    height: u32,
    tiles: Vec<Terrain>,
}

impl TileGrid {
    pub fn new(width: u32, height: u32, tiles: Vec<Terrain>) -> Result<Self, TilemapError> {
        if width == 0 || height == 0 {
            return Err(TilemapError::Empty { width, height });
        }
        let expected = width as usize * height as usize;
        let actual = tiles.len();
        if expected != actual {
            return Err(TilemapError::TileCountMismatch { expected, actual });
        }
        Ok(Self {
            width,
            height,
            tiles,
        })
    }

    pub fn filled(width: u32, height: u32, terrain: Terrain) -> Result<Self, TilemapError> {
        Self::new(
            width,
            height,
            vec![terrain; width as usize * height as usize],
        )
    }

    pub fn from_rows<S: AsRef<str>>(rows: &[S]) -> Result<Self, TilemapError> {
        let height = rows.len();
        let width = rows.first().map(|row| row.as_ref().chars().count()).unwrap_or(0);
        let mut tiles = Vec::with_capacity(width * height);
        for (row_index, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            let actual = row.chars().count();
            if actual != width {
                return Err(TilemapError::RaggedRow {
                    row: row_index,
                    expected: width,
                    actual,
                });
            }
            for (column, glyph) in row.chars().enumerate() {
                let terrain = Terrain::from_glyph(glyph).ok_or(TilemapError::UnknownGlyph {
                    glyph,
                    row: row_index,
                    column,
                })?;
                tiles.push(terrain);
            }
        }
        Self::new(width as u32, height as u32, tiles)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn in_bounds(&self, pos: TilePos) -> bool {
        pos.x >= 0 && pos.y >= 0 && (pos.x as u32) < self.width && (pos.y as u32) < self.height
    }

    pub fn index_of(&self, pos: TilePos) -> Option<usize> {
        if !self.in_bounds(pos) {
            return None;
        }
        Some(pos.y as usize * self.width as usize + pos.x as usize)
    }

    pub fn pos_of_index(&self, index: usize) -> TilePos {
        TilePos {
            x: (index % self.width as usize) as i32,
            y: (index / self.width as usize) as i32,
        }
    }

    pub fn terrain_at(&self, pos: TilePos) -> Option<Terrain> {
        self.index_of(pos)
            .and_then(|index| self.tiles.get(index).copied())
    }

    pub fn is_walkable(&self, pos: TilePos) -> bool {
        self.terrain_at(pos).is_some_and(Terrain::is_walkable)
    }

    pub fn set_terrain(&mut self, pos: TilePos, terrain: Terrain) -> bool {
        let Some(index) = self.index_of(pos) else {
            return false;
        };
        self.tiles[index] = terrain;
        true
    }

    pub fn tiles(&self) -> &[Terrain] {
        &self.tiles
    }

    pub fn clamp_pos(&self, pos: TilePos) -> TilePos {
        TilePos {
            x: pos.x.clamp(0, self.width as i32 - 1),
            y: pos.y.clamp(0, self.height as i32 - 1),
        }
    }

    /// Nearest walkable tile by breadth-first ring search, preferring the tile itself.
    pub fn nearest_walkable(&self, pos: TilePos) -> Option<TilePos> {
        let origin = self.clamp_pos(pos);
        if self.is_walkable(origin) {
            return Some(origin);
        }
        let max_radius = self.width.max(self.height) as i32;
        for radius in 1..=max_radius {
            let mut best: Option<TilePos> = None;
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    if dx.abs() != radius && dy.abs() != radius {
                        continue;
                    }
                    let candidate = origin.offset(dx, dy);
                    if !self.is_walkable(candidate) {
                        continue;
                    }
                    let better = match best {
                        None => true,
                        Some(current) => {
                            (origin.manhattan(candidate), candidate.y, candidate.x)
                                < (origin.manhattan(current), current.y, current.x)
                        }
                    };
                    if better {
                        best = Some(candidate);
                    }
                }
            }
            if best.is_some() {
                return best;
            }
        }
        None
    }
}
