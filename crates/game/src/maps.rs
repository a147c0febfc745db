//! Hand-authored zone layouts: terrain, fixtures, entry points and the tables seeding draws
//! from.

use engine::{Terrain, TileGrid, TilePos, TilemapError};

use crate::entities::{InteractableKind, LadderDirection, ResourceKind};
use crate::zones::ZoneKey;

/// Inclusive tile rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRect {
    pub min: TilePos,
    pub max: TilePos,
}

impl TileRect {
    pub const fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self {
            min: TilePos::new(x0, y0),
            max: TilePos::new(x1, y1),
        }
    }

    pub fn contains(&self, pos: TilePos) -> bool {
        pos.x >= self.min.x && pos.x <= self.max.x && pos.y >= self.min.y && pos.y <= self.max.y
    }

    pub fn width(&self) -> i32 {
        self.max.x - self.min.x + 1
    }

    pub fn height(&self) -> i32 {
        self.max.y - self.min.y + 1
    }

    pub fn tiles(&self) -> impl Iterator<Item = TilePos> + '_ {
        (self.min.y..=self.max.y)
            .flat_map(move |y| (self.min.x..=self.max.x).map(move |x| TilePos::new(x, y)))
    }
}

#[derive(Debug, Clone)]
pub struct FixtureSpec {
    pub id: &'static str,
    pub kind: InteractableKind,
    pub pos: TilePos,
}

#[derive(Debug, Clone, Copy)]
pub struct ResourceRegion {
    pub name: &'static str,
    pub rect: TileRect,
    pub weight: u32,
    /// Resource kinds this region hosts, with relative weights.
    pub kinds: &'static [(ResourceKind, u32)],
}

#[derive(Debug, Clone, Copy)]
pub struct ResourceTarget {
    pub kind: ResourceKind,
    pub count: u32,
    /// Minimum Chebyshev distance to another node of the same kind.
    pub min_spacing: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct MobSpawn {
    pub mob: &'static str,
    pub count: u32,
    pub region: TileRect,
}

#[derive(Debug, Clone)]
pub struct ZoneBlueprint {
    pub key: ZoneKey,
    pub grid: TileGrid,
    /// Natural terrain resources grow on.
    pub ground: Terrain,
    pub safe_zone: Option<TileRect>,
    pub buildings: Vec<TileRect>,
    pub fixtures: Vec<FixtureSpec>,
    /// Where ladder arrivals land.
    pub entry_point: TilePos,
    pub roaming: bool,
    pub resource_regions: &'static [ResourceRegion],
    pub resource_targets: &'static [ResourceTarget],
    pub mob_spawns: &'static [MobSpawn],
}

impl ZoneBlueprint {
    pub fn for_zone(key: ZoneKey) -> Result<Self, TilemapError> {
        match key {
            ZoneKey::Overworld => overworld(),
            ZoneKey::Dungeon => dungeon(),
        }
    }

    pub fn in_safe_zone(&self, pos: TilePos) -> bool {
        self.safe_zone.is_some_and(|rect| rect.contains(pos))
    }

    pub fn in_building(&self, pos: TilePos) -> bool {
        self.buildings.iter().any(|rect| rect.contains(pos))
    }

    pub fn fixture(&self, id: &str) -> Option<&FixtureSpec> {
        self.fixtures.iter().find(|fixture| fixture.id == id)
    }
}

pub const OVERWORLD_WIDTH: u32 = 40;
pub const OVERWORLD_HEIGHT: u32 = 30;
pub const DUNGEON_WIDTH: u32 = 30;
pub const DUNGEON_HEIGHT: u32 = 20;

pub const PLAYER_SPAWN: TilePos = TilePos::new(8, 10);
pub const TOWN: TileRect = TileRect::new(2, 2, 13, 11);

pub const BANK_POS: TilePos = TilePos::new(3, 8);
pub const VENDOR_POS: TilePos = TilePos::new(5, 8);
pub const FURNACE_POS: TilePos = TilePos::new(7, 8);
pub const ANVIL_POS: TilePos = TilePos::new(9, 8);
pub const QUARTERMASTER_POS: TilePos = TilePos::new(11, 8);
pub const BLACKSMITH_POS: TilePos = TilePos::new(10, 10);
pub const WELL_POS: TilePos = TilePos::new(5, 10);
pub const LADDER_DOWN_POS: TilePos = TilePos::new(20, 6);
pub const OVERWORLD_ENTRY: TilePos = TilePos::new(20, 7);

pub const LADDER_UP_POS: TilePos = TilePos::new(2, 1);
pub const DUNGEON_ENTRY: TilePos = TilePos::new(2, 2);
pub const GATE_POS: TilePos = TilePos::new(12, 4);
pub const BRAZIER_WEST_POS: TilePos = TilePos::new(16, 2);
pub const BRAZIER_EAST_POS: TilePos = TilePos::new(26, 2);
pub const RUBBLE_POS: TilePos = TilePos::new(8, 7);
pub const BOSS_SPAWN: TilePos = TilePos::new(21, 9);

pub const BRAZIER_WEST_TOKEN: &str = "brazier:west";
pub const BRAZIER_EAST_TOKEN: &str = "brazier:east";

const OVERWORLD_REGIONS: [ResourceRegion; 4] = [
    ResourceRegion {
        name: "north_woods",
        rect: TileRect::new(15, 2, 24, 11),
        weight: 3,
        kinds: &[(ResourceKind::Tree, 3), (ResourceKind::OakTree, 1)],
    },
    ResourceRegion {
        name: "south_woods",
        rect: TileRect::new(2, 16, 14, 27),
        weight: 3,
        kinds: &[(ResourceKind::Tree, 2), (ResourceKind::OakTree, 2)],
    },
    ResourceRegion {
        name: "quarry",
        rect: TileRect::new(15, 16, 24, 27),
        weight: 2,
        kinds: &[(ResourceKind::CopperRock, 1), (ResourceKind::TinRock, 1)],
    },
    ResourceRegion {
        name: "east_hills",
        rect: TileRect::new(29, 2, 37, 27),
        weight: 2,
        kinds: &[
            (ResourceKind::IronVein, 2),
            (ResourceKind::CopperRock, 1),
            (ResourceKind::TinRock, 1),
            (ResourceKind::Tree, 1),
        ],
    },
];

const OVERWORLD_TARGETS: [ResourceTarget; 5] = [
    ResourceTarget {
        kind: ResourceKind::Tree,
        count: 10,
        min_spacing: 2,
    },
    ResourceTarget {
        kind: ResourceKind::OakTree,
        count: 5,
        min_spacing: 2,
    },
    ResourceTarget {
        kind: ResourceKind::CopperRock,
        count: 4,
        min_spacing: 2,
    },
    ResourceTarget {
        kind: ResourceKind::TinRock,
        count: 4,
        min_spacing: 2,
    },
    ResourceTarget {
        kind: ResourceKind::IronVein,
        count: 3,
        min_spacing: 3,
    },
];

const OVERWORLD_MOBS: [MobSpawn; 2] = [
    MobSpawn {
        mob: "rat",
        count: 4,
        region: TileRect::new(15, 2, 24, 11),
    },
    MobSpawn {
        mob: "goblin",
        count: 3,
        region: TileRect::new(29, 2, 37, 27),
    },
];

const DUNGEON_REGIONS: [ResourceRegion; 1] = [ResourceRegion {
    name: "entry_seams",
    rect: TileRect::new(4, 1, 10, 8),
    weight: 1,
    kinds: &[(ResourceKind::IronVein, 1)],
}];

const DUNGEON_TARGETS: [ResourceTarget; 1] = [ResourceTarget {
    kind: ResourceKind::IronVein,
    count: 2,
    min_spacing: 2,
}];

const DUNGEON_MOBS: [MobSpawn; 2] = [
    MobSpawn {
        mob: "cave_rat",
        count: 2,
        region: TileRect::new(4, 4, 9, 8),
    },
    MobSpawn {
        mob: "skeleton",
        count: 3,
        region: TileRect::new(15, 12, 28, 18),
    },
];

fn overworld() -> Result<ZoneBlueprint, TilemapError> {
    let mut grid = TileGrid::filled(OVERWORLD_WIDTH, OVERWORLD_HEIGHT, Terrain::Open)?;
    outline(&mut grid, TileRect::new(0, 0, 39, 29), Terrain::Cliff);
    fill(&mut grid, TileRect::new(26, 1, 27, 28), Terrain::Water);
    fill(&mut grid, TileRect::new(16, 20, 18, 22), Terrain::Water);
    fill(&mut grid, TileRect::new(33, 20, 33, 24), Terrain::Cliff);
    fill(&mut grid, TileRect::new(1, 14, 38, 14), Terrain::Path);
    fill(&mut grid, TileRect::new(8, 12, 8, 13), Terrain::Path);

    let houses = vec![TileRect::new(3, 3, 7, 6), TileRect::new(10, 3, 13, 6)];
    for house in &houses {
        outline(&mut grid, *house, Terrain::Wall);
        fill(
            &mut grid,
            TileRect::new(house.min.x + 1, house.min.y + 1, house.max.x - 1, house.max.y - 1),
            Terrain::Floor,
        );
    }
    grid.set_terrain(TilePos::new(5, 6), Terrain::Floor);
    grid.set_terrain(TilePos::new(11, 6), Terrain::Floor);

    let fixtures = vec![
        fixture("bank", InteractableKind::Bank, BANK_POS),
        fixture("general_store", InteractableKind::Vendor, VENDOR_POS),
        fixture("furnace", InteractableKind::Furnace, FURNACE_POS),
        fixture("anvil", InteractableKind::Anvil, ANVIL_POS),
        fixture(
            "quartermaster",
            InteractableKind::QuestNpc {
                npc: "quartermaster".to_string(),
            },
            QUARTERMASTER_POS,
        ),
        fixture(
            "blacksmith",
            InteractableKind::QuestNpc {
                npc: "blacksmith".to_string(),
            },
            BLACKSMITH_POS,
        ),
        fixture(
            "well",
            InteractableKind::Decor {
                label: "An old stone well.".to_string(),
            },
            WELL_POS,
        ),
        fixture(
            "ladder_down",
            InteractableKind::Ladder(LadderDirection::Down),
            LADDER_DOWN_POS,
        ),
    ];

    Ok(ZoneBlueprint {
        key: ZoneKey::Overworld,
        grid,
        ground: Terrain::Open,
        safe_zone: Some(TOWN),
        buildings: houses,
        fixtures,
        entry_point: OVERWORLD_ENTRY,
        roaming: true,
        resource_regions: &OVERWORLD_REGIONS,
        resource_targets: &OVERWORLD_TARGETS,
        mob_spawns: &OVERWORLD_MOBS,
    })
}

fn dungeon() -> Result<ZoneBlueprint, TilemapError> {
    let mut grid = TileGrid::filled(DUNGEON_WIDTH, DUNGEON_HEIGHT, Terrain::Wall)?;
    fill(&mut grid, TileRect::new(1, 1, 10, 8), Terrain::Floor);
    fill(&mut grid, TileRect::new(11, 4, 13, 4), Terrain::Floor);
    fill(&mut grid, TileRect::new(14, 1, 28, 18), Terrain::Floor);
    fill(&mut grid, TileRect::new(19, 14, 22, 15), Terrain::Lava);

    let fixtures = vec![
        fixture(
            "ladder_up",
            InteractableKind::Ladder(LadderDirection::Up),
            LADDER_UP_POS,
        ),
        fixture("sealed_gate", InteractableKind::SealedGate, GATE_POS),
        fixture(
            "brazier_west",
            InteractableKind::Brazier {
                token: BRAZIER_WEST_TOKEN.to_string(),
            },
            BRAZIER_WEST_POS,
        ),
        fixture(
            "brazier_east",
            InteractableKind::Brazier {
                token: BRAZIER_EAST_TOKEN.to_string(),
            },
            BRAZIER_EAST_POS,
        ),
        fixture(
            "rubble",
            InteractableKind::Decor {
                label: "Fallen masonry blocks the wall.".to_string(),
            },
            RUBBLE_POS,
        ),
    ];

    Ok(ZoneBlueprint {
        key: ZoneKey::Dungeon,
        grid,
        ground: Terrain::Floor,
        safe_zone: None,
        buildings: Vec::new(),
        fixtures,
        entry_point: DUNGEON_ENTRY,
        roaming: false,
        resource_regions: &DUNGEON_REGIONS,
        resource_targets: &DUNGEON_TARGETS,
        mob_spawns: &DUNGEON_MOBS,
    })
}

fn fixture(id: &'static str, kind: InteractableKind, pos: TilePos) -> FixtureSpec {
    FixtureSpec { id, kind, pos }
}

fn fill(grid: &mut TileGrid, rect: TileRect, terrain: Terrain) {
    for pos in rect.tiles() {
        grid.set_terrain(pos, terrain);
    }
}

fn outline(grid: &mut TileGrid, rect: TileRect, terrain: Terrain) {
    for pos in rect.tiles() {
        if pos.x == rect.min.x || pos.x == rect.max.x || pos.y == rect.min.y || pos.y == rect.max.y
        {
            grid.set_terrain(pos, terrain);
        }
    }
}

#[cfg(test)]
mod tests {
    use engine::find_path;

    use super::*;

    #[test]
    fn fixtures_sit_on_walkable_tiles_with_a_free_neighbor() {
        for key in ZoneKey::ALL {
            let blueprint = ZoneBlueprint::for_zone(key).expect("blueprint");
            for fixture in &blueprint.fixtures {
                assert!(
                    blueprint.grid.is_walkable(fixture.pos),
                    "{} not on walkable terrain",
                    fixture.id
                );
                assert!(
                    fixture
                        .pos
                        .neighbors4()
                        .into_iter()
                        .any(|pos| blueprint.grid.is_walkable(pos)),
                    "{} is walled in",
                    fixture.id
                );
            }
            assert!(blueprint.grid.is_walkable(blueprint.entry_point));
        }
    }

    #[test]
    fn town_connects_to_the_ladder_and_the_gate_splits_the_dungeon() {
        let overworld = ZoneBlueprint::for_zone(ZoneKey::Overworld).expect("overworld");
        assert!(overworld.in_safe_zone(PLAYER_SPAWN));
        assert!(find_path(&overworld.grid, PLAYER_SPAWN, OVERWORLD_ENTRY).is_some());

        let dungeon = ZoneBlueprint::for_zone(ZoneKey::Dungeon).expect("dungeon");
        let mut sealed = dungeon.grid.clone();
        sealed.set_terrain(GATE_POS, Terrain::Wall);
        assert!(find_path(&sealed, DUNGEON_ENTRY, GATE_POS.offset(-1, 0)).is_some());
        assert!(find_path(&sealed, DUNGEON_ENTRY, BOSS_SPAWN).is_none());
        assert!(find_path(&sealed, GATE_POS.offset(1, 0), BOSS_SPAWN).is_some());
    }

    #[test]
    fn rect_helpers_are_inclusive() {
        let rect = TileRect::new(1, 1, 3, 2);
        assert_eq!(rect.width(), 3);
        assert_eq!(rect.height(), 2);
        assert_eq!(rect.tiles().count(), 6);
        assert!(rect.contains(TilePos::new(3, 2)));
        assert!(!rect.contains(TilePos::new(4, 2)));
    }
}
