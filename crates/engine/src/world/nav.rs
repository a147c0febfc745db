use super::tilemap::{TileGrid, TilePos};

const FNV1A_OFFSET_BASIS_64: u64 = 0xcbf2_9ce4_8422_2325;
const FNV1A_PRIME_64: u64 = 0x0000_0100_0000_01b3;

/// Shortest 4-directional path from `start` to `goal`.
///
/// The returned tiles exclude `start` and end at `goal`, so an empty path means the two
/// endpoints coincide. `None` means an endpoint is blocked or the goal is unreachable.
pub fn find_path(grid: &TileGrid, start: TilePos, goal: TilePos) -> Option<Vec<TilePos>> {
    find_path_with(grid, start, goal, |_| false)
}

/// Like [`find_path`], but treats tiles for which `blocked` returns true as unwalkable.
/// The start tile is never checked against `blocked`.
pub fn find_path_with<F>(
    grid: &TileGrid,
    start: TilePos,
    goal: TilePos,
    blocked: F,
) -> Option<Vec<TilePos>>
where
    F: Fn(TilePos) -> bool,
{
    let start_index = grid.index_of(start)?;
    let goal_index = grid.index_of(goal)?;
    if !grid.is_walkable(start) || !grid.is_walkable(goal) || blocked(goal) {
        return None;
    }
    if start == goal {
        return Some(Vec::new());
    }

    let node_count = grid.width() as usize * grid.height() as usize;
    let mut closed = vec![false; node_count];
    let mut best_g = vec![u32::MAX; node_count];
    let mut parent = vec![None::<usize>; node_count];
    let mut open = Vec::new();
    let mut next_insertion = 0u64;

    let start_h = start.manhattan(goal);
    open.push(OpenNode {
        coord: start,
        h_cost: start_h,
        f_cost: start_h,
        insertion_order: next_insertion,
    });
    next_insertion = next_insertion.saturating_add(1);
    best_g[start_index] = 0;

    while !open.is_empty() {
        let best_index = pick_best_open_node_index(&open);
        let current = open.swap_remove(best_index);
        let Some(current_index) = grid.index_of(current.coord) else {
            continue;
        };
        if closed[current_index] {
            continue;
        }
        closed[current_index] = true;

        if current_index == goal_index {
            return reconstruct_tile_path(grid, &parent, start_index, goal_index);
        }

        let current_g = best_g[current_index];
        for neighbor in current.coord.neighbors4() {
            let Some(neighbor_index) = grid.index_of(neighbor) else {
                continue;
            };
            if closed[neighbor_index] || !grid.is_walkable(neighbor) || blocked(neighbor) {
                continue;
            }

            let tentative_g = current_g.saturating_add(1);
            if tentative_g >= best_g[neighbor_index] {
                continue;
            }

            best_g[neighbor_index] = tentative_g;
            parent[neighbor_index] = Some(current_index);
            let h_cost = neighbor.manhattan(goal);
            open.push(OpenNode {
                coord: neighbor,
                h_cost,
                f_cost: tentative_g.saturating_add(h_cost),
                insertion_order: next_insertion,
            });
            next_insertion = next_insertion.saturating_add(1);
        }
    }

    None
}

/// Path to the closest reachable walkable 4-neighbor of `target`.
///
/// Returns an empty path when `start` already borders `target`. The target tile itself may
/// be unwalkable (fixtures, resources, mobs standing on a tile).
pub fn find_path_to_adjacent<F>(
    grid: &TileGrid,
    start: TilePos,
    target: TilePos,
    blocked: F,
) -> Option<Vec<TilePos>>
where
    F: Fn(TilePos) -> bool,
{
    if start.manhattan(target) == 1 {
        return Some(Vec::new());
    }
    let mut best: Option<Vec<TilePos>> = None;
    for candidate in target.neighbors4() {
        if !grid.is_walkable(candidate) || (candidate != start && blocked(candidate)) {
            continue;
        }
        let Some(path) = find_path_with(grid, start, candidate, &blocked) else {
            continue;
        };
        let shorter = best
            .as_ref()
            .map(|current| path.len() < current.len())
            .unwrap_or(true);
        if shorter {
            best = Some(path);
        }
    }
    best
}

#[derive(Debug, Clone, Copy)]
struct OpenNode {
    coord: TilePos,
    h_cost: u32,
    f_cost: u32,
    insertion_order: u64,
}

fn pick_best_open_node_index(open: &[OpenNode]) -> usize {
    let mut best_index = 0usize;
    for index in 1..open.len() {
        if open_node_order_key(open[index]) < open_node_order_key(open[best_index]) {
            best_index = index;
        }
    }
    best_index
}

fn open_node_order_key(node: OpenNode) -> (u32, u32, i32, i32, u64) {
    (
        node.f_cost,
        node.h_cost,
        node.coord.y,
        node.coord.x,
        node.insertion_order,
    )
}

fn reconstruct_tile_path(
    grid: &TileGrid,
    parent: &[Option<usize>],
    start_index: usize,
    goal_index: usize,
) -> Option<Vec<TilePos>> {
    let mut cursor = goal_index;
    let mut indices = vec![cursor];

    while cursor != start_index {
        let next = parent.get(cursor).and_then(|value| *value)?;
        cursor = next;
        if cursor != start_index {
            indices.push(cursor);
        }
    }
    indices.reverse();
    Some(
        indices
            .into_iter()
            .map(|index| grid.pos_of_index(index))
            .collect(),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GridNavKey {
    width: u32,
    height: u32,
    tiles_hash: u64,
}

/// Walkability snapshot for the active zone's grid.
///
/// The registry bumps a generation whenever the active zone changes; the cache rebuilds when
/// either that generation or the grid fingerprint differs from what it last saw.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NavCache {
    key: Option<GridNavKey>,
    generation: Option<u64>,
    width: u32,
    height: u32,
    walkable: Vec<bool>,
    rebuild_count: u64,
}

impl NavCache {
    pub fn clear(&mut self) {
        self.key = None;
        self.generation = None;
        self.width = 0;
        self.height = 0;
        self.walkable.clear();
    }

    /// Returns true when the snapshot was rebuilt.
    pub fn refresh(&mut self, grid: &TileGrid, generation: u64) -> bool {
        let key = compute_grid_nav_key(grid);
        if self.key == Some(key) && self.generation == Some(generation) {
            return false;
        }

        self.walkable = grid.tiles().iter().map(|terrain| terrain.is_walkable()).collect();
        self.width = grid.width();
        self.height = grid.height();
        self.key = Some(key);
        self.generation = Some(generation);
        self.rebuild_count = self.rebuild_count.saturating_add(1);
        true
    }

    pub fn is_walkable(&self, pos: TilePos) -> bool {
        if pos.x < 0 || pos.y < 0 || pos.x as u32 >= self.width || pos.y as u32 >= self.height {
            return false;
        }
        let index = pos.y as usize * self.width as usize + pos.x as usize;
        self.walkable.get(index).copied().unwrap_or(false)
    }

    pub fn generation(&self) -> Option<u64> {
        self.generation
    }

    pub fn rebuild_count(&self) -> u64 {
        self.rebuild_count
    }
}

fn compute_grid_nav_key(grid: &TileGrid) -> GridNavKey {
    let mut tiles_hash = FNV1A_OFFSET_BASIS_64;
    for terrain in grid.tiles() {
        tiles_hash ^= terrain.code() as u64;
        tiles_hash = tiles_hash.wrapping_mul(FNV1A_PRIME_64);
    }
    GridNavKey {
        width: grid.width(),
        height: grid.height(),
        tiles_hash,
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::world::tilemap::Terrain;

    fn assert_valid_path(grid: &TileGrid, start: TilePos, goal: TilePos, path: &[TilePos]) {
        let mut previous = start;
        for step in path {
            assert_eq!(previous.manhattan(*step), 1, "non-adjacent step {previous:?} -> {step:?}");
            assert!(grid.is_walkable(*step), "stepped onto blocked tile {step:?}");
            previous = *step;
        }
        assert_eq!(previous, goal);
        assert!(path.len() as u32 >= start.manhattan(goal));
    }

    #[test]
    fn astar_path_never_steps_onto_blocked_tiles() {
        let grid = TileGrid::from_rows(&[
            "...#...",
            "...#...",
            "...~...",
            "...^...",
            ".......",
        ])
        .expect("grid");
        let start = TilePos::new(1, 2);
        let goal = TilePos::new(5, 2);
        let path = find_path(&grid, start, goal).expect("reachable");
        assert_valid_path(&grid, start, goal, &path);
        assert_eq!(path.len(), 8);
    }

    #[test]
    fn start_equal_goal_yields_empty_path() {
        let grid = TileGrid::from_rows(&["..", ".."]).expect("grid");
        assert_eq!(
            find_path(&grid, TilePos::new(1, 1), TilePos::new(1, 1)),
            Some(Vec::new())
        );
    }

    #[test]
    fn blocked_endpoints_and_walled_goals_return_none() {
        let grid = TileGrid::from_rows(&["._#_", "._#_", "._#_"]).expect("grid");
        assert_eq!(find_path(&grid, TilePos::new(2, 0), TilePos::new(0, 0)), None);
        assert_eq!(find_path(&grid, TilePos::new(0, 0), TilePos::new(2, 1)), None);
        assert_eq!(find_path(&grid, TilePos::new(0, 0), TilePos::new(3, 1)), None);
        assert_eq!(find_path(&grid, TilePos::new(0, 0), TilePos::new(9, 9)), None);
    }

    #[test]
    fn path_terrain_is_walkable_but_water_and_lava_are_not() {
        let grid = TileGrid::from_rows(&["=!=", "=~="]).expect("grid");
        assert_eq!(find_path(&grid, TilePos::new(0, 0), TilePos::new(2, 0)), None);
    }

    #[test]
    fn astar_tie_break_is_deterministic_on_symmetric_map() {
        let grid = TileGrid::from_rows(&[".....", ".....", "..#..", ".....", "....."])
            .expect("grid");
        let first = find_path(&grid, TilePos::new(0, 2), TilePos::new(4, 2)).expect("first");
        let second = find_path(&grid, TilePos::new(0, 2), TilePos::new(4, 2)).expect("second");
        assert_eq!(first, second);
        assert_eq!(first.len(), 6);
    }

    #[test]
    fn adjacent_search_picks_closest_open_side() {
        let grid = TileGrid::from_rows(&[".....", ".###.", ".#.#.", "....."]).expect("grid");
        let path = find_path_to_adjacent(&grid, TilePos::new(0, 0), TilePos::new(2, 1), |_| false)
            .expect("path");
        assert_eq!(path.last().copied(), Some(TilePos::new(2, 0)));
        let already = find_path_to_adjacent(&grid, TilePos::new(2, 0), TilePos::new(2, 1), |_| false)
            .expect("adjacent");
        assert!(already.is_empty());
    }

    #[test]
    fn nav_cache_rebuilds_on_generation_bump_only() {
        let grid = TileGrid::from_rows(&["._", "#="]).expect("grid");
        let mut cache = NavCache::default();
        assert!(cache.refresh(&grid, 0));
        assert!(!cache.refresh(&grid, 0));
        assert!(cache.refresh(&grid, 1));
        assert_eq!(cache.rebuild_count(), 2);
        assert!(cache.is_walkable(TilePos::new(1, 0)));
        assert!(!cache.is_walkable(TilePos::new(0, 1)));
        assert!(!cache.is_walkable(TilePos::new(5, 5)));
    }

    fn grid_strategy() -> impl Strategy<Value = TileGrid> {
        (2u32..9, 2u32..9).prop_flat_map(|(width, height)| {
            proptest::collection::vec(
                prop_oneof![
                    4 => Just(Terrain::Open),
                    1 => Just(Terrain::Floor),
                    1 => Just(Terrain::Path),
                    1 => Just(Terrain::Wall),
                    1 => Just(Terrain::Water),
                ],
                (width * height) as usize,
            )
            .prop_map(move |tiles| TileGrid::new(width, height, tiles).expect("grid"))
        })
    }

    fn reachable(grid: &TileGrid, start: TilePos, goal: TilePos) -> bool {
        if !grid.is_walkable(start) || !grid.is_walkable(goal) {
            return false;
        }
        let mut seen = vec![false; grid.tiles().len()];
        let mut stack = vec![start];
        while let Some(pos) = stack.pop() {
            let Some(index) = grid.index_of(pos) else {
                continue;
            };
            if seen[index] || !grid.is_walkable(pos) {
                continue;
            }
            seen[index] = true;
            if pos == goal {
                return true;
            }
            stack.extend(pos.neighbors4());
        }
        false
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_paths_are_valid_or_absent(
            grid in grid_strategy(),
            sx in 0i32..9, sy in 0i32..9, gx in 0i32..9, gy in 0i32..9,
        ) {
            let start = grid.clamp_pos(TilePos::new(sx, sy));
            let goal = grid.clamp_pos(TilePos::new(gx, gy));
            match find_path(&grid, start, goal) {
                Some(path) => assert_valid_path(&grid, start, goal, &path),
                None => prop_assert!(!reachable(&grid, start, goal)),
            }
        }
    }
}
