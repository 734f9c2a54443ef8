//! A* searches over map tiles.
//!
//! `find_path` looks for an off-road walk between two positions, used to
//! check that a free-walking serf or an attacking knight is not sent on a
//! long detour around water. `find_road` plans a new road the way a
//! player would lay it: only over valid road segments, never through
//! another flag.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::map::{Direction, Map, MapPos, Space};

/// Walk cost by height difference.
const WALK_COST: [u32; 5] = [255, 319, 383, 447, 511];

/// Node budget for reachability checks.
const DEFAULT_MAX_NODES: usize = 4096;

fn walk_cost(map: &Map, from: MapPos, to: MapPos) -> u32 {
    let h_diff = (map.height(from) - map.height(to)).unsigned_abs() as usize;
    WALK_COST[h_diff.min(WALK_COST.len() - 1)]
}

/// Admissible estimate: straight step distance at the cheapest slope the
/// height difference allows.
fn heuristic(map: &Map, from: MapPos, to: MapPos) -> u32 {
    let dist = map.step_distance(from, to);
    if dist == 0 {
        return 0;
    }
    let h_diff = (map.height(from) - map.height(to)).unsigned_abs();
    dist * WALK_COST[((h_diff / dist) as usize).min(WALK_COST.len() - 1)]
}

/// Tiles a serf can cross on foot.
fn is_walkable(map: &Map, pos: MapPos) -> bool {
    if map.is_in_water(pos) {
        return false;
    }
    map.space(pos) <= Space::Semipassable || map.has_flag(pos)
}

struct Search<'a, F> {
    map: &'a Map,
    goal: MapPos,
    max_nodes: usize,
    max_steps: Option<u32>,
    can_step: F,
}

impl<'a, F> Search<'a, F>
where
    F: Fn(MapPos, Direction, MapPos) -> bool,
{
    fn run(&self, start: MapPos) -> Option<Vec<Direction>> {
        if start == self.goal {
            return Some(Vec::new());
        }
        // pos -> (cost, steps, parent step)
        let mut best: HashMap<MapPos, (u32, u32, Option<(MapPos, Direction)>)> = HashMap::new();
        let mut open = BinaryHeap::new();
        best.insert(start, (0, 0, None));
        open.push(Reverse((heuristic(self.map, start, self.goal), 0u32, start)));

        let mut expanded = 0;
        while let Some(Reverse((_, cost, pos))) = open.pop() {
            if pos == self.goal {
                return Some(Self::unwind(&best, pos));
            }
            let Some(&(known, steps, _)) = best.get(&pos) else {
                continue;
            };
            if cost > known {
                continue;
            }
            expanded += 1;
            if expanded > self.max_nodes {
                return None;
            }

            for dir in Direction::ALL {
                let next = self.map.move_pos(pos, dir);
                if !(self.can_step)(pos, dir, next) {
                    continue;
                }
                let next_steps = steps + 1;
                if let Some(limit) = self.max_steps {
                    if next_steps + self.map.step_distance(next, self.goal) > limit {
                        continue;
                    }
                }
                let next_cost = cost + walk_cost(self.map, pos, next);
                let better = best.get(&next).map_or(true, |&(c, _, _)| next_cost < c);
                if better {
                    best.insert(next, (next_cost, next_steps, Some((pos, dir))));
                    let f = next_cost + heuristic(self.map, next, self.goal);
                    open.push(Reverse((f, next_cost, next)));
                }
            }
        }
        None
    }

    fn unwind(
        best: &HashMap<MapPos, (u32, u32, Option<(MapPos, Direction)>)>,
        mut pos: MapPos,
    ) -> Vec<Direction> {
        let mut dirs = Vec::new();
        while let Some(&(_, _, Some((parent, dir)))) = best.get(&pos) {
            dirs.push(dir);
            pos = parent;
        }
        dirs.reverse();
        dirs
    }
}

/// Cheapest walk from `from` to `to` over land, expanding at most
/// `max_nodes` tiles. The destination itself may be blocked (a building
/// or a flag the walker is heading for).
pub fn find_path(map: &Map, from: MapPos, to: MapPos, max_nodes: usize) -> Option<Vec<Direction>> {
    Search {
        map,
        goal: to,
        max_nodes,
        max_steps: None,
        can_step: |_, _, next| next == to || is_walkable(map, next),
    }
    .run(from)
}

/// Whether `to` can be walked to from `from` in no more than
/// `max_ratio` times the straight step distance.
pub fn is_reachable_within_ratio(map: &Map, from: MapPos, to: MapPos, max_ratio: f64) -> bool {
    let straight = map.step_distance(from, to);
    if straight == 0 {
        return true;
    }
    let limit = (f64::from(straight) * max_ratio).floor() as u32;
    let path = Search {
        map,
        goal: to,
        max_nodes: DEFAULT_MAX_NODES,
        max_steps: Some(limit),
        can_step: |_, _, next| next == to || is_walkable(map, next),
    }
    .run(from);
    match path {
        Some(path) => {
            let ratio = path.len() as f64 / f64::from(straight);
            if ratio > max_ratio {
                log::debug!("detour from {} to {} too long: ratio {:.2}", from, to, ratio);
                false
            } else {
                true
            }
        }
        None => false,
    }
}

/// Plan a road from flag `start` to `end` over valid road segments.
/// Other flags are not crossed; `end` may be a flag.
pub fn find_road(map: &Map, start: MapPos, end: MapPos) -> Option<Vec<Direction>> {
    Search {
        map,
        goal: end,
        max_nodes: map.tile_count() as usize,
        max_steps: None,
        can_step: |pos, dir, next| {
            map.is_road_segment_valid(pos, dir) && (next == end || !map.has_flag(next))
        },
    }
    .run(start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{MapObject, Terrain};

    fn owned_map() -> Map {
        let mut map = Map::new(3);
        for pos in map.positions().collect::<Vec<_>>() {
            map.set_owner(pos, Some(0));
        }
        map
    }

    fn walk(map: &Map, from: MapPos, path: &[Direction]) -> MapPos {
        path.iter().fold(from, |pos, &d| map.move_pos(pos, d))
    }

    #[test]
    fn test_straight_path() {
        let map = owned_map();
        let a = map.pos(10, 10);
        let b = map.pos(15, 10);
        let path = find_path(&map, a, b, 1000).expect("open ground");
        assert_eq!(path.len(), 5);
        assert_eq!(walk(&map, a, &path), b);
    }

    #[test]
    fn test_path_around_obstacle() {
        let mut map = owned_map();
        let a = map.pos(10, 10);
        let b = map.pos(14, 10);
        for row in 6..15 {
            map.set_object(map.pos(12, row), MapObject::Stone(7), None);
        }
        let path = find_path(&map, a, b, 5000).expect("way around");
        assert!(path.len() > 4);
        assert_eq!(walk(&map, a, &path), b);
    }

    #[test]
    fn test_detour_ratio_rejects_long_walk_around_lake() {
        let mut map = owned_map();
        let center = map.pos(20, 20);
        map.add_lake(center, 6, 0);
        let west = map.pos(12, 20);
        let east = map.pos(28, 20);
        assert!(is_reachable_within_ratio(&map, west, east, 3.0));
        assert!(!is_reachable_within_ratio(&map, west, east, 1.0));
    }

    #[test]
    fn test_unreachable_island() {
        let mut map = owned_map();
        for pos in map.positions().collect::<Vec<_>>() {
            map.set_terrain(pos, Terrain::Water1, Terrain::Water1);
        }
        let a = map.pos(5, 5);
        assert!(find_path(&map, a, map.pos(9, 5), 2000).is_none());
    }

    #[test]
    fn test_road_avoids_other_flags() {
        let mut map = owned_map();
        let a = map.pos(10, 10);
        let b = map.pos(14, 10);
        map.set_object(a, MapObject::Flag, Some(1));
        map.set_object(b, MapObject::Flag, Some(2));
        map.set_object(map.pos(12, 10), MapObject::Flag, Some(3));
        let road = find_road(&map, a, b).expect("road");
        let mut pos = a;
        for &d in &road {
            pos = map.move_pos(pos, d);
            assert!(pos == b || !map.has_flag(pos));
        }
        assert_eq!(pos, b);
    }
}
