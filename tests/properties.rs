//! Property tests for tile storage, generated bodies, layer rules and
//! broadphase interchangeability.

use std::collections::{BTreeMap, BTreeSet};

use glam::DVec2;
use proptest::prelude::*;
use tilebonk::grid::{Channel, Grid, PieceKey};
use tilebonk::*;

fn shape_strategy() -> impl Strategy<Value = TileShape> {
    (0u8..6).prop_map(|id| TileShape::from_id(id).unwrap_or_default())
}

fn placement_strategy() -> impl Strategy<Value = (i32, i32, TileShape, u64)> {
    (-20i32..20, -20i32..20, shape_strategy(), 0u64..4)
}

fn keyed_tile_strategy() -> impl Strategy<Value = Tile> {
    (shape_strategy(), 0u8..2, 0u32..2, prop::option::of((0u8..2, 0u32..2))).prop_map(
        |(shape, layer, group, sensor)| {
            let tile = Tile::new(shape).with_layer(LayerId(layer)).with_group(group);
            match sensor {
                Some((l, g)) => tile.with_sensor(LayerId(l), g),
                None => tile,
            }
        },
    )
}

#[derive(Clone, Debug)]
enum Edit {
    Set(i32, i32, Tile),
    Clear(i32, i32),
    Block(i32, i32, Vec<Vec<Tile>>),
    ClearRect(i32, i32, i32, i32),
}

fn edit_strategy() -> impl Strategy<Value = Edit> {
    let column = prop::collection::vec(keyed_tile_strategy(), 1..4);
    prop_oneof![
        4 => (-8i32..8, -8i32..8, keyed_tile_strategy()).prop_map(|(x, y, t)| Edit::Set(x, y, t)),
        2 => (-8i32..8, -8i32..8).prop_map(|(x, y)| Edit::Clear(x, y)),
        2 => (-8i32..8, -8i32..8, prop::collection::vec(column, 1..5))
            .prop_map(|(x, y, info)| Edit::Block(x, y, info)),
        1 => (-8i32..8, -8i32..8, -1i32..5, -1i32..5).prop_map(|(x, y, w, h)| Edit::ClearRect(x, y, w, h)),
    ]
}

/// Key a tile should be covered by on `channel`, if any.
fn expected_key(grid: &Grid, channel: Channel, x: i32, y: i32) -> Option<PieceKey> {
    let tile = grid.get_tile(x, y);
    match channel {
        Channel::Solid => {
            let buried = tile.shape == TileShape::Block
                && [(x - 1, y), (x + 1, y), (x, y - 1), (x, y + 1)].iter().all(|&(nx, ny)| {
                    let n = grid.get_tile(nx, ny);
                    n.shape == TileShape::Block && n.layer == tile.layer && n.group == tile.group
                });
            (!tile.shape.is_empty() && !buried).then_some(PieceKey {
                shape: tile.shape,
                layer: tile.layer,
                group: tile.group,
            })
        }
        Channel::Sensor => tile.sensor.map(|s| PieceKey {
            shape: TileShape::Block,
            layer: s.layer,
            group: s.group,
        }),
    }
}

fn rule_strategy() -> impl Strategy<Value = LayerRule> {
    prop_oneof![
        Just(LayerRule::Never),
        Just(LayerRule::UnequalGroup),
        Just(LayerRule::EqualGroup),
        Just(LayerRule::Always),
    ]
}

fn grid_world() -> (World, BodyId) {
    let mut world = create_world(false);
    let e = world
        .create_grid(EntityDesc::new(), GridDesc::new(1.0))
        .unwrap();
    let grid = world.entity(e).unwrap().bodies()[0];
    (world, grid)
}

/// Final positions and the full event log of a small falling scene.
fn run_scene(use_tree: bool, drops: &[(i32, i32, i32)], steps: usize) -> (Vec<DVec2>, Vec<Event>) {
    let mut world = create_world(use_tree);
    let tiles = TileArgs::List(
        (-10..10)
            .map(|x| TilePlacement {
                x,
                y: 0,
                tile: Tile::block(),
            })
            .collect(),
    );
    world
        .create_grid(EntityDesc::new(), GridDesc::new(1.0).tiles(tiles))
        .unwrap();
    let mut ids = Vec::new();
    for &(x, y, vx) in drops {
        let id = world
            .create_rect(
                EntityDesc::new()
                    .at(x as f64 * 0.5, 2.0 + y as f64 * 0.5)
                    .velocity(vx as f64 * 0.25, -3.0)
                    .level(1),
                RectDesc::new(0.8, 0.8),
            )
            .unwrap();
        ids.push(id);
    }
    let mut events = Vec::new();
    for _ in 0..steps {
        world.simulate(1.0 / 30.0);
        events.extend(world.drain_events());
    }
    let positions = ids
        .iter()
        .map(|&id| world.global_position(id).unwrap())
        .collect();
    (positions, events)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn tiles_read_back_last_write(writes in prop::collection::vec(placement_strategy(), 1..60)) {
        let (mut world, grid) = grid_world();
        let mut expected = BTreeMap::new();
        for &(x, y, shape, data) in &writes {
            let tile = Tile::new(shape).with_data(data);
            world.set_tile(grid, x, y, tile).unwrap();
            expected.insert((x, y), tile);
        }
        for (&(x, y), tile) in &expected {
            prop_assert_eq!(world.get_tile(grid, x, y).unwrap(), *tile);
        }
    }

    #[test]
    fn solid_tiles_covered_by_generated_bodies(
        writes in prop::collection::vec(placement_strategy(), 1..60),
        clears in prop::collection::vec((-20i32..20, -20i32..20), 0..20),
    ) {
        let (mut world, grid) = grid_world();
        for &(x, y, shape, _) in &writes {
            world.set_tile_shape(grid, x, y, shape).unwrap();
        }
        for &(x, y) in &clears {
            world.clear_tile(grid, x, y).unwrap();
        }
        for x in -20..20 {
            for y in -20..20 {
                let tile = world.get_tile(grid, x, y).unwrap();
                let buried = tile.shape == TileShape::Block
                    && [(x - 1, y), (x + 1, y), (x, y - 1), (x, y + 1)]
                        .iter()
                        .all(|&(nx, ny)| world.get_tile(grid, nx, ny).unwrap().shape == TileShape::Block);
                let body = world.tile_body(grid, x, y).unwrap();
                prop_assert_eq!(body.is_some(), !tile.shape.is_empty() && !buried);
                if let Some(body) = body {
                    let b = world.body(body).unwrap();
                    prop_assert_eq!(b.generated_by(), Some(grid));
                    let shape = b.shape().unwrap();
                    let bb = shape.aabb_at(world.body_global_position(body).unwrap());
                    // the piece spans the tile along its merge axis
                    let centre = DVec2::new(x as f64 + 0.5, y as f64 + 0.5);
                    prop_assert!(
                        bb.min.x <= centre.x + 0.5 && bb.max.x >= centre.x - 0.5
                            && bb.min.y <= centre.y + 0.5 && bb.max.y >= centre.y - 0.5
                    );
                }
            }
        }
    }

    #[test]
    fn pieces_partition_tiles_on_both_channels(edits in prop::collection::vec(edit_strategy(), 1..40)) {
        let mut grid = Grid::new(1.0, TileRect::new(0, 0, 4, 4)).unwrap();
        for edit in &edits {
            match edit {
                Edit::Set(x, y, t) => grid.set_tile(*x, *y, *t).unwrap(),
                Edit::Clear(x, y) => grid.clear_tile(*x, *y),
                Edit::Block(x, y, info) => grid
                    .set_tiles(&TileArgs::Block { x: *x, y: *y, info: info.clone() })
                    .unwrap(),
                Edit::ClearRect(x, y, w, h) => {
                    grid.clear_tiles(&TileRegion::Rect { x: *x, y: *y, w: *w, h: *h })
                }
            }
        }
        for channel in [Channel::Solid, Channel::Sensor] {
            let mut covered = BTreeSet::new();
            for (id, piece) in grid.pieces().filter(|(_, p)| p.channel == channel) {
                for (x, y) in piece.rect.tiles() {
                    prop_assert!(covered.insert((x, y)), "({}, {}) covered twice", x, y);
                    prop_assert_eq!(grid.piece_at(channel, x, y), Some(id));
                    prop_assert_eq!(expected_key(&grid, channel, x, y), Some(piece.key));
                }
            }
            for (x, y) in TileRect::new(-10, -10, 24, 24).tiles() {
                let eligible = expected_key(&grid, channel, x, y).is_some();
                prop_assert_eq!(eligible, covered.contains(&(x, y)), "({}, {})", x, y);
            }
        }
    }

    #[test]
    fn layer_rules_are_symmetric(
        sets in prop::collection::vec((0usize..6, 0usize..6, rule_strategy()), 1..30),
    ) {
        let names = ["a", "b", "c", "d", "e", "f"];
        let mut world = create_world(false);
        let mut expected = BTreeMap::new();
        for &(i, j, rule) in &sets {
            world.set_layer_rule(names[i], names[j], rule).unwrap();
            expected.insert((i.min(j), i.max(j)), rule);
        }
        for (&(i, j), &rule) in &expected {
            prop_assert_eq!(world.get_layer_rule(names[i], names[j]), rule);
        }
        for a in names {
            for b in names {
                prop_assert_eq!(world.get_layer_rule(a, b), world.get_layer_rule(b, a));
            }
            prop_assert_eq!(world.get_layer_rule("default", a), LayerRule::Always);
        }
    }

    #[test]
    fn time_is_sum_of_deltas(deltas in prop::collection::vec(1u32..1000, 1..50)) {
        let mut world = create_world(true);
        let mut sum = 0.0;
        for d in deltas {
            let d = d as f64 / 1000.0;
            world.simulate(d);
            sum += d;
        }
        prop_assert!((world.time() - sum).abs() < 1e-9);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn broadphase_choice_does_not_change_results(
        drops in prop::collection::vec((-12i32..12, 0i32..12, -4i32..4), 1..12),
    ) {
        let simple = run_scene(false, &drops, 40);
        let tree = run_scene(true, &drops, 40);
        prop_assert_eq!(simple.0, tree.0);
        prop_assert_eq!(simple.1, tree.1);
    }
}
