use std::collections::BTreeMap;
use std::sync::Arc;

use core_sim::{ArchetypeTable, EntityId, GridPos, Layer, Owner, SimulationConfig, World};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Place { item: usize, x: i32, y: i32, layer: usize },
    Store { item: usize, container: usize },
    Attach { part: usize, whole: usize },
    Remove { item: usize },
    Destroy { item: usize },
}

const POOL: [&str; 8] = [
    "crate", "crate", "box", "apple", "apple", "notebook", "table", "thermometer",
];

fn op() -> impl Strategy<Value = Op> {
    let index = 0..POOL.len();
    prop_oneof![
        4 => (index.clone(), 0..6i32, 0..6i32, 0..Layer::ALL.len())
            .prop_map(|(item, x, y, layer)| Op::Place { item, x, y, layer }),
        4 => (index.clone(), index.clone()).prop_map(|(item, container)| Op::Store { item, container }),
        2 => (index.clone(), index.clone()).prop_map(|(part, whole)| Op::Attach { part, whole }),
        1 => index.clone().prop_map(|item| Op::Remove { item }),
        1 => index.prop_map(|item| Op::Destroy { item }),
    ]
}

fn small_world() -> World {
    let mut config = (*SimulationConfig::builtin()).clone();
    config.grid_size_x = 6;
    config.grid_size_y = 6;
    World::new(Arc::new(config), ArchetypeTable::builtin())
}

fn apply(world: &mut World, pool: &[EntityId], op: &Op) {
    match *op {
        Op::Place { item, x, y, layer } => {
            world.add_entity(GridPos::new(x, y), Layer::ALL[layer], pool[item]);
        }
        Op::Store { item, container } => {
            let _ = world.add_to_container(pool[item], pool[container]);
        }
        Op::Attach { part, whole } => {
            let _ = world.add_part(pool[part], pool[whole]);
        }
        Op::Remove { item } => {
            world.remove_entity(pool[item]);
        }
        Op::Destroy { item } => {
            world.destroy_entity(pool[item]);
        }
    }
}

/// Where each id is referenced from: tiles, container contents, and parts lists.
fn references(world: &World) -> BTreeMap<EntityId, Vec<Owner>> {
    let mut seen: BTreeMap<EntityId, Vec<Owner>> = BTreeMap::new();
    for pos in world.grid().positions() {
        if let Some(tile) = world.grid().tile(pos) {
            for (layer, id) in tile.bottom_up() {
                seen.entry(id).or_default().push(Owner::Tile { pos, layer });
            }
        }
    }
    for entity in world.entities() {
        for child in &entity.contents {
            seen.entry(*child).or_default().push(Owner::Container(entity.id));
        }
        for part in &entity.parts {
            seen.entry(*part).or_default().push(Owner::Whole(entity.id));
        }
    }
    seen
}

proptest! {
    #[test]
    fn every_entity_has_exactly_one_owner(ops in prop::collection::vec(op(), 1..60)) {
        let mut world = small_world();
        let mut pool = Vec::new();
        for name in POOL {
            pool.push(world.spawn(name).expect("builtin archetype"));
        }
        for op in &ops {
            apply(&mut world, &pool, op);

            let seen = references(&world);
            for id in seen.keys() {
                prop_assert!(world.entity(*id).is_some(), "dangling reference to {id} after {op:?}");
            }
            for entity in world.entities() {
                let holders = seen.get(&entity.id).cloned().unwrap_or_default();
                match entity.owner {
                    Owner::Nowhere => prop_assert!(holders.is_empty(), "{} is referenced while unowned", entity.id),
                    owner => prop_assert_eq!(holders, vec![owner]),
                }
                let mut cursor = entity.id;
                let mut depth = 0;
                while let Some(parent) = match world.entity(cursor).map(|e| e.owner) {
                    Some(Owner::Container(parent)) | Some(Owner::Whole(parent)) => Some(parent),
                    _ => None,
                } {
                    prop_assert_ne!(parent, entity.id, "ownership cycle through {}", entity.id);
                    cursor = parent;
                    depth += 1;
                    prop_assert!(depth <= POOL.len());
                }
            }
        }
    }
}

#[test]
fn placing_detaches_from_the_previous_container() {
    let mut world = small_world();
    let chest = world.spawn_at("crate", GridPos::new(1, 1)).expect("crate");
    let apple = world.spawn("apple").expect("apple");
    world.add_to_container(apple, chest).expect("store");
    assert_eq!(world.world_position(apple), GridPos::new(1, 1));

    assert!(world.add_entity(GridPos::new(4, 4), Layer::Object, apple));
    assert!(world.entity(chest).expect("crate").contents.is_empty());
    assert_eq!(
        world.entity(apple).expect("apple").owner,
        Owner::Tile {
            pos: GridPos::new(4, 4),
            layer: Layer::Object
        }
    );

    assert!(!world.add_entity(GridPos::new(9, 9), Layer::Object, apple));
    assert_eq!(world.world_position(apple), GridPos::new(4, 4));
}
