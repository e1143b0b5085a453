mod common;

use core_sim::{EntityId, Hypothesis, World};
use serde_json::json;
use sim_runtime::{parse_command_line, ActionResult, CommandEnvelope, Importance};

fn named(world: &World, name: &str) -> u64 {
    world
        .entities()
        .find(|entity| entity.name == name)
        .map(|entity| entity.id.0)
        .unwrap_or_else(|| panic!("no entity named {name}"))
}

fn send(world: &mut World, command: serde_json::Value) -> ActionResult {
    let envelope = CommandEnvelope::from_json(&command.to_string()).expect("wire command decodes");
    let result = world.submit(&envelope).expect("submit");
    world.tick().expect("tick");
    result
}

#[test]
fn box_scenario_over_the_wire() {
    let mut world = common::lab_world();
    let apple = named(&world, "apple");
    let chest = named(&world, "box");

    assert!(send(&mut world, json!({ "action": "ROTATE_DIRECTION", "arg1": "north" })).success);
    let pickup = send(&mut world, json!({ "action": "PICKUP", "arg1": apple }));
    assert!(pickup.success, "{pickup:?}");
    assert!(send(&mut world, json!({ "action": "ROTATE_DIRECTION", "arg1": "south" })).success);

    let closed = send(&mut world, json!({ "action": "PUT", "arg1": apple, "arg2": chest }));
    assert!(!closed.success);
    assert!(closed.message.contains("not open"));

    assert!(send(&mut world, json!({ "action": "OPEN", "arg1": chest })).success);
    let stored = send(&mut world, json!({ "action": "PUT", "arg1": apple, "arg2": chest }));
    assert!(stored.success, "{stored:?}");

    let snapshot = world.history().latest().expect("history").expect("snapshot");
    let tile = snapshot.tile(5, 6).expect("tile");
    let chest_state = tile.iter().find(|entity| entity.id == chest).expect("box on tile");
    assert!(chest_state.contents.iter().any(|entity| entity.id == apple));
    assert!(chest_state.flags.iter().any(|flag| flag == "isOpenContainer"));
}

#[test]
fn text_commands_share_the_interpreter() {
    let mut world = common::lab_world();
    let scientist = EntityId(named(&world, "scientist"));
    let guard = named(&world, "guard");

    let mut run = |line: &str| {
        let payload = parse_command_line(line).expect("command parses");
        let result = world
            .submit(&CommandEnvelope::new(None, payload))
            .expect("submit");
        world.tick().expect("tick");
        result
    };

    assert!(run("turn east").success);
    assert!(run("forward").success);
    assert!(run("face south").success);
    let greeting = run(&format!("talk {guard}"));
    assert!(greeting.success, "{greeting:?}");
    assert_eq!(greeting.importance, Importance::High);

    let blocked = run("forward");
    assert!(!blocked.success);
    assert!(run("say 1").message.ends_with("(The conversation is over.)"));
    assert!(run("teleport lab").success);

    assert_eq!(world.world_position(scientist), core_sim::GridPos::new(28, 3));
    let history: Vec<String> = world
        .entity(scientist)
        .and_then(|entity| entity.agent.as_ref())
        .map(|agent| agent.history.iter().map(|record| record.action_type.clone()).collect())
        .unwrap_or_default();
    assert_eq!(
        history,
        [
            "ROTATE_DIRECTION",
            "MOVE_FORWARD",
            "ROTATE_DIRECTION",
            "TALK",
            "MOVE_FORWARD",
            "CHOSEN_DIALOG_OPTION",
            "TELEPORT_TO_LOCATION"
        ]
    );
}

#[test]
fn dialog_choices_arrive_as_wire_objects() {
    let mut world = common::lab_world();
    let guard = named(&world, "guard");
    send(&mut world, json!({ "action": "ROTATE_DIRECTION", "arg1": "east" }));
    send(&mut world, json!({ "action": "MOVE_FORWARD" }));
    send(&mut world, json!({ "action": "ROTATE_DIRECTION", "arg1": "south" }));
    assert!(send(&mut world, json!({ "action": "TALK", "arg1": guard })).success);

    let reply = send(&mut world, json!({ "chosen_dialog_option_int": 0 }));
    assert!(reply.success, "{reply:?}");
    assert!(reply.message.starts_with("guard: \"Then take care with the red ones."));
    let out_of_range = send(&mut world, json!({ "chosen_dialog_option_int": 3 }));
    assert!(!out_of_range.success);
}

#[test]
fn ticks_over_the_wire_advance_autopilots() {
    let mut world = common::lab_world();
    let assistant = EntityId(named(&world, "assistant"));
    let start = world.world_position(assistant);
    let envelope = CommandEnvelope::from_json(r#"{"tick": 5}"#).expect("tick command");
    let result = world.submit(&envelope).expect("ticks");
    assert!(result.success);
    assert_eq!(world.current_tick(), 5);
    assert_ne!(world.world_position(assistant), start);
    assert_eq!(world.history().len(), 6);
}

#[test]
fn mushroom_hypothesis_scores_against_recorded_history() -> anyhow::Result<()> {
    let mut world = common::lab_world();
    world.tick()?;
    let hypothesis: Hypothesis = serde_json::from_value(json!({
        "name": "only the red cap is red",
        "measurements": [
            {
                "reference": { "selector": { "type": "mushroom" } },
                "property": { "name": "color", "operator": "EQUALS", "value": "red" }
            },
            {
                "reference": { "selector": { "kind": "mushroom" } },
                "property": { "name": "isPoisonous", "operator": "EQUALS", "value": false }
            }
        ]
    }))?;
    let score = world.evaluate_hypothesis(&hypothesis, 1)?;
    assert_eq!(score.measurements[0].score, 0.25);
    assert_eq!(score.measurements[1].score, 0.75);
    assert_eq!(score.score, 0.5);
    assert!(!score.supported);
    Ok(())
}
