use std::path::PathBuf;
use std::sync::Once;

use core_sim::{ArchetypeTable, Scenario, SimulationConfig, World};

static INIT: Once = Once::new();

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn ensure_test_config() {
    INIT.call_once(|| {
        let config_path = fixture("test_simulation_config.json");

        debug_assert!(
            config_path.exists(),
            "missing test simulation config at {}",
            config_path.display()
        );

        std::env::set_var(core_sim::CONFIG_PATH_ENV, &config_path);
    });
}

/// The lab scenario built against the fixture config.
pub fn lab_world() -> World {
    ensure_test_config();
    let config = SimulationConfig::load().expect("fixture config loads");
    let scenario = Scenario::from_file(&fixture("lab_scenario.json")).expect("scenario parses");
    let mut world = scenario
        .build(config, ArchetypeTable::builtin())
        .expect("scenario builds");
    world.record_initial_snapshot().expect("tick 0");
    world
}
