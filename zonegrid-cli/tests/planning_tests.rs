#![allow(missing_docs)]
use std::fs;

use zonegrid_cli::config::{ConfigManager, Roster};
use zonegrid_cli::planning::{plan_roster, simulate, synthetic_members, zone_name};
use zonegrid_core::cluster::QuorumState;

#[tokio::test]
async fn roster_plan_spreads_load_over_zones() {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let path = temp_dir.path().join("roster.toml");
    fs::write(
        &path,
        r#"
[[members]]
id = "pnl-1"
zone = "eu-west-1a"
address = "10.0.1.1:5701"

[[members]]
id = "pnl-2"
zone = "eu-west-1b"
address = "10.0.2.1:5701"

[[members]]
id = "pnl-3"
zone = "eu-west-1c"
address = "10.0.3.1:5701"
"#,
    )
    .expect("write roster");

    let manager = ConfigManager::defaults().expect("defaults");
    let roster = Roster::load(&path).expect("roster");
    let summary = plan_roster(manager.settings(), &roster).await.expect("plan");

    assert_eq!(summary.quorum, QuorumState::Quorate);
    assert!(summary.degraded.is_empty());
    assert_eq!(summary.group_load.len(), 3);
    let total: usize = summary.group_load.values().map(|(slots, _)| slots).sum();
    assert_eq!(total, 271 * 2);
    assert!(summary.render().iter().any(|line| line == "degraded: none"));
}

#[tokio::test]
async fn killing_one_of_three_zones_does_not_degrade() {
    let manager = ConfigManager::defaults().expect("defaults");
    let summary = simulate(manager.settings(), 3, 2, Some("zone-c"))
        .await
        .expect("simulate");

    assert_eq!(summary.killed.len(), 2);
    let after = summary.after.expect("after placement");
    assert!(after.degraded.is_empty());
    assert!(after.moves > 0);
    assert!(!after.group_load.contains_key(&zonegrid_core::cluster::GroupKey::new("zone-c")));
}

#[tokio::test]
async fn killing_one_of_two_zones_degrades_everything() {
    let manager = ConfigManager::defaults().expect("defaults");
    let summary = simulate(manager.settings(), 2, 2, Some("zone-a"))
        .await
        .expect("simulate");
    let after = summary.after.expect("after placement");
    assert_eq!(after.degraded.len(), 271);
    assert!(after.render().iter().any(|line| line.contains("+261 more")));
}

#[tokio::test]
async fn unknown_kill_zone_is_an_error() {
    let manager = ConfigManager::defaults().expect("defaults");
    let err = simulate(manager.settings(), 2, 1, Some("zone-z"))
        .await
        .expect_err("zone-z does not exist");
    assert!(err.to_string().contains("zone-z"));
}

#[test]
fn synthetic_members_are_bounded() {
    assert!(synthetic_members(0, 2).is_err());
    assert!(synthetic_members(27, 2).is_err());
    let seeds = synthetic_members(3, 2).expect("members");
    assert_eq!(seeds.len(), 6);
    assert_eq!(seeds[5].zone, zone_name(2));
    assert_eq!(seeds[5].address, "10.0.3.2:5701");
}
