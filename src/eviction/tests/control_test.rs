use std::sync::Arc;

use eviction::in_use::OpenCountDetector;
use eviction::node::ROOT_ID;
use eviction::policy::size::SizePolicy;
use eviction::volume::memory::MemoryVolume;
use eviction::{ControlSurface, Eviction, EvictionError, MountTable, PolicyRegistry};

struct Fixture {
    control: ControlSurface,
    volumes: Vec<Arc<MemoryVolume>>,
}

fn fixture() -> Fixture {
    let registry = Arc::new(PolicyRegistry::new());
    registry
        .register(Arc::new(SizePolicy::new(Arc::new(OpenCountDetector))))
        .unwrap();
    let mounts = Arc::new(MountTable::new());

    let mut volumes = Vec::new();
    for label in ["first.img", "second.img"] {
        let volume = Arc::new(MemoryVolume::new(label));
        volume.create_file(ROOT_ID, "small", 10).unwrap();
        volume.create_file(ROOT_ID, "big", 4096).unwrap();
        mounts.mount(volume.clone());
        volumes.push(volume);
    }

    Fixture {
        control: ControlSurface::new(mounts, registry),
        volumes,
    }
}

fn assert_invalid(result: Result<impl std::fmt::Debug, EvictionError>) {
    match result {
        Err(EvictionError::InvalidArgument(_)) => {}
        other => panic!("expected an invalid argument error, got {other:?}"),
    }
}

#[test]
fn test_clean_selected_volume_only() {
    let f = fixture();

    let report = f.control.write_clean("1\n").unwrap();

    assert_eq!(report.victim().unwrap().name, "big");
    assert!(f.volumes[0].exists("/big"));
    assert!(!f.volumes[1].exists("/big"));
}

#[test]
fn test_clean_uses_active_policy() {
    let f = fixture();
    f.control.registry().select("default").unwrap();

    let report = f.control.write_clean("0").unwrap();

    assert_eq!(report.eviction, Eviction::NothingEligible);
    assert!(f.volumes[0].exists("/big"));
}

#[test]
fn test_non_numeric_input() {
    let f = fixture();

    assert_invalid(f.control.write_clean("zero"));
    assert_invalid(f.control.write_clean(""));
    assert_invalid(f.control.write_clean("1.5"));
}

#[test]
fn test_negative_index() {
    let f = fixture();

    assert_invalid(f.control.write_clean("-1"));
}

#[test]
fn test_out_of_range_index() {
    let f = fixture();

    assert_invalid(f.control.write_clean("2"));
    assert_invalid(f.control.write_clean("99999999999"));
    assert!(f.volumes.iter().all(|v| v.removals().is_empty()));
}

#[test]
fn test_partition_without_superblock() {
    let f = fixture();
    let index = f.control.mounts().mount_without_superblock("broken.img");

    assert_invalid(f.control.write_clean(&index.to_string()));
}

#[test]
fn test_magic_mismatch() {
    let f = fixture();
    let foreign = Arc::new(MemoryVolume::new("ext4.img").with_magic(0xEF53));
    foreign.create_file(ROOT_ID, "precious", 1).unwrap();
    let index = f.control.mounts().mount(foreign.clone());

    assert_invalid(f.control.write_clean(&index.to_string()));
    assert!(foreign.exists("/precious"));
}

#[test]
fn test_unmount_shifts_indices() {
    let f = fixture();

    assert!(f.control.mounts().unmount("first.img"));
    assert_eq!(f.control.mounts().labels(), vec!["second.img"]);

    f.control.write_clean("0").unwrap();
    assert!(!f.volumes[1].exists("/big"));
    assert_invalid(f.control.write_clean("1"));
    assert!(!f.control.mounts().unmount("first.img"));
}
