// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for sysfs device enumeration

mod common;

use common::Fixture;
use depthcam::backends::enumeration::{SensorKind, VideoNodes, uvc_module_loaded};
use depthcam::{BackendError, LinuxBackend};

const DEVICE: &str = "pci0000:00/0000:00:14.0/usb2/2-3";

fn camera_fixture() -> Fixture {
    let fixture = Fixture::new();
    fixture.load_uvc();
    let base = fixture.usb_device(DEVICE, 2, "3", 7);
    fixture.video_node(&base, "2-3:1.0", "video0", 0);
    fixture.video_node(&base, "2-3:1.3", "video2", 3);
    fixture.iio_accel(&base, 0);
    fixture.custom_sensor(&base);
    fixture.usb_bus_entry(&base, "2-3");
    fixture
}

#[test]
fn test_uvc_module_detection() {
    let fixture = Fixture::new();
    assert!(!uvc_module_loaded(&fixture.root().join("proc")));

    fixture.write("proc/modules", "uvcvideo 135168 0 - Loading 0x0\n");
    assert!(!uvc_module_loaded(&fixture.root().join("proc")));

    fixture.load_uvc();
    assert!(uvc_module_loaded(&fixture.root().join("proc")));
}

#[test]
fn test_video_enumeration_requires_uvc_driver() {
    let fixture = Fixture::new();
    let result = VideoNodes::new(&fixture.config());
    assert!(matches!(result, Err(BackendError::DeviceUnavailable(_))));
}

#[test]
fn test_video_nodes_carry_usb_identity() {
    let fixture = camera_fixture();
    let backend = LinuxBackend::new(fixture.config());

    let nodes: Vec<_> = backend.video_nodes().unwrap().collect();

    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0].name, "video0");
    assert_eq!(nodes[0].dev_path, fixture.root().join("dev/video0"));
    assert_eq!(nodes[0].identity.vendor_id, 0x8086);
    assert_eq!(nodes[0].identity.product_id, 0x0b3a);
    assert_eq!(nodes[0].identity.interface_index, Some(0));
    assert_eq!(nodes[1].identity.interface_index, Some(3));
    assert_eq!(nodes[0].identity.topology_path.as_str(), "2-3-7");
    assert_eq!(
        nodes[0].identity.topology_path,
        nodes[1].identity.topology_path
    );
}

#[test]
fn test_enumeration_is_stable_across_passes() {
    let fixture = camera_fixture();
    let backend = LinuxBackend::new(fixture.config());

    let first = backend.enumerate_video_devices().unwrap();
    let second = backend.enumerate_video_devices().unwrap();
    assert_eq!(first, second);

    let walk = backend.video_nodes().unwrap();
    let a: Vec<_> = walk.clone().collect();
    let b: Vec<_> = walk.collect();
    assert_eq!(a, b);
}

#[test]
fn test_virtual_video_devices_are_skipped() {
    let fixture = camera_fixture();
    let node = "sys/devices/virtual/video4linux/video9";
    fixture.write(&format!("{}/name", node), "Dummy video device\n");
    fixture.link(node, "sys/class/video4linux/video9");
    fixture.write("dev/video9", "");

    let backend = LinuxBackend::new(fixture.config());
    let names: Vec<_> = backend.video_nodes().unwrap().map(|n| n.name).collect();
    assert_eq!(names, vec!["video0", "video2"]);
}

#[test]
fn test_node_beyond_hop_bound_is_skipped() {
    let fixture = camera_fixture();
    let deep_base = fixture.usb_device("pci0000:00/0000:00:14.0/usb1/1-1", 1, "1", 2);
    let nested = format!("{}/{}", deep_base, ["hub"; 10].join("/"));
    fixture.video_node(&nested, "1-1:1.0", "video4", 0);

    let backend = LinuxBackend::new(fixture.config());
    let names: Vec<_> = backend.video_nodes().unwrap().map(|n| n.name).collect();
    assert_eq!(names, vec!["video0", "video2"]);
}

#[test]
fn test_non_usb_modalias_is_skipped() {
    let fixture = camera_fixture();
    let base = fixture.usb_device("pci0000:00/0000:00:14.0/usb3/3-1", 3, "1", 4);
    fixture.video_node(&base, "3-1:1.0", "video6", 0);
    fixture.write(
        &format!("{}/3-1:1.0/modalias", base),
        "pci:v00008086d00001234\n",
    );

    let backend = LinuxBackend::new(fixture.config());
    assert_eq!(backend.enumerate_video_devices().unwrap().len(), 2);
}

#[test]
fn test_sensor_nodes_found_for_both_families() {
    let fixture = camera_fixture();
    let backend = LinuxBackend::new(fixture.config());

    let sensors: Vec<_> = backend.sensor_nodes().collect();

    assert_eq!(sensors.len(), 2);
    assert_eq!(sensors[0].kind, SensorKind::Iio);
    assert_eq!(sensors[0].name, "accel_3d");
    assert_eq!(sensors[1].kind, SensorKind::Custom);
    assert_eq!(sensors[1].name, "custom");
    assert!(
        sensors
            .iter()
            .all(|s| s.identity.topology_path.as_str() == "2-3-7")
    );

    let devices = backend.enumerate_sensor_devices();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].vendor_id, 0x8086);
}

#[test]
fn test_sensor_without_usb_ids_is_skipped() {
    let fixture = camera_fixture();
    let iio = "sys/devices/platform/iio:device1";
    fixture.write(&format!("{}/name", iio), "als\n");
    fixture.link(iio, "sys/bus/iio/devices/iio:device1");

    let backend = LinuxBackend::new(fixture.config());
    assert_eq!(backend.sensor_nodes().count(), 2);
}

#[test]
fn test_control_interface_is_last_interface() {
    let fixture = camera_fixture();
    fixture.link(
        &format!("sys/devices/{}/2-3:1.0", DEVICE),
        "sys/bus/usb/devices/2-3:1.0",
    );
    fixture.write("sys/devices/usb2/busnum", "2\n");
    fixture.link("sys/devices/usb2", "sys/bus/usb/devices/usb2");

    let backend = LinuxBackend::new(fixture.config());
    let controls: Vec<_> = backend.control_interfaces().collect();

    assert_eq!(controls.len(), 1);
    assert_eq!(controls[0].identity.interface_index, Some(5));
    assert_eq!(controls[0].identity.topology_path.as_str(), "2-3-7");
}

#[test]
fn test_physical_devices_group_by_topology() {
    let fixture = camera_fixture();
    let other = fixture.usb_device("pci0000:00/0000:00:14.0/usb1/1-4", 1, "4", 9);
    fixture.video_node(&other, "1-4:1.0", "video8", 0);

    let backend = LinuxBackend::new(fixture.config());
    let devices = backend.physical_devices();

    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].topology_path.as_str(), "1-4-9");
    assert_eq!(devices[0].video.len(), 1);
    assert!(devices[0].sensors.is_empty());
    assert!(devices[0].control.is_none());

    assert_eq!(devices[1].topology_path.as_str(), "2-3-7");
    assert_eq!(devices[1].video.len(), 2);
    assert_eq!(devices[1].sensors.len(), 2);
    assert!(devices[1].control.is_some());

    let json = serde_json::to_value(&devices).unwrap();
    assert_eq!(json[1]["topology_path"], "2-3-7");
}

#[test]
fn test_open_video_for_vanished_identity_fails() {
    let fixture = camera_fixture();
    let backend = LinuxBackend::new(fixture.config());
    let mut identity = backend.enumerate_video_devices().unwrap()[0].clone();
    identity.interface_index = Some(9);

    assert!(matches!(
        backend.open_video(&identity),
        Err(BackendError::DeviceUnavailable(_))
    ));
}
