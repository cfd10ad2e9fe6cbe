// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands
//!
//! Thin wrappers over [`LinuxBackend`] for inspecting devices and checking
//! that streams actually deliver data.

use depthcam::backends::hid::HidProfile;
use depthcam::backends::video::V4l2Device;
use depthcam::{
    DeviceIdentity, Frame, LinuxBackend, Notification, SensorSample, Severity, StreamProfile,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// List physical devices and the nodes that belong to them
pub fn list_devices(backend: &LinuxBackend, json: bool) -> CliResult {
    let devices = backend.physical_devices();

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No devices found.");
        return Ok(());
    }

    let video_ids = backend.enumerate_video_devices().unwrap_or_default();
    let sensor_ids = backend.enumerate_sensor_devices();

    for device in &devices {
        println!("Device {}", device.topology_path);
        for node in &device.video {
            let index = position(&video_ids, &node.identity);
            println!(
                "  video [{}] {} ({})",
                index,
                node.dev_path.display(),
                node.identity
            );
        }
        if !device.sensors.is_empty() {
            let index = sensor_ids
                .iter()
                .position(|id| id.topology_path == device.topology_path)
                .map(|i| i.to_string())
                .unwrap_or_else(|| "-".into());
            let names: Vec<&str> = device.sensors.iter().map(|s| s.name.as_str()).collect();
            println!("  sensors [{}] {}", index, names.join(", "));
        }
        if let Some(control) = &device.control {
            println!("  control {}", control.identity);
        }
        println!();
    }

    Ok(())
}

fn position(ids: &[DeviceIdentity], identity: &DeviceIdentity) -> String {
    ids.iter()
        .position(|id| id == identity)
        .map(|i| i.to_string())
        .unwrap_or_else(|| "-".into())
}

/// Print every profile a video node supports
pub fn list_profiles(backend: &LinuxBackend, device: usize) -> CliResult {
    let identity = select(backend.enumerate_video_devices()?, device, "video")?;
    let node = backend.find_video(&identity)?;
    let profiles = V4l2Device::open(&node.dev_path)?.supported_profiles()?;

    println!("{} ({}):", node.dev_path.display(), identity);
    for profile in profiles {
        println!("  {}", profile);
    }
    Ok(())
}

/// Stream video for `duration` seconds and print frame statistics
pub fn capture_video(
    backend: &LinuxBackend,
    device: usize,
    width: u32,
    height: u32,
    format: &str,
    fps: u32,
    duration: u64,
) -> CliResult {
    let identity = select(backend.enumerate_video_devices()?, device, "video")?;
    let mut session = backend.open_video(&identity)?;
    session.configure(
        StreamProfile::new(width, height, format, fps),
        backend.config().buffer_count,
    )?;

    let frames = Arc::new(AtomicU64::new(0));
    let bytes = Arc::new(AtomicU64::new(0));
    let failed = Arc::new(AtomicBool::new(false));

    let frames_cb = Arc::clone(&frames);
    let bytes_cb = Arc::clone(&bytes);
    session.start(
        Box::new(move |_profile: &StreamProfile, frame: Frame| {
            frames_cb.fetch_add(1, Ordering::Relaxed);
            bytes_cb.fetch_add(frame.data().len() as u64, Ordering::Relaxed);
            frame.release();
        }),
        notification_printer(Arc::clone(&failed)),
    )?;

    println!("Capturing {}... (press Ctrl+C to stop early)", session_profile(&session));
    wait(duration, &failed)?;
    session.stop()?;

    let count = frames.load(Ordering::Relaxed);
    println!(
        "Received {} frames ({} bytes, {:.1} fps)",
        count,
        bytes.load(Ordering::Relaxed),
        count as f64 / duration.max(1) as f64
    );
    Ok(())
}

fn session_profile(session: &depthcam::CaptureSession) -> String {
    session
        .profile()
        .map(|p| p.to_string())
        .unwrap_or_default()
}

/// Stream every sensor of a device for `duration` seconds
pub fn capture_sensors(
    backend: &LinuxBackend,
    device: usize,
    rate: u32,
    duration: u64,
) -> CliResult {
    let identity = select(backend.enumerate_sensor_devices(), device, "sensor")?;
    let mut hid = backend.open_sensors(&identity)?;

    let profiles: Vec<HidProfile> = hid
        .sensor_names()
        .into_iter()
        .map(|name| HidProfile {
            sensor_name: name.to_string(),
            frequency: rate,
        })
        .collect();

    let counts: Arc<Mutex<BTreeMap<String, usize>>> = Arc::default();
    let total = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicBool::new(false));

    let counts_cb = Arc::clone(&counts);
    let total_cb = Arc::clone(&total);
    hid.start(
        &profiles,
        Arc::new(move |sample: &SensorSample<'_>| {
            if total_cb.fetch_add(1, Ordering::Relaxed) == 0 {
                println!("First sample from {}: {:?}", sample.sensor, sample.record.values());
            }
            if let Ok(mut counts) = counts_cb.lock() {
                *counts.entry(sample.sensor.to_string()).or_default() += 1;
            }
        }),
        notification_printer(Arc::clone(&failed)),
    )?;

    println!("Capturing sensors of {}... (press Ctrl+C to stop early)", identity.topology_path);
    wait(duration, &failed)?;
    hid.stop()?;

    if let Ok(counts) = counts.lock() {
        for (sensor, count) in counts.iter() {
            println!("  {}: {} samples", sensor, count);
        }
    }
    println!("Received {} samples", total.load(Ordering::Relaxed));
    Ok(())
}

fn select(ids: Vec<DeviceIdentity>, index: usize, kind: &str) -> Result<DeviceIdentity, String> {
    let count = ids.len();
    ids.into_iter().nth(index).ok_or_else(|| {
        format!(
            "{} device index {} out of range ({} found)",
            kind, index, count
        )
    })
}

fn notification_printer(failed: Arc<AtomicBool>) -> depthcam::NotificationHandler {
    Arc::new(move |notification: Notification| {
        match notification.severity() {
            Severity::Error => {
                eprintln!("Error: {}", notification);
                failed.store(true, Ordering::SeqCst);
            }
            _ => eprintln!("Warning: {}", notification),
        }
    })
}

/// Block until the duration elapses, Ctrl+C, or a stream failure
fn wait(duration: u64, failed: &AtomicBool) -> CliResult {
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = Arc::clone(&stop_flag);
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    let start = Instant::now();
    let target = Duration::from_secs(duration);
    while start.elapsed() < target {
        if stop_flag.load(Ordering::SeqCst) {
            println!();
            println!("Stopping...");
            break;
        }
        if failed.load(Ordering::SeqCst) {
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    Ok(())
}
