mod common;

use std::collections::HashSet;
use std::time::Duration;

use midisynthd::backend::Availability;
use midisynthd::config::ConfigSources;
use midisynthd::lifecycle::DaemonState;
use midisynthd::midi::TransportMessage;

const NOTES: usize = 1000;

#[test]
fn test_reload_during_dispatch_routes_each_event_once() {
    let dir = tempfile::tempdir().unwrap();
    let font = common::fake_soundfont();
    let path = dir.path().join("midisynthd.conf");
    let body = |gain: f32| format!("gain = {}\nsoundfont = {}\n", gain, font.path().display());
    common::write_config(&path, &body(0.5));

    let mut daemon = common::start_daemon(
        common::config_with(font.path()),
        ConfigSources::explicit(&path),
        Availability::fallback_only(),
        vec![],
    );

    let sender = daemon.sender.clone();
    let feeder = std::thread::spawn(move || {
        for i in 0..NOTES {
            let channel = (i % 16) as u8;
            let note = (i / 16) as u8;
            sender
                .send(TransportMessage::Wire(vec![0x90 | channel, note, 100]))
                .unwrap();
            if i % 50 == 0 {
                std::thread::yield_now();
            }
        }
    });

    let mut gain = 0.5;
    for _ in 0..20 {
        gain = if gain == 0.5 { 1.0 } else { 0.5 };
        common::write_config(&path, &body(gain));
        let changes = daemon.controller.reload().unwrap();
        assert!(changes.gain);
        assert_eq!(daemon.controller.config().synth.gain, gain);
    }
    feeder.join().unwrap();

    assert!(common::wait_until(Duration::from_secs(5), || {
        daemon.engine.note_on_count() == NOTES
    }));

    let note_ons = daemon.engine.note_ons.lock().clone();
    assert_eq!(note_ons.len(), NOTES);
    let unique: HashSet<_> = note_ons.iter().collect();
    assert_eq!(unique.len(), NOTES);
    assert_eq!(daemon.controller.router().stats().routed, NOTES as u64);
    assert_eq!(daemon.controller.router().stats().dropped, 0);

    let gains = daemon.engine.gains.lock().clone();
    assert_eq!(gains.first(), Some(&0.5));
    assert_eq!(gains.last(), Some(&gain));
    assert_eq!(daemon.controller.state(), DaemonState::Running);
}

#[test]
fn test_rejected_reload_keeps_running_values() {
    let dir = tempfile::tempdir().unwrap();
    let font = common::fake_soundfont();
    let path = dir.path().join("midisynthd.conf");
    common::write_config(&path, &format!("soundfont = {}\n", font.path().display()));

    let mut daemon = common::start_daemon(
        common::config_with(font.path()),
        ConfigSources::explicit(&path),
        Availability::fallback_only(),
        vec![],
    );
    std::fs::remove_file(&path).unwrap();

    let before = daemon.controller.config().clone();
    assert!(daemon.controller.reload().is_err());
    assert_eq!(daemon.controller.config(), &before);
    assert_eq!(daemon.controller.state(), DaemonState::Running);
}

#[test]
fn test_reload_signal_handled_by_step() {
    let dir = tempfile::tempdir().unwrap();
    let font = common::fake_soundfont();
    let path = dir.path().join("midisynthd.conf");
    common::write_config(
        &path,
        &format!("gain = 0.8\nsoundfont = {}\n", font.path().display()),
    );

    let mut daemon = common::start_daemon(
        common::config_with(font.path()),
        ConfigSources::explicit(&path),
        Availability::fallback_only(),
        vec![],
    );

    daemon.controller.signals().request_reload();
    daemon.controller.signals().request_reload();
    assert!(daemon.controller.step());
    assert_eq!(daemon.controller.config().synth.gain, 0.8);
    assert_eq!(
        daemon.engine.gains.lock().iter().filter(|g| **g == 0.8).count(),
        1
    );

    daemon.controller.signals().request_terminate();
    assert!(!daemon.controller.step());
    assert_eq!(daemon.controller.state(), DaemonState::Stopped);
}
