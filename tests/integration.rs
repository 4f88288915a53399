//! Integration tests for monitor-audio.
//!
//! These drive the transport-agnostic [`ProcessCore`] together with the real
//! metering and recording pipelines, the same way the JACK process handler
//! does. Tests that need a live JACK server sit next to the engine and are
//! marked `#[ignore]`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use monitor_audio::{
    gain, Controls, EngineStats, MeterBank, MeterWorker, ProcessCore, RecordingSession,
    RecordingShared, Route, RoutingMode,
};

const FRAMES: usize = 128;

/// One period of a sine at the given amplitude.
fn sine_block(amplitude: f32) -> Vec<f32> {
    (0..FRAMES)
        .map(|n| amplitude * (std::f32::consts::TAU * n as f32 / FRAMES as f32).sin())
        .collect()
}

/// Runs one period through the core with the given input blocks.
fn drive(core: &mut ProcessCore, inputs: &[Vec<f32>], outputs: usize) -> Vec<Vec<f32>> {
    let mut outs = vec![vec![-1.0f32; FRAMES]; outputs];
    let ok = core.run_period(
        FRAMES,
        |i, dst| dst.copy_from_slice(&inputs[i][..dst.len()]),
        |o, src| outs[o][..src.len()].copy_from_slice(src),
    );
    assert!(ok);
    outs
}

/// Reads a mono 24-bit WAV back into floats.
fn read_wav_samples(path: &Path) -> (u32, Vec<f32>) {
    let data = std::fs::read(path).unwrap();
    assert_eq!(&data[0..4], b"RIFF");
    assert_eq!(&data[8..12], b"WAVE");

    let sample_rate = u32::from_le_bytes([data[24], data[25], data[26], data[27]]);
    let data_size = u32::from_le_bytes([data[40], data[41], data[42], data[43]]) as usize;
    assert_eq!(data.len(), 44 + data_size, "header size fields must match the file");

    let samples = data[44..]
        .chunks_exact(3)
        .map(|b| {
            let sign = if b[2] & 0x80 != 0 { 0xFF } else { 0x00 };
            i32::from_le_bytes([b[0], b[1], b[2], sign]) as f32 / 8_388_607.0
        })
        .collect();
    (sample_rate, samples)
}

#[test]
fn test_simple_mode_end_to_end_scenario() {
    // Six inputs to a stereo monitor: select channel 3 (0-based 2), trim
    // channel 2 by 6 dB, mute channel 1.
    let controls = Arc::new(Controls::new(6, 2, 0));
    let meters = Arc::new(MeterBank::new(6));
    let recording = Arc::new(RecordingShared::new(6));
    let mut core = ProcessCore::new(
        Arc::clone(&controls),
        meters,
        recording,
        Vec::new(),
        Arc::new(EngineStats::default()),
        FRAMES,
    );

    controls.select_channel(2);
    controls.set_gain_db(1, -6.0).unwrap();
    controls.set_mute(0, true).unwrap();

    let inputs: Vec<Vec<f32>> = (0..6).map(|i| sine_block(0.1 + i as f32 * 0.05)).collect();
    let outs = drive(&mut core, &inputs, 2);

    let settings = controls.settings();
    assert_eq!(settings.selected, Some(2));
    assert!((gain::linear_to_db(settings.input_gains[1]) + 6.0).abs() < 1e-5);
    assert!(settings.input_mutes[0]);

    // Both monitor outputs carry channel 3 at its own (unity) gain,
    // unaffected by the settings on channels 1 and 2.
    for out in &outs {
        for (n, &sample) in out.iter().enumerate() {
            assert!((sample - inputs[2][n]).abs() < 1e-6);
        }
    }
}

#[test]
fn test_matrix_mode_end_to_end_scenario() {
    // Input 1 to output 1 at unity and to output 2 at half amplitude.
    let controls = Arc::new(Controls::new(6, 2, 0));
    let meters = Arc::new(MeterBank::new(6));
    let recording = Arc::new(RecordingShared::new(6));
    let mut core = ProcessCore::new(
        Arc::clone(&controls),
        meters,
        recording,
        Vec::new(),
        Arc::new(EngineStats::default()),
        FRAMES,
    );

    controls.set_mode(RoutingMode::Matrix);
    controls.set_route(0, 0, 1.0).unwrap();
    controls.set_route(0, 1, 0.5).unwrap();

    let routes = controls.routes();
    assert_eq!(routes.len(), 2);
    assert!(routes.contains(&Route {
        input: 0,
        output: 0,
        gain: 1.0
    }));
    assert!(routes.contains(&Route {
        input: 0,
        output: 1,
        gain: 0.5
    }));

    let mut inputs = vec![vec![0.0; FRAMES]; 6];
    inputs[0] = sine_block(0.1);
    let outs = drive(&mut core, &inputs, 2);

    // Below the soft-clip threshold the outputs track the ideal routing.
    for n in 0..FRAMES {
        assert!((outs[0][n] - inputs[0][n]).abs() < 1e-3);
        assert!((outs[1][n] - 0.5 * inputs[0][n]).abs() < 1e-3);
    }
}

#[test]
fn test_control_changes_apply_on_the_next_period() {
    let controls = Arc::new(Controls::new(1, 1, 0));
    let mut core = ProcessCore::new(
        Arc::clone(&controls),
        Arc::new(MeterBank::new(1)),
        Arc::new(RecordingShared::new(1)),
        Vec::new(),
        Arc::new(EngineStats::default()),
        FRAMES,
    );

    let inputs = vec![vec![0.5; FRAMES]];
    let outs = drive(&mut core, &inputs, 1);
    assert!(outs[0].iter().all(|&s| (s - 0.5).abs() < 1e-6));

    controls.set_gain_linear(0, 0.0).unwrap();
    let outs = drive(&mut core, &inputs, 1);
    assert!(outs[0].iter().all(|&s| s == 0.0));
}

#[test]
fn test_gain_state_round_trip() {
    let controls = Arc::new(Controls::new(4, 2, 0));

    controls.set_gain_linear(3, 0.5).unwrap();
    let settings = controls.settings();
    assert_eq!(settings.input_gains[3], 0.5);
    // 20*log10(0.5)
    assert!((gain::linear_to_db(settings.input_gains[3]) + 6.0206).abs() < 1e-3);

    // Silent channel reports the sentinel floor, not -inf.
    controls.set_gain_linear(0, 0.0).unwrap();
    let db = gain::linear_to_db(controls.settings().input_gains[0]);
    assert!(db.is_finite());
    assert!(db <= -200.0);
}

#[test]
fn test_muted_channel_outputs_silence_but_records_raw() {
    let dir = tempfile::tempdir().unwrap();
    let recording = Arc::new(RecordingShared::new(2));
    let (session, producers) =
        RecordingSession::start(dir.path(), 2, 48000, FRAMES * 32, Arc::clone(&recording))
            .unwrap();

    let controls = Arc::new(Controls::new(2, 2, 0));
    let mut core = ProcessCore::new(
        Arc::clone(&controls),
        Arc::new(MeterBank::new(2)),
        Arc::clone(&recording),
        producers,
        Arc::new(EngineStats::default()),
        FRAMES,
    );

    controls.select_channel(0);
    controls.set_mute(0, true).unwrap();

    let signal = sine_block(0.5);
    let inputs = vec![signal.clone(), vec![0.0; FRAMES]];
    for _ in 0..4 {
        let outs = drive(&mut core, &inputs, 2);
        // The muted selection is silent on the monitor.
        assert!(outs.iter().all(|out| out.iter().all(|&s| s == 0.0)));
    }

    let session_dir = session.dir().to_path_buf();
    session.stop();

    // The recorded file carries the raw, unmuted signal.
    let (rate, samples) = read_wav_samples(&session_dir.join("channel_1.wav"));
    assert_eq!(rate, 48000);
    assert_eq!(samples.len(), FRAMES * 4);
    for (n, &sample) in samples.iter().enumerate() {
        assert!(
            (sample - signal[n % FRAMES]).abs() < 1e-5,
            "sample {n} diverged from the raw input"
        );
    }

    assert_eq!(recording.dropped_blocks(), vec![0, 0]);
}

#[test]
fn test_queue_overflow_is_counted_and_never_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let recording = Arc::new(RecordingShared::new(1));
    // Capacity below one period: every block overflows.
    let (session, producers) =
        RecordingSession::start(dir.path(), 1, 48000, FRAMES / 2, Arc::clone(&recording))
            .unwrap();

    let controls = Arc::new(Controls::new(1, 1, 0));
    let mut core = ProcessCore::new(
        controls,
        Arc::new(MeterBank::new(1)),
        Arc::clone(&recording),
        producers,
        Arc::new(EngineStats::default()),
        FRAMES,
    );

    let inputs = vec![vec![0.5; FRAMES]];
    for _ in 0..25 {
        drive(&mut core, &inputs, 1);
    }
    assert_eq!(recording.dropped_blocks(), vec![25]);

    // Drop counters increase monotonically under sustained overload.
    for _ in 0..25 {
        drive(&mut core, &inputs, 1);
    }
    assert_eq!(recording.dropped_blocks(), vec![50]);

    let session_dir = session.dir().to_path_buf();
    session.stop();

    // The writer still produced a valid, finalized file.
    let (rate, samples) = read_wav_samples(&session_dir.join("channel_1.wav"));
    assert_eq!(rate, 48000);
    assert!(samples.is_empty());
}

#[test]
fn test_metering_pipeline_publishes_smoothed_levels() {
    let controls = Arc::new(Controls::new(1, 1, 0));
    let meters = Arc::new(MeterBank::new(1));
    let mut core = ProcessCore::new(
        Arc::clone(&controls),
        Arc::clone(&meters),
        Arc::new(RecordingShared::new(1)),
        Vec::new(),
        Arc::new(EngineStats::default()),
        FRAMES,
    );
    controls.select_channel(0);

    let worker = MeterWorker::spawn(Arc::clone(&meters));

    // Feed a constant 0.4 signal across several 50ms meter ticks.
    let inputs = vec![vec![0.4; FRAMES]];
    for _ in 0..10 {
        drive(&mut core, &inputs, 1);
        std::thread::sleep(Duration::from_millis(20));
    }
    worker.stop();

    let levels = meters.levels();
    assert!(levels[0].peak > 0.05, "peak never published: {levels:?}");
    assert!(levels[0].peak <= 0.41);
    assert!(levels[0].rms > 0.05, "rms never published: {levels:?}");
    assert!(levels[0].rms <= 0.41);
}

#[test]
fn test_preset_load_is_atomic_and_clearable() {
    let controls = Arc::new(Controls::new(4, 4, 0));
    controls.set_route(0, 0, 0.3).unwrap();

    controls
        .load_preset(&[
            Route {
                input: 1,
                output: 1,
                gain: 0.9,
            },
            Route {
                input: 2,
                output: 0,
                gain: 0.6,
            },
        ])
        .unwrap();
    assert_eq!(controls.routes().len(), 2);

    // An invalid preset is rejected whole; the table is unchanged.
    assert!(controls
        .load_preset(&[Route {
            input: 0,
            output: 99,
            gain: 1.0,
        }])
        .is_err());
    assert_eq!(controls.routes().len(), 2);

    controls.clear_all_routes();
    assert!(controls.routes().is_empty());
}
