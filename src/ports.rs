//! Port registration and best-effort auto-connection.
//!
//! Inputs register as `in_1..in_N`; the first two outputs register as
//! `out_l`/`out_r` and any further ones are numbered. Auto-connection
//! matches physical ports by case-insensitive substring, prefers a known
//! multichannel interface when one is present, and retries a bounded number
//! of times to ride out transport startup races. A port that fails to
//! connect is logged and skipped - the engine runs fine on whatever did
//! connect, and unconnected ports simply carry silence.

use std::thread;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::error::EngineError;

/// Port-name markers of the preferred capture/playback hardware (an Audio
/// Injector Octo on the reference deployment). When any port matches, only
/// those ports are used as candidates.
const PREFERRED_DEVICE_MARKERS: [&str; 2] = ["audioinjector", "octo"];

/// How many times to re-query when no physical ports exist yet.
const AUTO_CONNECT_ATTEMPTS: u32 = 3;

/// Fixed delay between auto-connect attempts.
const AUTO_CONNECT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Name of the registered input port for a 0-based channel index.
pub(crate) fn input_port_name(index: usize) -> String {
    format!("in_{}", index + 1)
}

/// Name of the registered output port for a 0-based channel index.
pub(crate) fn output_port_name(index: usize) -> String {
    match index {
        0 => "out_l".to_string(),
        1 => "out_r".to_string(),
        n => format!("out_{}", n + 1),
    }
}

/// Registers the engine's mono input ports.
pub(crate) fn register_input_ports(
    client: &jack::Client,
    count: usize,
) -> Result<Vec<jack::Port<jack::AudioIn>>, EngineError> {
    (0..count)
        .map(|i| {
            client
                .register_port(&input_port_name(i), jack::AudioIn::default())
                .map_err(EngineError::from)
        })
        .collect()
}

/// Registers the engine's mono output ports.
pub(crate) fn register_output_ports(
    client: &jack::Client,
    count: usize,
) -> Result<Vec<jack::Port<jack::AudioOut>>, EngineError> {
    (0..count)
        .map(|i| {
            client
                .register_port(&output_port_name(i), jack::AudioOut::default())
                .map_err(EngineError::from)
        })
        .collect()
}

/// Chooses connection candidates from the available port names.
///
/// Preference order: ports of the preferred hardware, then ports matching
/// the configured pattern (or the generic keyword), then - when the filter
/// leaves fewer ports than channels - every port of the right direction.
fn select_candidates(
    physical: &[String],
    pattern: &str,
    fallback_keyword: &str,
    needed: usize,
    all: &[String],
) -> Vec<String> {
    let preferred: Vec<String> = physical
        .iter()
        .filter(|name| {
            let lower = name.to_lowercase();
            PREFERRED_DEVICE_MARKERS
                .iter()
                .any(|marker| lower.contains(marker))
        })
        .cloned()
        .collect();
    if !preferred.is_empty() {
        return preferred;
    }

    let pattern = pattern.to_lowercase();
    let fallback_keyword = fallback_keyword.to_lowercase();
    let matched: Vec<String> = physical
        .iter()
        .filter(|name| {
            let lower = name.to_lowercase();
            lower.contains(&pattern) || lower.contains(&fallback_keyword)
        })
        .cloned()
        .collect();

    if matched.len() >= needed {
        matched
    } else {
        all.to_vec()
    }
}

/// Connects physical capture ports to the engine's inputs, best effort.
pub(crate) fn auto_connect_inputs(client: &jack::Client, config: &EngineConfig) {
    // Physical capture ports are outputs from the graph's point of view.
    let flags = jack::PortFlags::IS_PHYSICAL | jack::PortFlags::IS_OUTPUT;
    for attempt in 1..=AUTO_CONNECT_ATTEMPTS {
        let physical = client.ports(None, None, flags);
        if physical.is_empty() {
            if attempt < AUTO_CONNECT_ATTEMPTS {
                tracing::debug!(attempt, "no physical capture ports yet; retrying");
                thread::sleep(AUTO_CONNECT_RETRY_DELAY);
                continue;
            }
            tracing::warn!("no physical capture ports found; inputs stay unconnected");
            return;
        }

        let all = client.ports(None, None, jack::PortFlags::IS_OUTPUT);
        let candidates =
            select_candidates(&physical, &config.capture_match, "capture", config.inputs, &all);

        let mut connected = 0;
        for (i, source) in candidates.iter().take(config.inputs).enumerate() {
            let dest = format!("{}:{}", client.name(), input_port_name(i));
            match client.connect_ports_by_name(source, &dest) {
                Ok(()) => {
                    connected += 1;
                    tracing::info!(%source, %dest, "connected capture port");
                }
                Err(error) => {
                    tracing::warn!(%source, %dest, %error, "could not connect capture port");
                }
            }
        }
        if connected < config.inputs {
            tracing::warn!(
                connected,
                wanted = config.inputs,
                "not all inputs connected; unconnected inputs carry silence"
            );
        }
        return;
    }
}

/// Connects the engine's outputs to physical playback ports, best effort.
pub(crate) fn auto_connect_outputs(client: &jack::Client, config: &EngineConfig) {
    let flags = jack::PortFlags::IS_PHYSICAL | jack::PortFlags::IS_INPUT;
    for attempt in 1..=AUTO_CONNECT_ATTEMPTS {
        let physical = client.ports(None, None, flags);
        if physical.is_empty() {
            if attempt < AUTO_CONNECT_ATTEMPTS {
                tracing::debug!(attempt, "no physical playback ports yet; retrying");
                thread::sleep(AUTO_CONNECT_RETRY_DELAY);
                continue;
            }
            tracing::warn!("no physical playback ports found; outputs stay unconnected");
            return;
        }

        let all = client.ports(None, None, jack::PortFlags::IS_INPUT);
        let candidates = select_candidates(
            &physical,
            &config.playback_match,
            "playback",
            config.outputs,
            &all,
        );

        let mut connected = 0;
        for (i, dest) in candidates.iter().take(config.outputs).enumerate() {
            let source = format!("{}:{}", client.name(), output_port_name(i));
            match client.connect_ports_by_name(&source, dest) {
                Ok(()) => {
                    connected += 1;
                    tracing::info!(%source, %dest, "connected playback port");
                }
                Err(error) => {
                    tracing::warn!(%source, %dest, %error, "could not connect playback port");
                }
            }
        }
        if connected < config.outputs {
            tracing::warn!(
                connected,
                wanted = config.outputs,
                "not all outputs connected; unconnected outputs are inaudible"
            );
        }
        return;
    }
}
