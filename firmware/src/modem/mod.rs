//! [`RadioStack`] backed by a UART-attached LoRaWAN AT modem.
//!
//! [`ModemStack`] is the half the transport bridge talks to. It never touches
//! the UART: uplinks go to the modem task through a one-deep channel and
//! completions and downlinks come back through two more. Each uplink carries a
//! sequence number so a completion that arrives after the bridge gave up on it
//! is not credited to the next frame.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

pub mod protocol;

use core::time::Duration;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use embassy_time::with_timeout;
use heapless::Vec;
use node_core::bridge::{Endpoint, RadioStack, Received, SendStatus, StackError, StackEvent};
use portable_atomic::{AtomicU32, Ordering};

use crate::instant::core_duration_to_embassy;
use protocol::ModemDownlink;

/// Largest application frame the node sends.
pub const MAX_UPLINK_LEN: usize = 64;

/// Downlinks buffered between the modem task and the bridge.
pub const DOWNLINK_QUEUE_DEPTH: usize = 2;

/// Highest application port LoRaWAN allows.
const MAX_APPLICATION_PORT: u8 = 223;

/// `SendStatus::Failed` code for frames longer than [`MAX_UPLINK_LEN`].
pub const FRAME_TOO_LONG: i16 = -2;

/// Frame handed to the modem task.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UplinkRequest {
    pub sequence: u32,
    pub port: u8,
    pub frame: Vec<u8, MAX_UPLINK_LEN>,
}

/// Completion reported by the modem task for the uplink with `sequence`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct UplinkCompletion {
    pub sequence: u32,
    pub event: StackEvent,
}

/// Channels shared by [`ModemStack`] and the modem task.
pub struct ModemChannels<M: RawMutex> {
    pub uplinks: Channel<M, UplinkRequest, 1>,
    pub completions: Channel<M, UplinkCompletion, 2>,
    pub downlinks: Channel<M, ModemDownlink, DOWNLINK_QUEUE_DEPTH>,
}

impl<M: RawMutex> ModemChannels<M> {
    pub const fn new() -> Self {
        Self {
            uplinks: Channel::new(),
            completions: Channel::new(),
            downlinks: Channel::new(),
        }
    }
}

impl<M: RawMutex> Default for ModemChannels<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Bridge-facing side of the modem.
pub struct ModemStack<'a, M: RawMutex> {
    channels: &'a ModemChannels<M>,
    next_sequence: AtomicU32,
    awaiting: AtomicU32,
}

impl<'a, M: RawMutex> ModemStack<'a, M> {
    pub const fn new(channels: &'a ModemChannels<M>) -> Self {
        Self {
            channels,
            next_sequence: AtomicU32::new(1),
            awaiting: AtomicU32::new(0),
        }
    }
}

impl<M: RawMutex> RadioStack for ModemStack<'_, M> {
    fn open(&self, endpoint: Endpoint) -> Result<(), StackError> {
        let (Endpoint::Transmit { port } | Endpoint::Receive { port }) = endpoint;
        if port == 0 || port > MAX_APPLICATION_PORT {
            return Err(StackError::InvalidPort(port));
        }
        Ok(())
    }

    fn send(&self, port: u8, frame: &[u8]) -> SendStatus {
        let Ok(frame) = Vec::from_slice(frame) else {
            return SendStatus::Failed(FRAME_TOO_LONG);
        };
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let request = UplinkRequest {
            sequence,
            port,
            frame,
        };

        match self.channels.uplinks.try_send(request) {
            Ok(()) => {
                self.awaiting.store(sequence, Ordering::Release);
                SendStatus::Queued
            }
            Err(TrySendError::Full(_)) => SendStatus::PortBusy,
        }
    }

    async fn wait_tx_event(&self, timeout: Duration) -> StackEvent {
        let awaiting = self.awaiting.load(Ordering::Acquire);
        let matching = async {
            loop {
                let completion = self.channels.completions.receive().await;
                if completion.sequence == awaiting {
                    return completion.event;
                }
                log_stale_completion(completion);
            }
        };

        with_timeout(core_duration_to_embassy(timeout), matching)
            .await
            .unwrap_or(StackEvent::None)
    }

    async fn receive(&self, buffer: &mut [u8], timeout: Duration) -> Option<Received> {
        let downlink = with_timeout(
            core_duration_to_embassy(timeout),
            self.channels.downlinks.receive(),
        )
        .await
        .ok()?;

        let len = downlink.data.len().min(buffer.len());
        buffer[..len].copy_from_slice(&downlink.data[..len]);
        Some(Received {
            port: downlink.port,
            len,
        })
    }
}

#[cfg(target_os = "none")]
fn log_stale_completion(completion: UplinkCompletion) {
    defmt::warn!(
        "modem: dropping stale completion seq={} event={}",
        completion.sequence,
        defmt::Debug2Format(&completion.event)
    );
}

#[cfg(not(target_os = "none"))]
fn log_stale_completion(completion: UplinkCompletion) {
    println!(
        "modem: dropping stale completion seq={} event={:?}",
        completion.sequence, completion.event
    );
}
