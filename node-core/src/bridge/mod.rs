//! Radio transport bridge.
//!
//! The bridge turns the blocking calls of a LoRaWAN stack into mailbox
//! events. The control task calls [`TransportBridge::request_transmit`], which
//! never waits: it hands the frame to the stack and releases a single-token
//! [`Signal`] to the bridge task. The bridge task, looping in
//! [`TransportBridge::run`], waits for the stack to report completion,
//! classifies it, and posts exactly one
//! [`Event::RadioTxStatus`](crate::events::Event::RadioTxStatus) per accepted
//! request. Downlinks picked up in the receive window are kept by the bridge
//! and announced with
//! [`Event::RadioRxData`](crate::events::Event::RadioRxData); the control
//! task collects the bytes with [`TransportBridge::take_downlink`].

use core::cell::RefCell;
use core::fmt;
use core::time::Duration;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::signal::Signal;
use embedded_hal_async::delay::DelayNs;
use portable_atomic::{AtomicBool, Ordering};

use crate::config::BridgeConfig;
use crate::events::{Downlink, DownlinkNotice, Event, MAX_DOWNLINK_LEN, TxResult};
use crate::mailbox::{Mailbox, PostError};
use crate::payload::UplinkPayload;
use crate::ports::RadioLink;

/// Logical endpoints a stack can open.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Endpoint {
    Transmit { port: u8 },
    Receive { port: u8 },
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Transmit { port } => write!(f, "tx:{port}"),
            Endpoint::Receive { port } => write!(f, "rx:{port}"),
        }
    }
}

/// Immediate answer of the stack's send primitive.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SendStatus {
    /// Frame accepted; completion will follow.
    Queued,
    /// Another frame is still in the stack.
    PortBusy,
    /// Any other rejection, with the stack's code.
    Failed(i16),
}

/// Completion reported by the stack for an accepted frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StackEvent {
    /// Nothing arrived before the timeout.
    None,
    Error,
    Sent,
    Acknowledged,
}

/// Failure to set up the stack.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StackError {
    /// The stack has no room for another endpoint.
    NoEndpoint,
    /// The port is not usable for application traffic.
    InvalidPort(u8),
    /// Stack-specific failure code.
    Code(i16),
}

impl fmt::Display for StackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackError::NoEndpoint => f.write_str("no free endpoint"),
            StackError::InvalidPort(port) => write!(f, "invalid port {port}"),
            StackError::Code(code) => write!(f, "stack error {code}"),
        }
    }
}

/// Bridge construction failure.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BridgeError {
    pub endpoint: Endpoint,
    pub error: StackError,
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "opening {} failed: {}", self.endpoint, self.error)
    }
}

/// Length and port of a received downlink.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Received {
    pub port: u8,
    pub len: usize,
}

/// Socket-like view of a LoRaWAN stack.
///
/// Every method takes `&self`: the control task calls [`send`](Self::send)
/// while the bridge task is parked in [`wait_tx_event`](Self::wait_tx_event).
#[allow(async_fn_in_trait)]
pub trait RadioStack {
    /// Opens an endpoint.
    ///
    /// # Errors
    ///
    /// Returns a [`StackError`] when the stack cannot provide the endpoint.
    fn open(&self, endpoint: Endpoint) -> Result<(), StackError>;

    /// Queues `frame` for transmission without waiting for the air time.
    fn send(&self, port: u8, frame: &[u8]) -> SendStatus;

    /// Waits up to `timeout` for the completion of the queued frame.
    async fn wait_tx_event(&self, timeout: Duration) -> StackEvent;

    /// Waits up to `timeout` for a downlink and copies it into `buffer`.
    async fn receive(&self, buffer: &mut [u8], timeout: Duration) -> Option<Received>;
}

/// Maps a stack completion onto the result the engine sees.
#[must_use]
pub const fn classify_completion(event: StackEvent) -> TxResult {
    match event {
        StackEvent::None => TxResult::Timeout,
        StackEvent::Error => TxResult::ErrorRetryable,
        StackEvent::Sent => TxResult::Sent,
        StackEvent::Acknowledged => TxResult::SentAndAcknowledged,
    }
}

/// Maps the stack's immediate send answer onto the result the engine sees.
#[must_use]
pub const fn classify_send(status: SendStatus) -> TxResult {
    match status {
        SendStatus::Queued => TxResult::Sent,
        SendStatus::PortBusy => TxResult::ErrorRetryable,
        SendStatus::Failed(_) => TxResult::ErrorFatal,
    }
}

/// What one bridge iteration did.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ServiceReport {
    pub completion: Option<CompletionReport>,
    pub downlink: Option<DownlinkReport>,
    /// `true` when no endpoint is open and the bridge only slept.
    pub idled: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CompletionReport {
    pub event: StackEvent,
    pub result: TxResult,
    pub delivery: Result<(), PostError>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DownlinkReport {
    pub port: u8,
    pub len: usize,
    pub delivery: Result<(), PostError>,
}

/// Serializes transmissions between the control task and a [`RadioStack`].
pub struct TransportBridge<'a, M: RawMutex, S: RadioStack> {
    stack: S,
    mailbox: &'a Mailbox<M>,
    config: BridgeConfig,
    ready: AtomicBool,
    request: Signal<M, Duration>,
    downlink: Mutex<M, RefCell<Option<Downlink>>>,
}

impl<'a, M: RawMutex, S: RadioStack> TransportBridge<'a, M, S> {
    /// Opens the configured endpoints on `stack`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError`] naming the endpoint the stack refused.
    pub fn new(stack: S, mailbox: &'a Mailbox<M>, config: BridgeConfig) -> Result<Self, BridgeError> {
        let mut endpoints = [None, None];
        if config.transmit {
            endpoints[0] = Some(Endpoint::Transmit {
                port: config.tx_port,
            });
        }
        if config.receive {
            endpoints[1] = Some(Endpoint::Receive {
                port: config.rx_port,
            });
        }
        for endpoint in endpoints.into_iter().flatten() {
            stack
                .open(endpoint)
                .map_err(|error| BridgeError { endpoint, error })?;
        }

        Ok(Self {
            stack,
            mailbox,
            config,
            ready: AtomicBool::new(config.transmit),
            request: Signal::new(),
            downlink: Mutex::new(RefCell::new(None)),
        })
    }

    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    #[must_use]
    pub fn stack(&self) -> &S {
        &self.stack
    }

    /// Bytes of the downlink announced by the last
    /// [`Event::RadioRxData`], if not collected yet.
    pub fn take_downlink(&self) -> Option<Downlink> {
        self.downlink.lock(|slot| slot.borrow_mut().take())
    }

    /// `true` while no transmission is in flight.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Hands `frame` to the stack and returns the immediate classification.
    ///
    /// Never waits and never posts to the mailbox. A request made while
    /// another one is in flight fails with [`TxResult::ErrorRetryable`]. The
    /// completion of an accepted request arrives later through the mailbox,
    /// unless `timeout` is zero, in which case no completion is reported.
    pub fn request_transmit(&self, frame: &[u8], timeout: Duration) -> TxResult {
        if !self.config.transmit {
            return TxResult::ErrorFatal;
        }
        if self
            .ready
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return TxResult::ErrorRetryable;
        }

        let status = self.stack.send(self.config.tx_port, frame);
        if status == SendStatus::Queued && !timeout.is_zero() {
            self.request.signal(timeout);
        } else {
            self.ready.store(true, Ordering::Release);
        }
        classify_send(status)
    }

    /// Runs one iteration of the bridge loop.
    pub async fn service_once<D: DelayNs>(&self, delay: &mut D) -> ServiceReport {
        let mut report = ServiceReport::default();

        if self.config.transmit {
            // The requester cleared `ready` when it claimed the token.
            let timeout = self.request.wait().await;
            let event = self.stack.wait_tx_event(timeout).await;
            let result = classify_completion(event);
            self.ready.store(true, Ordering::Release);
            let delivery = self.mailbox.post(Event::RadioTxStatus(result));
            report.completion = Some(CompletionReport {
                event,
                result,
                delivery,
            });
        }

        if self.config.receive {
            let mut buffer = [0u8; MAX_DOWNLINK_LEN];
            if let Some(received) = self
                .stack
                .receive(&mut buffer, self.config.receive_window)
                .await
                && received.len > 0
            {
                let len = received.len.min(buffer.len());
                let downlink = Downlink::from_slice(received.port, &buffer[..len]);
                let notice = DownlinkNotice::of(&downlink);
                let delivery = self.mailbox.post(Event::RadioRxData(notice));
                if delivery.is_ok() {
                    self.downlink.lock(|slot| *slot.borrow_mut() = Some(downlink));
                }
                report.downlink = Some(DownlinkReport {
                    port: received.port,
                    len,
                    delivery,
                });
            }
        }

        if !self.config.transmit && !self.config.receive {
            let millis = u32::try_from(self.config.idle_interval.as_millis()).unwrap_or(u32::MAX);
            delay.delay_ms(millis).await;
            report.idled = true;
        }

        report
    }

    /// Services the stack forever, handing every iteration's report to
    /// `observe`.
    pub async fn run<D, F>(&self, delay: &mut D, mut observe: F) -> !
    where
        D: DelayNs,
        F: FnMut(&ServiceReport),
    {
        loop {
            let report = self.service_once(delay).await;
            observe(&report);
        }
    }
}

impl<M: RawMutex, S: RadioStack> RadioLink for &TransportBridge<'_, M, S> {
    fn request_transmit(&mut self, payload: &UplinkPayload, timeout: Duration) -> TxResult {
        TransportBridge::request_transmit(self, &payload.to_bytes(), timeout)
    }
}
