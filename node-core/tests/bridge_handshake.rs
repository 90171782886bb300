mod support;

use core::cell::RefCell;
use core::time::Duration;
use std::collections::VecDeque;

use embassy_futures::block_on;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embedded_hal_async::delay::DelayNs;
use node_core::bridge::{
    Endpoint, RadioStack, Received, SendStatus, StackError, StackEvent, TransportBridge,
};
use node_core::config::BridgeConfig;
use node_core::engine::{DispatchOutcome, NodeEngine, State};
use node_core::events::{Event, EventKind, HallLevel, TxResult};
use node_core::mailbox::{Mailbox, PostError};
use node_core::payload::PAYLOAD_BYTES;
use support::{DEVICE_ID, MockHardware, MockInstant, Recorder};

#[derive(Default)]
struct ScriptedStack {
    completions: RefCell<VecDeque<StackEvent>>,
    sent: RefCell<Vec<(u8, Vec<u8>)>>,
}

impl RadioStack for ScriptedStack {
    fn open(&self, _endpoint: Endpoint) -> Result<(), StackError> {
        Ok(())
    }

    fn send(&self, port: u8, frame: &[u8]) -> SendStatus {
        self.sent.borrow_mut().push((port, frame.to_vec()));
        SendStatus::Queued
    }

    async fn wait_tx_event(&self, _timeout: Duration) -> StackEvent {
        self.completions
            .borrow_mut()
            .pop_front()
            .unwrap_or(StackEvent::None)
    }

    async fn receive(&self, _buffer: &mut [u8], _timeout: Duration) -> Option<Received> {
        None
    }
}

struct NoDelay;

impl DelayNs for NoDelay {
    async fn delay_ns(&mut self, _ns: u32) {}
}

fn tx_only() -> BridgeConfig {
    let mut config = BridgeConfig::new();
    config.receive = false;
    config
}

#[test]
fn join_completion_flows_back_through_the_mailbox() {
    let mailbox = Mailbox::<NoopRawMutex>::new();
    let stack = ScriptedStack::default();
    stack
        .completions
        .borrow_mut()
        .push_back(StackEvent::Acknowledged);
    let bridge = TransportBridge::new(stack, &mailbox, tx_only()).unwrap();
    let mut telemetry = Recorder::new();
    let mut engine = NodeEngine::new(
        MockHardware::new(),
        &bridge,
        DEVICE_ID,
        MockInstant::secs(0),
    );

    engine.start(MockInstant::secs(0), &mut telemetry);
    {
        let sent = bridge.stack().sent.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 3);
        assert_eq!(sent[0].1.len(), PAYLOAD_BYTES);
        assert_eq!(&sent[0].1[..4], &[0xaa, 0x00, 0x02, 0x00]);
    }
    assert!(!mailbox.is_pending());
    assert!(!bridge.is_ready());

    block_on(bridge.service_once(&mut NoDelay));
    let event = mailbox.take().unwrap();
    assert_eq!(event, Event::RadioTxStatus(TxResult::SentAndAcknowledged));

    let outcome = engine.dispatch(&event, MockInstant::secs(3), &mut telemetry);
    assert_eq!(outcome, DispatchOutcome::Settled(State::OpWaiting));
    assert!(bridge.is_ready());
}

#[test]
fn busy_bridge_rejects_without_posting() {
    let mailbox = Mailbox::<NoopRawMutex>::new();
    let stack = ScriptedStack::default();
    stack
        .completions
        .borrow_mut()
        .extend([StackEvent::Acknowledged, StackEvent::None]);
    let bridge = TransportBridge::new(stack, &mailbox, tx_only()).unwrap();
    let mut telemetry = Recorder::new();
    let mut engine = NodeEngine::new(
        MockHardware::new(),
        &bridge,
        DEVICE_ID,
        MockInstant::secs(0),
    );
    engine.start(MockInstant::secs(0), &mut telemetry);
    block_on(bridge.service_once(&mut NoDelay));
    let joined = mailbox.take().unwrap();
    engine.dispatch(&joined, MockInstant::secs(1), &mut telemetry);

    engine.hardware_mut().hall = HallLevel::High;
    engine.dispatch(&Event::SensorEdgeHall, MockInstant::secs(2), &mut telemetry);
    assert_eq!(engine.state(), State::OpTxAndWait);

    assert_eq!(
        bridge.request_transmit(&[0; PAYLOAD_BYTES], Duration::from_secs(10)),
        TxResult::ErrorRetryable
    );
    assert!(!mailbox.is_pending());
    assert_eq!(bridge.stack().sent.borrow().len(), 2);

    block_on(bridge.service_once(&mut NoDelay));
    let completion = mailbox.take().unwrap();
    assert_eq!(completion, Event::RadioTxStatus(TxResult::Timeout));
    engine.dispatch(&completion, MockInstant::secs(12), &mut telemetry);
    assert_eq!(engine.state(), State::OpSignalTimeout);
}

#[test]
fn edge_during_pending_completion_is_dropped_and_counted() {
    let mailbox = Mailbox::<NoopRawMutex>::new();
    let stack = ScriptedStack::default();
    stack.completions.borrow_mut().push_back(StackEvent::Sent);
    let bridge = TransportBridge::new(stack, &mailbox, tx_only()).unwrap();

    assert_eq!(
        bridge.request_transmit(&[1, 2], Duration::from_secs(10)),
        TxResult::Sent
    );
    block_on(bridge.service_once(&mut NoDelay));

    assert_eq!(
        mailbox.post(Event::SensorEdgeHall),
        Err(PostError::Occupied {
            rejected: EventKind::SensorEdgeHall,
            pending: EventKind::RadioTxStatus,
        })
    );
    assert_eq!(mailbox.dropped(), 1);
    assert_eq!(
        mailbox.take(),
        Some(Event::RadioTxStatus(TxResult::Sent))
    );
}
