#![no_std]

// Control core of the hatch sensor node.
//
// Everything here is target-agnostic: the firmware binds it to Embassy tasks
// and STM32 peripherals, the emulator binds it to a simulated clock and a
// stdin console.

pub mod bridge;
pub mod config;
pub mod engine;
pub mod events;
pub mod mailbox;
pub mod payload;
pub mod ports;
pub mod telemetry;
