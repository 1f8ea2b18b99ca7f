//! Tempo master election
//!
//! This module holds the master request/response handling and the status-driven handoff
//! between the local device and its peers. Everything here runs on [`VirtualDevice`]
//! handlers, so it shares the scheduler's single owner of device state.
//!
//! [`VirtualDevice`]: crate::core::VirtualDevice

pub mod master;
